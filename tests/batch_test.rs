use std::io::Cursor;

use image_transcoder::converter::{
    BatchCancel, BatchEvent, BatchStatus, ConversionSession, ConvertConfig, SizeSelector,
    SourceFile, TargetFormat,
};

fn png_file(name: &str, width: u32, height: u32) -> SourceFile {
    let image = image::RgbaImage::from_pixel(width, height, image::Rgba([30, 60, 90, 255]));
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode png failed");
    SourceFile::new(name, Some("image/png"), buffer.into_inner())
}

fn malformed_file(name: &str) -> SourceFile {
    // PNG 文件头之后全是垃圾数据
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&[0xAB; 64]);
    SourceFile::new(name, Some("image/png"), bytes)
}

#[tokio::test]
async fn one_malformed_item_does_not_stop_the_batch() {
    let mut session = ConversionSession::new(ConvertConfig::default());
    session
        .load(&png_file("current.png", 12, 12))
        .expect("load current failed");
    let before = session.current().cloned();

    let files = vec![
        png_file("one.png", 20, 10),
        png_file("two.png", 10, 20),
        malformed_file("three.png"),
        png_file("four.png", 16, 16),
        png_file("five.png", 8, 4),
    ];
    session.load_batch(files).expect("load batch failed");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let summary = session
        .process_batch_with(
            TargetFormat::Webp,
            SizeSelector::Box {
                width: 8,
                height: 8,
            },
            Some(&tx),
            &BatchCancel::new(),
        )
        .await
        .expect("process batch failed");

    assert_eq!(summary.total, 5);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 1);
    assert!(!summary.cancelled);

    let statuses: Vec<BatchStatus> = session.batch_items().iter().map(|item| item.status()).collect();
    assert_eq!(
        statuses,
        vec![
            BatchStatus::Completed,
            BatchStatus::Completed,
            BatchStatus::Error,
            BatchStatus::Completed,
            BatchStatus::Completed,
        ]
    );
    assert_eq!(session.current().cloned(), before);

    let names: Vec<Option<String>> = session
        .batch_items()
        .iter()
        .map(|item| item.download_name())
        .collect();
    assert_eq!(names[0].as_deref(), Some("one.webp"));
    assert_eq!(names[2], None);

    drop(tx);
    let mut fractions = Vec::new();
    let mut finished = 0;
    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::Progress { fraction, .. } => fractions.push(fraction),
            BatchEvent::Finished(_) => finished += 1,
            BatchEvent::ItemStatus { .. } => {}
        }
    }
    assert_eq!(fractions, vec![0.2, 0.4, 0.6, 0.8, 1.0]);
    assert_eq!(finished, 1);
}

#[tokio::test]
async fn batch_results_are_independent_of_single_image_results() {
    let mut session = ConversionSession::new(ConvertConfig::default());
    session
        .load_batch(vec![png_file("a.png", 6, 6), png_file("b.png", 6, 6)])
        .expect("load batch failed");

    let summary = session
        .process_batch(TargetFormat::Gif, SizeSelector::Original)
        .await
        .expect("process batch failed");

    assert_eq!(summary.completed, 2);
    assert!(session.current().is_none());
    assert!(session.results().is_empty());
    for item in session.batch_items() {
        let result = item.result().expect("completed item keeps its result");
        assert_eq!(result.format, TargetFormat::Gif);
        assert!(result.blob.starts_with(b"GIF89a"));
    }
}

#[tokio::test]
async fn cancelled_batch_reports_cancellation() {
    let mut session = ConversionSession::new(ConvertConfig::default());
    session
        .load_batch(vec![png_file("a.png", 4, 4), png_file("b.png", 4, 4)])
        .expect("load batch failed");

    let cancel = BatchCancel::new();
    cancel.cancel();
    let summary = session
        .process_batch_with(TargetFormat::Png, SizeSelector::Original, None, &cancel)
        .await
        .expect("process batch failed");

    assert!(summary.cancelled);
    assert!(session
        .batch_items()
        .iter()
        .all(|item| item.status() == BatchStatus::Ready));
}

#[tokio::test]
async fn oversized_box_fails_items_without_stopping_the_batch() {
    let mut session = ConversionSession::new(ConvertConfig::default());
    session
        .load_batch(vec![png_file("a.png", 4, 4), png_file("b.png", 4, 4)])
        .expect("load batch failed");

    let summary = session
        .process_batch(
            TargetFormat::Gif,
            SizeSelector::Box {
                width: 70_000,
                height: 70_000,
            },
        )
        .await
        .expect("process batch failed");

    assert_eq!((summary.completed, summary.failed), (0, 2));
    assert!(session
        .batch_items()
        .iter()
        .all(|item| item.status() == BatchStatus::Error && item.result().is_none()));
}
