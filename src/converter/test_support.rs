//! 单元测试共用的样例图片构造函数。

use std::borrow::Cow;
use std::io::Cursor;

use super::source::{SourceFile, SourceImage};
use super::ConvertConfig;

/// 生成一张带渐变的 PNG。
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 7 % 256) as u8, (y * 13 % 256) as u8, 128, 255])
    });
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, image::ImageFormat::Png)
        .expect("encode fixture png failed");
    buffer.into_inner()
}

/// 生成一个多帧 GIF，每帧为一种纯色并覆盖整张画布。
///
/// 每帧自带两色局部调色板，颜色解码后可精确比较。
pub(crate) fn gif_bytes(width: u16, height: u16, colors: &[[u8; 3]], delay_cs: u16) -> Vec<u8> {
    let mut encoder =
        gif::Encoder::new(Vec::new(), width, height, &[]).expect("create fixture gif failed");
    encoder
        .set_repeat(gif::Repeat::Infinite)
        .expect("set fixture repeat failed");

    for color in colors {
        let frame = gif::Frame {
            width,
            height,
            delay: delay_cs,
            palette: Some(vec![color[0], color[1], color[2], 0, 0, 0]),
            buffer: Cow::Owned(vec![0u8; width as usize * height as usize]),
            ..gif::Frame::default()
        };
        encoder
            .write_frame(&frame)
            .expect("write fixture frame failed");
    }

    encoder.into_inner().expect("finish fixture gif failed")
}

pub(crate) fn load_source(name: &str, bytes: &[u8]) -> SourceImage {
    let file = SourceFile::new(name, None, bytes.to_vec());
    SourceImage::load(&file, &ConvertConfig::default()).expect("load fixture source failed")
}
