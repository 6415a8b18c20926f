//! # 转换流水线
//!
//! ## 设计思路
//!
//! 一次转换请求对应一个 `ConversionPipeline` 实例，状态单向推进：
//! `Idle → Decoding → Compositing → Encoding → {Succeeded | Failed}`。
//! `run` 会消耗实例，终态不可能被再次驱动，也不存在隐式重试。
//!
//! ## 实现思路
//!
//! - 只有“目标为 GIF 且源为 GIF”时走逐帧解码，其余组合把源当作单帧
//! - 输出尺寸由第一帧的画布尺寸（单帧路径即整图尺寸）经尺寸策略得出
//! - 第一帧合成完成即发布实时预览，不影响最终结果
//! - 解码与合成在 `spawn_blocking` 中执行，编码进度转发为流水线事件
//! - 任何失败都包装为带目标格式的 [`ConversionFailure`]
//! - 记录 `decode/composite/encode/total` 阶段耗时

use std::time::Instant;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::compositor::FrameCompositor;
use super::decoder::{decode_single_frame, FrameDecoder};
use super::encoder::{AbortHandle, Encoder, EncoderConfig, FrameOptions};
use super::loader::{validate_decoded_memory_limits, validate_pixel_limits};
use super::source::{
    CompositedFrame, ConversionResult, DecodedFrame, LivePreview, SourceImage, TargetFormat,
    TargetSpec,
};
use super::{ConversionFailure, ConvertConfig, ConvertError};

/// 流水线状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Decoding,
    Compositing,
    Encoding,
    Succeeded,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// 流水线运行期间发布的事件。
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(PipelineState),
    /// 第一帧合成完成后的预览，不是最终结果。
    Preview(LivePreview),
    /// 编码进度，`[0,1]`。
    Progress(f32),
}

/// 单次转换流水线。
#[derive(Debug)]
pub struct ConversionPipeline {
    config: ConvertConfig,
    state: PipelineState,
    abort: AbortHandle,
    events: Option<UnboundedSender<PipelineEvent>>,
}

impl ConversionPipeline {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            abort: AbortHandle::new(),
            events: None,
        }
    }

    /// 订阅状态、预览与进度事件。
    pub fn with_events(mut self, events: UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// 使用外部取消令牌（批处理取消会传递到正在运行的编码器）。
    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// 执行一次转换。
    ///
    /// # 示例
    /// ```rust,no_run
    /// use image_transcoder::converter::{
    ///     ConversionPipeline, ConvertConfig, SizeSelector, SourceImage, TargetFormat, TargetSpec,
    /// };
    ///
    /// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = ConvertConfig::default();
    /// let source = SourceImage::from_path("cat.gif", &config)?;
    /// let target = TargetSpec::new(TargetFormat::Gif, "200x200".parse::<SizeSelector>()?);
    /// let result = ConversionPipeline::new(config).run(&source, target).await?;
    /// println!("{} bytes", result.byte_length);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(
        mut self,
        source: &SourceImage,
        target: TargetSpec,
    ) -> Result<ConversionResult, ConversionFailure> {
        match self.execute(source, target).await {
            Ok(result) => {
                self.transition(PipelineState::Succeeded);
                Ok(result)
            }
            Err(error) => {
                self.transition(PipelineState::Failed);
                log::error!(
                    "❌ 转换失败 - 源: {} 目标: {} 错误码: {} 阶段: {} 原因: {}",
                    source.display_name(),
                    target.format,
                    error.code(),
                    error.stage(),
                    error
                );
                Err(ConversionFailure::new(target.format, error))
            }
        }
    }

    async fn execute(
        &mut self,
        source: &SourceImage,
        target: TargetSpec,
    ) -> Result<ConversionResult, ConvertError> {
        let total_start = Instant::now();
        self.abort.check()?;

        // ── 解码 ─────────────────────────────────────
        self.transition(PipelineState::Decoding);
        let decode_start = Instant::now();
        let frames = self.decode(source, target.format).await?;
        let decode_elapsed = decode_start.elapsed();
        self.abort.check()?;

        // ── 合成 ─────────────────────────────────────
        self.transition(PipelineState::Compositing);
        let composite_start = Instant::now();
        let first = frames
            .first()
            .ok_or_else(|| ConvertError::CorruptStream("没有可合成的帧".to_string()))?;
        let (output_width, output_height) = target
            .size_selector
            .resolve(first.canvas_width, first.canvas_height)?;
        Self::check_output_size(&self.config, target.format, output_width, output_height)?;
        let delays: Vec<u32> = frames.iter().map(|frame| frame.delay_ms).collect();
        let composited = self
            .composite_all(frames, output_width, output_height)
            .await?;
        let composite_elapsed = composite_start.elapsed();

        if let Some(Ok(frame)) = composited.first() {
            self.publish_preview(target.format, frame);
        }
        self.abort.check()?;

        // ── 编码 ─────────────────────────────────────
        self.transition(PipelineState::Encoding);
        let encode_start = Instant::now();
        let total_frames = composited.len();
        let mut encoder = Encoder::begin(
            EncoderConfig {
                format: target.format,
                output_width,
                output_height,
                quality: self.quality_for(target.format),
                workers: self.config.gif_workers,
            },
            self.abort.clone(),
        )?;

        for (frame, delay_ms) in composited.into_iter().zip(delays) {
            match frame {
                Ok(frame) => encoder.feed(frame, FrameOptions { delay_ms })?,
                Err(err) => encoder.reject_frame(err)?,
            }
        }

        let output = match &self.events {
            Some(events) => {
                let (progress_tx, mut progress_rx) = tokio::sync::mpsc::unbounded_channel();
                let events = events.clone();
                let forward = tokio::spawn(async move {
                    while let Some(fraction) = progress_rx.recv().await {
                        let _ = events.send(PipelineEvent::Progress(fraction));
                    }
                });
                let output = encoder.finish(Some(progress_tx)).await;
                // 发送端随 finish 一起释放，转发任务会自然结束
                let _ = forward.await;
                output?
            }
            None => encoder.finish(None).await?,
        };
        let encode_elapsed = encode_start.elapsed();

        log::info!(
            "✅ 转换完成 - {} -> {} {}x{} decode={}ms composite={}ms encode={}ms total={}ms",
            source.display_name(),
            target.format,
            output_width,
            output_height,
            decode_elapsed.as_millis(),
            composite_elapsed.as_millis(),
            encode_elapsed.as_millis(),
            total_start.elapsed().as_millis()
        );

        Ok(ConversionResult {
            source_name: source.display_name().to_string(),
            format: target.format,
            size_selector: target.size_selector,
            width: output_width,
            height: output_height,
            frame_count: total_frames - output.skipped_frames.len(),
            skipped_frames: output.skipped_frames,
            byte_length: output.bytes.len(),
            blob: output.bytes,
        })
    }

    async fn decode(
        &self,
        source: &SourceImage,
        format: TargetFormat,
    ) -> Result<Vec<DecodedFrame>, ConvertError> {
        let config = self.config.clone();
        let join_error =
            |e: tokio::task::JoinError| ConvertError::CorruptStream(format!("解码线程执行失败：{}", e));

        if format == TargetFormat::Gif && source.is_animated_container() {
            let raw = source.raw_bytes().clone();
            let decoder = FrameDecoder::new(&config);
            tokio::task::spawn_blocking(move || decoder.decode(&raw))
                .await
                .map_err(join_error)?
        } else {
            let source = source.clone();
            tokio::task::spawn_blocking(move || decode_single_frame(&source, &config).map(|frame| vec![frame]))
                .await
                .map_err(join_error)?
        }
    }

    /// 合成全部帧，单帧失败保留在结果中交由编码器决定跳过还是终止。
    async fn composite_all(
        &self,
        frames: Vec<DecodedFrame>,
        output_width: u32,
        output_height: u32,
    ) -> Result<Vec<Result<CompositedFrame, ConvertError>>, ConvertError> {
        let compositor = FrameCompositor::new(self.config.resize_filter);
        let abort = self.abort.clone();

        tokio::task::spawn_blocking(move || {
            frames
                .iter()
                .map(|frame| {
                    abort.check()?;
                    Ok(compositor.composite(frame, output_width, output_height))
                })
                .collect::<Result<Vec<_>, ConvertError>>()
        })
        .await
        .map_err(|e| ConvertError::CorruptStream(format!("合成线程执行失败：{}", e)))?
    }

    /// 合成前校验输出尺寸：画布分配与源图片共用同一套上限，GIF 还受 16 位尺寸限制。
    fn check_output_size(
        config: &ConvertConfig,
        format: TargetFormat,
        width: u32,
        height: u32,
    ) -> Result<(), ConvertError> {
        validate_pixel_limits(config, width, height)?;
        validate_decoded_memory_limits(config, width, height)?;

        let limit = u32::from(u16::MAX);
        if format == TargetFormat::Gif && (width > limit || height > limit) {
            return Err(ConvertError::EncoderInitFailed(format!(
                "GIF 输出尺寸超出范围：{}x{}（最大 {}x{}）",
                width, height, limit, limit
            )));
        }
        Ok(())
    }

    fn quality_for(&self, format: TargetFormat) -> u8 {
        match format {
            TargetFormat::Png => 0,
            TargetFormat::Jpeg => self.config.jpeg_quality,
            TargetFormat::Webp => self.config.webp_quality,
            TargetFormat::Gif => self.config.gif_quantize_quality,
        }
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("🔄 流水线状态：{:?} -> {:?}", self.state, next);
        self.state = next;
        self.emit(PipelineEvent::StateChanged(next));
    }

    fn publish_preview(&self, format: TargetFormat, frame: &CompositedFrame) {
        if self.events.is_none() {
            return;
        }
        self.emit(PipelineEvent::Preview(LivePreview {
            format,
            width: frame.width,
            height: frame.height,
            rgba: frame.pixel_buffer.clone(),
        }));
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::source::SizeSelector;
    use crate::converter::test_support::{gif_bytes, load_source, png_bytes};

    fn spec(format: TargetFormat, size: &str) -> TargetSpec {
        TargetSpec::new(format, size.parse().expect("valid selector"))
    }

    #[tokio::test]
    async fn static_conversion_resolves_box_dimensions() {
        let source = load_source("photo.png", &png_bytes(400, 300));
        let result = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Jpeg, "100x100"))
            .await
            .expect("conversion should succeed");

        assert_eq!((result.width, result.height), (100, 75));
        assert_eq!(result.frame_count, 1);
        assert_eq!(result.byte_length, result.blob.len());
        assert_eq!(result.file_name(), "photo.jpeg");

        let decoded = image::load_from_memory(&result.blob).expect("decode output");
        assert_eq!((decoded.width(), decoded.height()), (100, 75));
    }

    #[tokio::test]
    async fn animated_gif_keeps_every_frame() {
        let colors = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0], [0, 0, 0]];
        let source = load_source("spin.gif", &gif_bytes(12, 10, &colors, 10));
        let result = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, TargetSpec::new(TargetFormat::Gif, SizeSelector::Original))
            .await
            .expect("conversion should succeed");

        assert_eq!(result.frame_count, 5);
        assert!(result.skipped_frames.is_empty());

        let frames = FrameDecoder::new(&ConvertConfig::default())
            .decode(&result.blob)
            .expect("decode output");
        assert_eq!(frames.len(), 5);
    }

    #[tokio::test]
    async fn gif_source_to_static_format_uses_first_frame() {
        let source = load_source("spin.gif", &gif_bytes(8, 8, &[[9, 9, 9], [200, 0, 0]], 10));
        let result = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Png, "4x4"))
            .await
            .expect("conversion should succeed");

        assert_eq!(result.frame_count, 1);
        assert_eq!((result.width, result.height), (4, 4));
        assert_eq!(
            image::guess_format(&result.blob).expect("guess format"),
            image::ImageFormat::Png
        );
    }

    #[tokio::test]
    async fn still_source_to_gif_produces_single_frame_animation() {
        let source = load_source("logo.png", &png_bytes(16, 8));
        let result = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Gif, "8x8"))
            .await
            .expect("conversion should succeed");

        assert_eq!((result.width, result.height), (8, 4));
        let frames = FrameDecoder::new(&ConvertConfig::default())
            .decode(&result.blob)
            .expect("decode output");
        assert_eq!(frames.len(), 1);
    }

    #[tokio::test]
    async fn events_follow_state_order_with_preview_before_encoding() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let source = load_source("photo.png", &png_bytes(20, 10));
        ConversionPipeline::new(ConvertConfig::default())
            .with_events(tx)
            .run(&source, spec(TargetFormat::Webp, "original"))
            .await
            .expect("conversion should succeed");

        let mut states = Vec::new();
        let mut preview_seen_at = None;
        let mut progress = Vec::new();
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::StateChanged(state) => states.push(state),
                PipelineEvent::Preview(preview) => {
                    assert_eq!((preview.width, preview.height), (20, 10));
                    preview_seen_at = Some(states.len());
                }
                PipelineEvent::Progress(fraction) => progress.push(fraction),
            }
        }

        assert_eq!(
            states,
            vec![
                PipelineState::Decoding,
                PipelineState::Compositing,
                PipelineState::Encoding,
                PipelineState::Succeeded,
            ]
        );
        assert_eq!(preview_seen_at, Some(2));
        assert_eq!(progress.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn abort_before_run_fails_with_target_format() {
        let source = load_source("photo.png", &png_bytes(4, 4));
        let pipeline = ConversionPipeline::new(ConvertConfig::default());
        pipeline.abort_handle().abort();

        let failure = pipeline
            .run(&source, spec(TargetFormat::Gif, "original"))
            .await
            .expect_err("aborted run must fail");
        assert_eq!(failure.format, TargetFormat::Gif);
        assert!(matches!(failure.error, ConvertError::Aborted));
    }

    #[tokio::test]
    async fn oversized_box_is_rejected_before_compositing() {
        let source = load_source("tiny.png", &png_bytes(4, 4));
        for format in [TargetFormat::Gif, TargetFormat::Webp] {
            let failure = ConversionPipeline::new(ConvertConfig::default())
                .run(&source, spec(format, "70000x70000"))
                .await
                .expect_err("oversized output must fail");
            assert!(matches!(failure.error, ConvertError::ResourceLimit(_)));
        }
    }

    #[tokio::test]
    async fn gif_wider_than_sixteen_bits_fails_at_init() {
        let source = load_source("strip.png", &png_bytes(70_000, 1));
        let failure = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Gif, "original"))
            .await
            .expect_err("gif wider than u16 must fail");
        assert!(matches!(failure.error, ConvertError::EncoderInitFailed(_)));

        let png = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Png, "original"))
            .await
            .expect("png has no 16-bit limit");
        assert_eq!((png.width, png.height), (70_000, 1));
    }

    #[tokio::test]
    async fn truncated_animation_fails_as_corrupt() {
        let bytes = gif_bytes(16, 16, &[[1, 2, 3], [4, 5, 6], [7, 8, 9]], 10);
        let source = load_source("broken.gif", &bytes[..bytes.len() / 2]);

        let failure = ConversionPipeline::new(ConvertConfig::default())
            .run(&source, spec(TargetFormat::Gif, "original"))
            .await
            .expect_err("truncated gif must fail");
        assert!(matches!(failure.error, ConvertError::CorruptStream(_)));
        assert!(failure.to_string().contains("GIF"));
    }
}
