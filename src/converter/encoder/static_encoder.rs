//! 单帧编码（PNG / JPEG / WebP）。
//!
//! - PNG 无损，忽略质量参数
//! - JPEG 使用 0-100 的用户质量，透明像素按黑色背景合成后丢弃 alpha
//! - WebP 由 `webp` crate（libwebp）有损编码，质量取 `webp_quality`

use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use super::{
    report_progress, validate_frame, AbortHandle, EncodedOutput, EncoderConfig, FrameOptions,
    ProgressSender,
};
use crate::converter::source::{CompositedFrame, TargetFormat};
use crate::converter::ConvertError;

/// 静态编码器，一次编码只接受一帧。
#[derive(Debug)]
pub struct StaticEncoder {
    config: EncoderConfig,
    abort: AbortHandle,
    frame: Option<CompositedFrame>,
}

impl StaticEncoder {
    pub fn begin(config: EncoderConfig, abort: AbortHandle) -> Result<Self, ConvertError> {
        if config.format == TargetFormat::Gif {
            return Err(ConvertError::EncoderInitFailed(
                "静态编码器不支持 GIF 输出".to_string(),
            ));
        }
        if config.output_width == 0 || config.output_height == 0 {
            return Err(ConvertError::EncoderInitFailed(format!(
                "输出尺寸无效：{}x{}",
                config.output_width, config.output_height
            )));
        }
        if config.quality > 100 {
            return Err(ConvertError::EncoderInitFailed(format!(
                "{} 质量超出范围：{}（0-100）",
                config.format, config.quality
            )));
        }

        Ok(Self {
            config,
            abort,
            frame: None,
        })
    }

    pub fn feed(&mut self, frame: CompositedFrame, _options: FrameOptions) -> Result<(), ConvertError> {
        if self.frame.is_some() {
            return Err(ConvertError::SingleFrameEncoderMisuse);
        }
        validate_frame(&frame, &self.config, 0)?;
        self.frame = Some(frame);
        Ok(())
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub async fn finish(self, progress: Option<ProgressSender>) -> Result<EncodedOutput, ConvertError> {
        self.abort.check()?;
        let frame = self.frame.ok_or_else(|| ConvertError::FrameEncodeFailed {
            index: 0,
            reason: "未提供任何帧".to_string(),
        })?;

        report_progress(progress.as_ref(), 0.0);
        let started = Instant::now();
        let config = self.config;

        let bytes = tokio::task::spawn_blocking(move || {
            encode_still(
                config.format,
                config.quality,
                frame.width,
                frame.height,
                &frame.pixel_buffer,
            )
        })
        .await
        .map_err(|e| ConvertError::FrameEncodeFailed {
            index: 0,
            reason: format!("编码线程执行失败：{}", e),
        })??;

        // 编码期间收到取消时丢弃结果
        self.abort.check()?;
        report_progress(progress.as_ref(), 1.0);

        log::info!(
            "✅ {} 编码完成 - {}x{} 大小: {} bytes 耗时: {}ms",
            config.format,
            config.output_width,
            config.output_height,
            bytes.len(),
            started.elapsed().as_millis()
        );

        Ok(EncodedOutput {
            bytes: Bytes::from(bytes),
            skipped_frames: Vec::new(),
        })
    }
}

/// 把一帧 RGBA 像素编码为静态图片。
pub(crate) fn encode_still(
    format: TargetFormat,
    quality: u8,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> Result<Vec<u8>, ConvertError> {
    let mut buffer = Vec::new();
    let encode_error = |e: image::ImageError| ConvertError::FrameEncodeFailed {
        index: 0,
        reason: format!("{} 编码失败：{}", format, e),
    };

    match format {
        TargetFormat::Png => PngEncoder::new(&mut buffer)
            .write_image(rgba, width, height, ExtendedColorType::Rgba8)
            .map_err(encode_error)?,
        TargetFormat::Jpeg => {
            let rgb = flatten_on_black(rgba);
            // JPEG 编码器的质量下限为 1
            JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
                .write_image(&rgb, width, height, ExtendedColorType::Rgb8)
                .map_err(encode_error)?
        }
        TargetFormat::Webp => {
            let encoded = webp::Encoder::from_rgba(rgba, width, height)
                .encode_simple(false, f32::from(quality))
                .map_err(|e| ConvertError::FrameEncodeFailed {
                    index: 0,
                    reason: format!("{} 编码失败：{:?}", format, e),
                })?;
            buffer.extend_from_slice(&encoded);
        }
        TargetFormat::Gif => {
            return Err(ConvertError::EncoderInitFailed(
                "静态编码器不支持 GIF 输出".to_string(),
            ));
        }
    }

    Ok(buffer)
}

/// RGBA 按黑色背景合成为 RGB。
fn flatten_on_black(rgba: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(rgba.len() / 4 * 3);
    for px in rgba.chunks_exact(4) {
        let alpha = u16::from(px[3]);
        for &channel in &px[..3] {
            rgb.push(((u16::from(channel) * alpha + 127) / 255) as u8);
        }
    }
    rgb
}
