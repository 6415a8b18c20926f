//! # 解码模块
//!
//! ## 设计思路
//!
//! - 动画路径：`FrameDecoder` 用 `gif` crate 一次性读完整个缓冲，输出按显示顺序排列的
//!   独立帧（像素块 + 偏移 + 时长），不做帧间叠加。
//! - 单帧路径：把已载入的源图片整体解码为一帧（偏移为 0，画布即自身）。
//!
//! 帧时长在这里统一做下限钳制，下游不会见到低于下限的时长。
//! 下限本身是合法值：恰好等于 `min_frame_delay_ms`（默认 50ms）的帧保持原样，
//! 只有更短的时长才会被抬高。

use std::io::Cursor;

use super::source::{DecodedFrame, SourceImage};
use super::{ConvertConfig, ConvertError};

const GIF_SIGNATURES: [&[u8; 6]; 2] = [b"GIF87a", b"GIF89a"];

/// 动画 GIF 逐帧解码器。
#[derive(Debug, Clone, Copy)]
pub struct FrameDecoder {
    min_delay_ms: u32,
    default_delay_ms: u32,
}

impl FrameDecoder {
    pub fn new(config: &ConvertConfig) -> Self {
        Self {
            min_delay_ms: config.min_frame_delay_ms,
            default_delay_ms: config.default_frame_delay_ms,
        }
    }

    /// 解码整个动画，至少返回一帧。
    ///
    /// 文件头不是 GIF 时返回 `UnsupportedContainer`；中途出错、截断或没有任何帧时返回
    /// `CorruptStream`，不会静默返回部分帧。
    pub fn decode(&self, raw_bytes: &[u8]) -> Result<Vec<DecodedFrame>, ConvertError> {
        if !GIF_SIGNATURES
            .iter()
            .any(|signature| raw_bytes.starts_with(signature.as_slice()))
        {
            return Err(ConvertError::UnsupportedContainer(
                "缺少 GIF87a/GIF89a 文件头".to_string(),
            ));
        }

        let mut options = gif::DecodeOptions::new();
        options.set_color_output(gif::ColorOutput::RGBA);
        let mut decoder = options
            .read_info(Cursor::new(raw_bytes))
            .map_err(|e| ConvertError::CorruptStream(format!("读取 GIF 头失败：{}", e)))?;

        let canvas_width = u32::from(decoder.width());
        let canvas_height = u32::from(decoder.height());

        let mut frames = Vec::new();
        loop {
            let frame = decoder.read_next_frame().map_err(|e| {
                ConvertError::CorruptStream(format!("第 {} 帧解码失败：{}", frames.len(), e))
            })?;
            let Some(frame) = frame else {
                break;
            };

            let width = u32::from(frame.width);
            let height = u32::from(frame.height);
            let expected = width as usize * height as usize * 4;
            if frame.buffer.len() != expected {
                return Err(ConvertError::CorruptStream(format!(
                    "第 {} 帧像素长度异常：{}（期望 {}）",
                    frames.len(),
                    frame.buffer.len(),
                    expected
                )));
            }

            frames.push(DecodedFrame {
                width,
                height,
                offset_x: u32::from(frame.left),
                offset_y: u32::from(frame.top),
                canvas_width,
                canvas_height,
                pixel_patch: frame.buffer.to_vec(),
                // GIF 时长单位为 1/100 秒
                delay_ms: self.clamp_delay(u32::from(frame.delay) * 10),
            });
        }

        if frames.is_empty() {
            return Err(ConvertError::CorruptStream("动画中没有任何帧".to_string()));
        }

        log::debug!(
            "🎞️ GIF 解码完成 - 画布: {}x{} 帧数: {}",
            canvas_width,
            canvas_height,
            frames.len()
        );

        Ok(frames)
    }

    /// 未声明时长（0）时使用默认值，再钳制到下限。
    pub fn clamp_delay(&self, delay_ms: u32) -> u32 {
        let delay = if delay_ms == 0 {
            self.default_delay_ms
        } else {
            delay_ms
        };
        delay.max(self.min_delay_ms)
    }
}

/// 把源图片整体解码为一帧（单帧路径）。
///
/// 对 GIF 源只取第一帧，与浏览器把 GIF 画到画布上的行为一致。
pub fn decode_single_frame(
    source: &SourceImage,
    config: &ConvertConfig,
) -> Result<DecodedFrame, ConvertError> {
    let format = image::guess_format(source.raw_bytes())
        .map_err(|e| ConvertError::UnsupportedContainer(format!("不支持的图片格式：{}", e)))?;

    let decoded = image::load_from_memory_with_format(source.raw_bytes(), format)
        .map_err(|e| ConvertError::CorruptStream(format!("图片解码失败：{}", e)))?;

    let rgba = decoded.into_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(ConvertError::InvalidSourceDimensions { width, height });
    }
    super::loader::validate_pixel_limits(config, width, height)?;

    Ok(DecodedFrame {
        width,
        height,
        offset_x: 0,
        offset_y: 0,
        canvas_width: width,
        canvas_height: height,
        pixel_patch: rgba.into_raw(),
        delay_ms: FrameDecoder::new(config).clamp_delay(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::test_support::{gif_bytes, load_source, png_bytes};

    #[test]
    fn decodes_every_frame_in_display_order() {
        let bytes = gif_bytes(8, 6, &[[255, 0, 0], [0, 255, 0], [0, 0, 255]], 10);
        let frames = FrameDecoder::new(&ConvertConfig::default())
            .decode(&bytes)
            .expect("decode should succeed");

        assert_eq!(frames.len(), 3);
        for frame in &frames {
            assert_eq!((frame.width, frame.height), (8, 6));
            assert_eq!((frame.canvas_width, frame.canvas_height), (8, 6));
            assert_eq!(frame.pixel_patch.len(), 8 * 6 * 4);
            assert_eq!(frame.delay_ms, 100);
        }
        assert_eq!(&frames[0].pixel_patch[..3], &[255, 0, 0]);
        assert_eq!(&frames[1].pixel_patch[..3], &[0, 255, 0]);
        assert_eq!(&frames[2].pixel_patch[..3], &[0, 0, 255]);
    }

    #[test]
    fn short_delays_are_raised_to_floor() {
        let bytes = gif_bytes(4, 4, &[[1, 2, 3], [4, 5, 6]], 2);
        let frames = FrameDecoder::new(&ConvertConfig::default())
            .decode(&bytes)
            .expect("decode should succeed");
        assert!(frames.iter().all(|frame| frame.delay_ms == 50));
    }

    #[test]
    fn missing_delay_uses_default() {
        let decoder = FrameDecoder::new(&ConvertConfig::default());
        assert_eq!(decoder.clamp_delay(0), 100);
        assert_eq!(decoder.clamp_delay(20), 50);
        assert_eq!(decoder.clamp_delay(70), 70);
        assert_eq!(decoder.clamp_delay(50), 50);
        assert_eq!(decoder.clamp_delay(49), 50);
    }

    #[test]
    fn non_gif_container_is_unsupported() {
        let result = FrameDecoder::new(&ConvertConfig::default()).decode(&png_bytes(4, 4));
        assert!(matches!(result, Err(ConvertError::UnsupportedContainer(_))));
    }

    #[test]
    fn truncated_stream_is_corrupt() {
        let bytes = gif_bytes(16, 16, &[[10, 20, 30], [40, 50, 60], [70, 80, 90]], 10);
        for cut in [8, 20, bytes.len() / 2, bytes.len() - 2] {
            let result = FrameDecoder::new(&ConvertConfig::default()).decode(&bytes[..cut]);
            assert!(
                matches!(result, Err(ConvertError::CorruptStream(_))),
                "cut at {cut} should be reported as corrupt"
            );
        }
    }

    #[test]
    fn single_frame_path_decodes_whole_raster() {
        let source = load_source("still.png", &png_bytes(5, 3));
        let frame = decode_single_frame(&source, &ConvertConfig::default())
            .expect("single frame decode should succeed");

        assert_eq!((frame.width, frame.height), (5, 3));
        assert_eq!((frame.offset_x, frame.offset_y), (0, 0));
        assert_eq!(frame.pixel_patch.len(), 5 * 3 * 4);
    }
}
