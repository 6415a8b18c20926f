//! # 帧合成模块
//!
//! ## 设计思路
//!
//! 合成分两步：
//! 1. 把像素块按偏移贴到声明尺寸的透明画布上（超出画布的部分裁掉）
//! 2. 把整张画布直接拉伸到输出尺寸（不裁剪、不留边）
//!
//! 缩放优先使用 `fast_image_resize`，失败时回退 `image::imageops::resize`。
//! 合成只读取 `DecodedFrame`，输出是新分配的缓冲。

use fast_image_resize as fr;
use image::{ImageBuffer, Rgba};

use super::config::ResizeFilter;
use super::source::{CompositedFrame, DecodedFrame};
use super::ConvertError;

/// 帧合成器。
#[derive(Debug, Clone, Copy)]
pub struct FrameCompositor {
    filter: ResizeFilter,
}

impl FrameCompositor {
    pub fn new(filter: ResizeFilter) -> Self {
        Self { filter }
    }

    /// 把一帧合成并缩放到 `output_width x output_height`。
    pub fn composite(
        &self,
        frame: &DecodedFrame,
        output_width: u32,
        output_height: u32,
    ) -> Result<CompositedFrame, ConvertError> {
        if output_width == 0 || output_height == 0 {
            return Err(ConvertError::InvalidSourceDimensions {
                width: output_width,
                height: output_height,
            });
        }

        let (canvas_width, canvas_height, canvas) = Self::render_on_canvas(frame)?;

        let pixel_buffer = if (canvas_width, canvas_height) == (output_width, output_height) {
            canvas
        } else {
            self.scale(canvas, canvas_width, canvas_height, output_width, output_height)?
        };

        Ok(CompositedFrame {
            width: output_width,
            height: output_height,
            pixel_buffer,
        })
    }

    fn render_on_canvas(frame: &DecodedFrame) -> Result<(u32, u32, Vec<u8>), ConvertError> {
        let expected = (frame.width as usize)
            .checked_mul(frame.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| ConvertError::ResourceLimit("帧尺寸导致内存溢出风险".to_string()))?;
        if frame.pixel_patch.len() != expected {
            return Err(ConvertError::CorruptStream(format!(
                "像素块长度异常：{}（期望 {}）",
                frame.pixel_patch.len(),
                expected
            )));
        }

        let (canvas_width, canvas_height) = (frame.canvas_width, frame.canvas_height);
        if canvas_width == 0 || canvas_height == 0 {
            return Err(ConvertError::InvalidSourceDimensions {
                width: canvas_width,
                height: canvas_height,
            });
        }

        let covers_canvas = frame.offset_x == 0
            && frame.offset_y == 0
            && frame.width == canvas_width
            && frame.height == canvas_height;
        if covers_canvas {
            return Ok((canvas_width, canvas_height, frame.pixel_patch.clone()));
        }

        let mut canvas = vec![0u8; canvas_width as usize * canvas_height as usize * 4];
        let visible_width = frame
            .width
            .min(canvas_width.saturating_sub(frame.offset_x)) as usize;
        let visible_height = frame
            .height
            .min(canvas_height.saturating_sub(frame.offset_y)) as usize;

        let patch_stride = frame.width as usize * 4;
        let canvas_stride = canvas_width as usize * 4;
        for row in 0..visible_height {
            let src_start = row * patch_stride;
            let dst_start =
                (frame.offset_y as usize + row) * canvas_stride + frame.offset_x as usize * 4;
            let len = visible_width * 4;
            canvas[dst_start..dst_start + len]
                .copy_from_slice(&frame.pixel_patch[src_start..src_start + len]);
        }

        Ok((canvas_width, canvas_height, canvas))
    }

    fn scale(
        &self,
        canvas: Vec<u8>,
        canvas_width: u32,
        canvas_height: u32,
        output_width: u32,
        output_height: u32,
    ) -> Result<Vec<u8>, ConvertError> {
        match self.scale_with_fast_image_resize(
            &canvas,
            canvas_width,
            canvas_height,
            output_width,
            output_height,
        ) {
            Ok(scaled) => Ok(scaled),
            Err(err) => {
                log::warn!(
                    "⚠️ fast_image_resize 缩放失败，回退 image::imageops::resize：{}",
                    err
                );
                let buffer = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
                    canvas_width,
                    canvas_height,
                    canvas,
                )
                .ok_or_else(|| ConvertError::CorruptStream("画布缓冲长度异常".to_string()))?;
                Ok(image::imageops::resize(
                    &buffer,
                    output_width,
                    output_height,
                    self.filter.to_image_filter(),
                )
                .into_raw())
            }
        }
    }

    fn scale_with_fast_image_resize(
        &self,
        canvas: &[u8],
        canvas_width: u32,
        canvas_height: u32,
        output_width: u32,
        output_height: u32,
    ) -> Result<Vec<u8>, ConvertError> {
        let src_image = fr::images::Image::from_vec_u8(
            canvas_width,
            canvas_height,
            canvas.to_vec(),
            fr::PixelType::U8x4,
        )
        .map_err(|e| ConvertError::CorruptStream(format!("构建源图像缓冲失败：{}", e)))?;

        let mut dst_image = fr::images::Image::new(output_width, output_height, fr::PixelType::U8x4);

        let mut resizer = fr::Resizer::new();
        let options = fr::ResizeOptions::new().resize_alg(self.filter.to_fast_filter());

        resizer
            .resize(&src_image, &mut dst_image, Some(&options))
            .map_err(|e| ConvertError::CorruptStream(format!("fast_image_resize 执行失败：{}", e)))?;

        Ok(dst_image.into_vec())
    }
}
