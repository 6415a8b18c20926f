//! # 自定义图标集
//!
//! 以当前图片生成 6 个 PNG 图标：纯色（`#10b981`）方形底板，源图拉伸到居中的正方形内。
//! 普通图标四周各留 5% 边距，maskable 图标留 10%。

use std::time::Instant;

use bytes::Bytes;
use serde::Serialize;

use super::compositor::FrameCompositor;
use super::decoder::decode_single_frame;
use super::encoder::encode_still;
use super::source::{DecodedFrame, SourceImage, TargetFormat};
use super::{ConvertConfig, ConvertError};

/// 底板颜色 `#10b981`。
pub const ICON_BACKGROUND: [u8; 4] = [0x10, 0xb9, 0x81, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IconSpec {
    pub name: &'static str,
    pub size: u32,
    pub maskable: bool,
}

impl IconSpec {
    const fn new(name: &'static str, size: u32, maskable: bool) -> Self {
        Self {
            name,
            size,
            maskable,
        }
    }

    /// 单边边距（像素）。
    pub fn padding(&self) -> u32 {
        let ratio = if self.maskable { 0.1 } else { 0.05 };
        (self.size as f64 * ratio).round() as u32
    }
}

pub const CUSTOM_ICON_SET: [IconSpec; 6] = [
    IconSpec::new("custom-icon-16.png", 16, false),
    IconSpec::new("custom-icon-32.png", 32, false),
    IconSpec::new("custom-icon-192.png", 192, false),
    IconSpec::new("custom-icon-512.png", 512, false),
    IconSpec::new("custom-icon-maskable-192.png", 192, true),
    IconSpec::new("custom-icon-maskable-512.png", 512, true),
];

/// 生成的一个图标文件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IconAsset {
    pub name: String,
    pub size: u32,
    pub maskable: bool,
    #[serde(skip)]
    pub bytes: Bytes,
}

/// 以源图片生成整套自定义图标。
pub async fn generate_custom_icons(
    source: &SourceImage,
    config: &ConvertConfig,
) -> Result<Vec<IconAsset>, ConvertError> {
    let source = source.clone();
    let config = config.clone();
    let started = Instant::now();

    let icons = tokio::task::spawn_blocking(move || {
        let frame = decode_single_frame(&source, &config)?;
        let compositor = FrameCompositor::new(config.resize_filter);
        CUSTOM_ICON_SET
            .iter()
            .map(|spec| render_icon(&frame, spec, &compositor))
            .collect::<Result<Vec<_>, ConvertError>>()
    })
    .await
    .map_err(|e| ConvertError::FrameEncodeFailed {
        index: 0,
        reason: format!("图标生成线程执行失败：{}", e),
    })??;

    log::info!(
        "✅ 自定义图标生成完成 - 数量: {} 耗时: {}ms",
        icons.len(),
        started.elapsed().as_millis()
    );
    Ok(icons)
}

fn render_icon(
    frame: &DecodedFrame,
    spec: &IconSpec,
    compositor: &FrameCompositor,
) -> Result<IconAsset, ConvertError> {
    let size = spec.size;
    let padding = spec.padding();
    let inner = size.saturating_sub(padding * 2).max(1);
    let scaled = compositor.composite(frame, inner, inner)?;

    let mut canvas = ICON_BACKGROUND.repeat(size as usize * size as usize);
    for (row, src_row) in scaled.pixel_buffer.chunks_exact(inner as usize * 4).enumerate() {
        let y = row + padding as usize;
        for (col, src) in src_row.chunks_exact(4).enumerate() {
            let x = col + padding as usize;
            let offset = (y * size as usize + x) * 4;
            blend_over(&mut canvas[offset..offset + 4], src);
        }
    }

    let bytes = encode_still(TargetFormat::Png, 0, size, size, &canvas)?;
    Ok(IconAsset {
        name: spec.name.to_string(),
        size,
        maskable: spec.maskable,
        bytes: Bytes::from(bytes),
    })
}

/// 源像素按 alpha 叠加到不透明底色上。
fn blend_over(dst: &mut [u8], src: &[u8]) {
    let alpha = u16::from(src[3]);
    for channel in 0..3 {
        let blended = u16::from(src[channel]) * alpha + u16::from(dst[channel]) * (255 - alpha);
        dst[channel] = ((blended + 127) / 255) as u8;
    }
    dst[3] = 0xff;
}
