//! # 数据源与中间模型
//!
//! ## 设计思路
//!
//! 将“外部输入”和“流水线中间结果”解耦：
//! - `SourceImage` 表示已载入、不可变的源图片
//! - `TargetSpec` 表示一次转换请求的（格式，尺寸）
//! - `DecodedFrame` / `CompositedFrame` 为解码与合成阶段的产物
//! - `ConversionResult` 为最终结果，写入会话的结果日志后不再修改

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::ConvertError;

/// 支持的目标格式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetFormat {
    Png,
    Jpeg,
    Webp,
    Gif,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 4] = [Self::Png, Self::Jpeg, Self::Webp, Self::Gif];

    /// 输出文件扩展名（与格式名一致，JPEG 输出为 `.jpeg`）。
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Gif => "image/gif",
        }
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.extension().to_ascii_uppercase())
    }
}

impl FromStr for TargetFormat {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            other => Err(ConvertError::InvalidSource(format!(
                "未知目标格式：{}（可选：png / jpeg / webp / gif）",
                other
            ))),
        }
    }
}

/// 尺寸选择：保持原尺寸，或给出一个 `宽x高` 的目标框。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SizeSelector {
    #[default]
    Original,
    Box { width: u32, height: u32 },
}

impl FromStr for SizeSelector {
    type Err = ConvertError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("original") {
            return Ok(Self::Original);
        }

        let invalid = || ConvertError::InvalidSizeSelector(value.to_string());
        let (width, height) = value
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }

        Ok(Self::Box { width, height })
    }
}

impl fmt::Display for SizeSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Original => f.write_str("original"),
            Self::Box { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl TryFrom<String> for SizeSelector {
    type Error = ConvertError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SizeSelector> for String {
    fn from(selector: SizeSelector) -> Self {
        selector.to_string()
    }
}

/// 一次转换请求的目标。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub format: TargetFormat,
    pub size_selector: SizeSelector,
}

impl TargetSpec {
    pub fn new(format: TargetFormat, size_selector: SizeSelector) -> Self {
        Self {
            format,
            size_selector,
        }
    }
}

/// 用户提供的原始文件（上传 / 拖放 / 命令行路径），尚未解码。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    /// 声明的 MIME；为空时在载入阶段按文件头嗅探。
    pub mime_type: Option<String>,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, mime_type: Option<&str>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type
                .map(str::trim)
                .filter(|mime| !mime.is_empty())
                .map(str::to_ascii_lowercase),
            bytes: bytes.into(),
        }
    }

    /// 声明类型或嗅探类型是否为 `image/*`。
    pub fn is_image(&self) -> bool {
        match &self.mime_type {
            Some(mime) => mime.starts_with("image/"),
            None => infer::get(&self.bytes)
                .map(|kind| kind.matcher_type() == infer::MatcherType::Image)
                .unwrap_or(false),
        }
    }
}

/// 已载入的源图片，载入后不可变。
///
/// 原始字节使用 `Bytes` 保存，批处理临时替换当前图片时只做引用计数克隆。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub(crate) raw_bytes: Bytes,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) mime_type: String,
    pub(crate) display_name: String,
}

impl SourceImage {
    pub fn raw_bytes(&self) -> &Bytes {
        &self.raw_bytes
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn file_size(&self) -> usize {
        self.raw_bytes.len()
    }

    /// 宽高比（宽 / 高）。
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    /// 源是否为可逐帧解码的动画容器。
    pub fn is_animated_container(&self) -> bool {
        self.mime_type == "image/gif"
    }
}

/// 解码出的一帧：像素块、所在画布位置与显示时长。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
    /// 帧声明所在的逻辑画布尺寸。
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// RGBA 像素（`width * height * 4`）。
    pub pixel_patch: Vec<u8>,
    pub delay_ms: u32,
}

/// 已缩放到输出尺寸的一帧，由消费它的编码器独占。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositedFrame {
    pub width: u32,
    pub height: u32,
    /// RGBA 像素（`width * height * 4`）。
    pub pixel_buffer: Vec<u8>,
}

impl CompositedFrame {
    pub(crate) fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
    }
}

/// 编码完成前发布的首帧预览。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePreview {
    pub format: TargetFormat,
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// 转换结果，只在编码成功后创建。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    /// 源图片的显示名称，用于生成下载文件名。
    pub source_name: String,
    pub format: TargetFormat,
    pub size_selector: SizeSelector,
    pub width: u32,
    pub height: u32,
    pub frame_count: usize,
    /// 动画编码时被跳过的帧序号。
    pub skipped_frames: Vec<usize>,
    #[serde(skip)]
    pub blob: Bytes,
    pub byte_length: usize,
}

impl ConversionResult {
    pub fn file_name(&self) -> String {
        output_file_name(&self.source_name, self.format)
    }
}

/// 下载文件名：去掉原扩展名，换成目标格式扩展名。
///
/// # 示例
/// ```rust
/// use image_transcoder::converter::{output_file_name, TargetFormat};
///
/// assert_eq!(output_file_name("cat.photo.png", TargetFormat::Webp), "cat.photo.webp");
/// assert_eq!(output_file_name("README", TargetFormat::Gif), "README.gif");
/// ```
pub fn output_file_name(display_name: &str, format: TargetFormat) -> String {
    let stem = match display_name.rsplit_once('.') {
        Some((stem, ext)) if !ext.is_empty() && !ext.contains('/') => stem,
        _ => display_name,
    };
    format!("{}.{}", stem, format.extension())
}

/// 人类可读的文件大小（1024 进制，最多两位小数）。
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut unit = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let rounded = format!("{:.2}", value);
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}
