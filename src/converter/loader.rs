//! # 载入与校验模块
//!
//! ## 设计思路
//!
//! 把“原始文件 → 可转换的源图片”集中在一处完成，并在完整解码之前做资源上限控制：
//! 1. 体积上限
//! 2. MIME 判定（声明优先，否则用 `infer` 按文件头嗅探）
//! 3. 仅读取 header 获取宽高
//! 4. 像素数 / 预计内存上限
//!
//! 完整解码推迟到流水线的解码阶段，载入本身不分配像素缓冲。

use std::io::Cursor;
use std::path::Path;

use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;

use super::source::{SourceFile, SourceImage};
use super::{ConvertConfig, ConvertError};

impl SourceFile {
    /// 读取本地文件，MIME 留空交由载入阶段嗅探。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let path = path.as_ref();
        log::info!("📁 开始读取本地图片 - 路径: {}", path.display());

        if !path.exists() {
            return Err(ConvertError::InvalidSource(format!(
                "文件不存在：{}",
                path.display()
            )));
        }

        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::new(name, None, bytes))
    }

    /// 解析 `data:image/...;base64,...` 形式的 Data URL。
    pub fn from_data_url(name: impl Into<String>, data: &str) -> Result<Self, ConvertError> {
        let rest = data
            .strip_prefix("data:")
            .filter(|rest| rest.starts_with("image/"))
            .ok_or_else(|| ConvertError::InvalidSource("无效的 Data URL 格式".to_string()))?;

        let (mime, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| ConvertError::InvalidSource("缺少 base64 标记".to_string()))?;

        let bytes = general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| ConvertError::InvalidSource(format!("Base64 解码失败：{}", e)))?;

        Ok(Self::new(name, Some(mime), bytes))
    }
}

impl SourceImage {
    /// 校验并载入一个原始文件。
    ///
    /// # 示例
    /// ```rust
    /// use image_transcoder::converter::{ConvertConfig, SourceFile, SourceImage};
    ///
    /// let file = SourceFile::new("notes.txt", Some("text/plain"), b"hello".to_vec());
    /// assert!(SourceImage::load(&file, &ConvertConfig::default()).is_err());
    /// ```
    pub fn load(file: &SourceFile, config: &ConvertConfig) -> Result<Self, ConvertError> {
        if file.bytes.len() as u64 > config.max_file_size {
            return Err(ConvertError::ResourceLimit(format!(
                "文件过大：{:.2} MB（限制：{:.2} MB）",
                file.bytes.len() as f64 / 1024.0 / 1024.0,
                config.max_file_size as f64 / 1024.0 / 1024.0
            )));
        }

        let mime_type = Self::resolve_mime_type(file)?;
        let (width, height) = Self::inspect_dimensions_from_memory(&file.bytes)?;
        if width == 0 || height == 0 {
            return Err(ConvertError::InvalidSourceDimensions { width, height });
        }
        validate_pixel_limits(config, width, height)?;
        validate_decoded_memory_limits(config, width, height)?;

        log::info!(
            "✅ 图片载入成功 - 名称: {} 类型: {} 尺寸: {}x{}",
            file.name,
            mime_type,
            width,
            height
        );

        Ok(Self {
            raw_bytes: file.bytes.clone(),
            width,
            height,
            mime_type,
            display_name: file.name.clone(),
        })
    }

    pub fn from_bytes(
        bytes: impl Into<Bytes>,
        declared_mime: Option<&str>,
        display_name: impl Into<String>,
        config: &ConvertConfig,
    ) -> Result<Self, ConvertError> {
        Self::load(&SourceFile::new(display_name, declared_mime, bytes), config)
    }

    pub fn from_data_url(
        display_name: impl Into<String>,
        data: &str,
        config: &ConvertConfig,
    ) -> Result<Self, ConvertError> {
        Self::load(&SourceFile::from_data_url(display_name, data)?, config)
    }

    pub fn from_path(path: impl AsRef<Path>, config: &ConvertConfig) -> Result<Self, ConvertError> {
        Self::load(&SourceFile::from_path(path)?, config)
    }

    fn resolve_mime_type(file: &SourceFile) -> Result<String, ConvertError> {
        let mime = match &file.mime_type {
            Some(declared) => declared.clone(),
            None => infer::get(&file.bytes)
                .map(|kind| kind.mime_type().to_string())
                .ok_or_else(|| ConvertError::InvalidSource("无法识别文件类型".to_string()))?,
        };

        if !mime.starts_with("image/") {
            return Err(ConvertError::InvalidSource(format!(
                "请上传有效的图片文件（当前类型：{}）",
                mime
            )));
        }

        Ok(mime)
    }

    /// 仅通过内存中的图片头信息读取宽高。
    fn inspect_dimensions_from_memory(bytes: &[u8]) -> Result<(u32, u32), ConvertError> {
        let reader = image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ConvertError::InvalidSource(format!("无法识别图片格式：{}", e)))?;

        if reader.format().is_none() {
            return Err(ConvertError::InvalidSource("无法识别图片格式".to_string()));
        }

        reader
            .into_dimensions()
            .map_err(|e| ConvertError::CorruptStream(format!("无法读取图片尺寸：{}", e)))
    }
}

/// 校验像素数量是否超过配置上限。
pub(crate) fn validate_pixel_limits(
    config: &ConvertConfig,
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ConvertError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels > config.max_decoded_pixels {
        return Err(ConvertError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    Ok(())
}

pub(crate) fn validate_decoded_memory_limits(
    config: &ConvertConfig,
    width: u32,
    height: u32,
) -> Result<(), ConvertError> {
    let estimated = (width as u64)
        .checked_mul(height as u64)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| ConvertError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > config.max_decoded_bytes {
        return Err(ConvertError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::converter::test_support::png_bytes;

    #[test]
    fn load_reads_header_dimensions_and_sniffs_mime() {
        let file = SourceFile::new("sample.png", None, png_bytes(40, 30));
        let source = SourceImage::load(&file, &ConvertConfig::default()).expect("load should succeed");

        assert_eq!((source.width(), source.height()), (40, 30));
        assert_eq!(source.mime_type(), "image/png");
        assert_eq!(source.display_name(), "sample.png");
        assert!((source.aspect_ratio() - 4.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn load_rejects_non_image_payload() {
        let file = SourceFile::new("notes.txt", Some("text/plain"), b"not an image".to_vec());
        let result = SourceImage::load(&file, &ConvertConfig::default());
        assert!(matches!(result, Err(ConvertError::InvalidSource(_))));
    }

    #[test]
    fn load_rejects_unreadable_image_bytes() {
        let file = SourceFile::new("broken.png", Some("image/png"), vec![0u8; 16]);
        assert!(SourceImage::load(&file, &ConvertConfig::default()).is_err());
    }

    #[test]
    fn load_enforces_pixel_limit() {
        let mut config = ConvertConfig::default();
        config.max_decoded_pixels = 100;

        let file = SourceFile::new("big.png", None, png_bytes(20, 20));
        let result = SourceImage::load(&file, &config);
        assert!(matches!(result, Err(ConvertError::ResourceLimit(_))));
    }

    #[test]
    fn load_enforces_file_size_limit() {
        let mut config = ConvertConfig::default();
        config.max_file_size = 8;

        let file = SourceFile::new("big.png", None, png_bytes(4, 4));
        let result = SourceImage::load(&file, &config);
        assert!(matches!(result, Err(ConvertError::ResourceLimit(_))));
    }

    #[test]
    fn data_url_is_decoded_with_declared_mime() {
        let encoded = general_purpose::STANDARD.encode(png_bytes(3, 2));
        let url = format!("data:image/png;base64,{}", encoded);

        let file = SourceFile::from_data_url("pasted", &url).expect("data url should parse");
        assert_eq!(file.mime_type.as_deref(), Some("image/png"));

        let source = SourceImage::load(&file, &ConvertConfig::default()).expect("load should succeed");
        assert_eq!((source.width(), source.height()), (3, 2));
    }

    #[test]
    fn data_url_rejects_missing_marker() {
        assert!(SourceFile::from_data_url("x", "data:image/png,abc").is_err());
        assert!(SourceFile::from_data_url("x", "data:text/plain;base64,aGk=").is_err());
    }

    #[test]
    fn from_bytes_keeps_declared_name() {
        let source = SourceImage::from_bytes(
            png_bytes(2, 2),
            Some("image/png"),
            "tiny.png",
            &ConvertConfig::default(),
        )
        .expect("load should succeed");
        assert_eq!(source.display_name(), "tiny.png");
        assert_eq!(source.file_size(), png_bytes(2, 2).len());
    }

    #[test]
    fn from_path_reports_missing_file() {
        let result = SourceFile::from_path("/definitely/not/here.png");
        assert!(matches!(result, Err(ConvertError::InvalidSource(_))));
    }
}
