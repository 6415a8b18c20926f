//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ConvertConfig`，保证运行时行为可观测、可调整、可测试。
//! 其中性能档位（quality / balanced / speed）作为高层语义，映射到缩放滤镜与 GIF 量化等级。
//!
//! ## 实现思路
//!
//! - `Default` 提供默认策略值（最小帧时长 50ms、WebP 质量 0.85 等）。
//! - `ConvertProfile` 负责档位字符串解析与反向输出。
//! - `apply_profile` 将档位转换为具体参数，`infer_profile` 从参数反推档位。
//! - 配置可由 JSON 文件载入（`serde`），缺省字段回落到默认值。

use std::path::Path;

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::ConvertError;

/// GIF 量化等级的合法范围（越低越保真、越慢）。
pub const GIF_QUALITY_RANGE: std::ops::RangeInclusive<u8> = 1..=30;

/// 缩放滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResizeFilter {
    Nearest,
    Bilinear,
    CatmullRom,
    Mitchell,
    Lanczos3,
}

impl ResizeFilter {
    pub(crate) fn to_fast_filter(self) -> fr::ResizeAlg {
        match self {
            Self::Nearest => fr::ResizeAlg::Nearest,
            Self::Bilinear => fr::ResizeAlg::Convolution(fr::FilterType::Bilinear),
            Self::CatmullRom => fr::ResizeAlg::Convolution(fr::FilterType::CatmullRom),
            Self::Mitchell => fr::ResizeAlg::Convolution(fr::FilterType::Mitchell),
            Self::Lanczos3 => fr::ResizeAlg::Convolution(fr::FilterType::Lanczos3),
        }
    }

    /// `fast_image_resize` 失败时回退到 `image::imageops` 使用的滤镜。
    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Mitchell => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 转换配置。
///
/// 字段覆盖载入、解码、合成与编码四个阶段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// 载入时允许的最大文件体积（字节）。
    pub max_file_size: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 帧时长下限（毫秒），解码时生效。
    pub min_frame_delay_ms: u32,
    /// 帧未声明时长时使用的默认值（毫秒）。
    pub default_frame_delay_ms: u32,
    /// 单图 JPEG 质量（0~100）。
    pub jpeg_quality: u8,
    /// 批处理 JPEG 质量（0~100）。
    pub batch_jpeg_quality: u8,
    /// WebP 固定质量（0~100）。
    pub webp_quality: u8,
    /// GIF 量化等级（1~30，越低越保真）。
    pub gif_quantize_quality: u8,
    /// 单图 GIF 编码的辅助线程数。
    pub gif_workers: usize,
    /// 批处理 GIF 编码的辅助线程数。
    pub batch_gif_workers: usize,
    /// 合成阶段的缩放滤镜。
    pub resize_filter: ResizeFilter,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            max_file_size: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 512 * 1024 * 1024,
            min_frame_delay_ms: 50,
            default_frame_delay_ms: 100,
            jpeg_quality: 92,
            batch_jpeg_quality: 85,
            webp_quality: 85,
            gif_quantize_quality: 10,
            gif_workers: 2,
            batch_gif_workers: 1,
            resize_filter: ResizeFilter::Bilinear,
        }
    }
}

/// 转换性能档位（面向用户语义）。
///
/// - `Quality`：尽量保真
/// - `Balanced`：质量与性能平衡
/// - `Speed`：优先处理速度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertProfile {
    Quality,
    Balanced,
    Speed,
}

impl ConvertProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust
    /// use image_transcoder::converter::ConvertProfile;
    ///
    /// let p = ConvertProfile::from_str("balanced")?;
    /// assert_eq!(p.as_str(), "balanced");
    /// # Ok::<(), image_transcoder::converter::ConvertError>(())
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(profile: &str) -> Result<Self, ConvertError> {
        match profile.trim().to_lowercase().as_str() {
            "quality" => Ok(Self::Quality),
            "balanced" => Ok(Self::Balanced),
            "speed" => Ok(Self::Speed),
            other => Err(ConvertError::InvalidSource(format!(
                "未知性能档位：{}（可选：quality / balanced / speed）",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Balanced => "balanced",
            Self::Speed => "speed",
        }
    }
}

impl ConvertConfig {
    /// 从 JSON 文件载入配置，缺省字段使用默认值。
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConvertError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ConvertError::InvalidSource(format!("解析配置文件失败：{}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围。
    pub fn validate(&self) -> Result<(), ConvertError> {
        if !GIF_QUALITY_RANGE.contains(&self.gif_quantize_quality) {
            return Err(ConvertError::InvalidSource(format!(
                "gif_quantize_quality 必须在 {}~{} 之间",
                GIF_QUALITY_RANGE.start(),
                GIF_QUALITY_RANGE.end()
            )));
        }
        for (name, value) in [
            ("jpeg_quality", self.jpeg_quality),
            ("batch_jpeg_quality", self.batch_jpeg_quality),
            ("webp_quality", self.webp_quality),
        ] {
            if value > 100 {
                return Err(ConvertError::InvalidSource(format!("{} 必须在 0~100 之间", name)));
            }
        }
        if self.gif_workers == 0 || self.batch_gif_workers == 0 {
            return Err(ConvertError::InvalidSource("GIF 编码线程数不能为 0".to_string()));
        }
        if self.min_frame_delay_ms == 0 {
            return Err(ConvertError::InvalidSource("min_frame_delay_ms 不能为 0".to_string()));
        }
        Ok(())
    }

    /// 基于当前参数反推性能档位。
    pub fn infer_profile(&self) -> ConvertProfile {
        match (self.resize_filter, self.gif_quantize_quality) {
            (ResizeFilter::Lanczos3 | ResizeFilter::CatmullRom, q) if q <= 5 => {
                ConvertProfile::Quality
            }
            (ResizeFilter::Nearest, _) => ConvertProfile::Speed,
            (_, q) if q >= 20 => ConvertProfile::Speed,
            _ => ConvertProfile::Balanced,
        }
    }

    /// 应用指定性能档位到实际参数。
    pub fn apply_profile(&mut self, profile: ConvertProfile) {
        match profile {
            ConvertProfile::Quality => {
                self.resize_filter = ResizeFilter::Lanczos3;
                self.gif_quantize_quality = 1;
            }
            ConvertProfile::Balanced => {
                self.resize_filter = ResizeFilter::Bilinear;
                self.gif_quantize_quality = 10;
            }
            ConvertProfile::Speed => {
                self.resize_filter = ResizeFilter::Nearest;
                self.gif_quantize_quality = 30;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_balanced() {
        let config = ConvertConfig::default();
        config.validate().expect("default config should be valid");
        assert_eq!(config.infer_profile(), ConvertProfile::Balanced);
    }

    #[test]
    fn profiles_roundtrip_through_inference() {
        for profile in [
            ConvertProfile::Quality,
            ConvertProfile::Balanced,
            ConvertProfile::Speed,
        ] {
            let mut config = ConvertConfig::default();
            config.apply_profile(profile);
            assert_eq!(config.infer_profile(), profile);
            assert_eq!(ConvertProfile::from_str(profile.as_str()).unwrap(), profile);
        }
    }

    #[test]
    fn rejects_unknown_profile() {
        assert!(matches!(
            ConvertProfile::from_str("ultra"),
            Err(ConvertError::InvalidSource(_))
        ));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: ConvertConfig =
            serde_json::from_str(r#"{"jpeg_quality": 70, "resize_filter": "lanczos3"}"#)
                .expect("partial config should parse");
        assert_eq!(config.jpeg_quality, 70);
        assert_eq!(config.resize_filter, ResizeFilter::Lanczos3);
        assert_eq!(config.min_frame_delay_ms, 50);
    }

    #[test]
    fn validate_rejects_out_of_range_values() {
        let mut config = ConvertConfig::default();
        config.gif_quantize_quality = 0;
        assert!(config.validate().is_err());

        let mut config = ConvertConfig::default();
        config.webp_quality = 101;
        assert!(config.validate().is_err());

        let mut config = ConvertConfig::default();
        config.gif_workers = 0;
        assert!(config.validate().is_err());
    }
}
