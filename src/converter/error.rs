//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载转换链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! 流水线对外只暴露一种失败：[`ConversionFailure`]，它携带目标格式，
//! 用于生成“转换为 XXX 失败”的用户提示。

use super::source::TargetFormat;

/// 转换链路统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("尺寸选择无效：{0}")]
    InvalidSizeSelector(String),

    #[error("源图尺寸无效：{width}x{height}")]
    InvalidSourceDimensions { width: u32, height: u32 },

    #[error("不支持的动画容器：{0}")]
    UnsupportedContainer(String),

    #[error("数据流损坏：{0}")]
    CorruptStream(String),

    #[error("编码器初始化失败：{0}")]
    EncoderInitFailed(String),

    /// 单帧数据异常。动画编码时仅跳过该帧，静态编码时终止整次操作。
    #[error("第 {index} 帧编码失败：{reason}")]
    FrameEncodeFailed { index: usize, reason: String },

    #[error("静态编码器只接受一帧")]
    SingleFrameEncoderMisuse,

    #[error("编码已中止")]
    Aborted,

    #[error("请先载入一张图片")]
    NoCurrentImage,

    #[error("没有可处理的图片文件")]
    NoValidFilesInBatch,

    #[error("输入无效：{0}")]
    InvalidSource(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("文件错误：{0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// 稳定的错误码，供 CLI 报告与日志检索使用。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSizeSelector(_) => "E_INVALID_SIZE_SELECTOR",
            Self::InvalidSourceDimensions { .. } => "E_INVALID_SOURCE_DIMENSIONS",
            Self::UnsupportedContainer(_) => "E_UNSUPPORTED_CONTAINER",
            Self::CorruptStream(_) => "E_CORRUPT_STREAM",
            Self::EncoderInitFailed(_) => "E_ENCODER_INIT",
            Self::FrameEncodeFailed { .. } => "E_FRAME_ENCODE",
            Self::SingleFrameEncoderMisuse => "E_SINGLE_FRAME_MISUSE",
            Self::Aborted => "E_ABORTED",
            Self::NoCurrentImage => "E_NO_CURRENT_IMAGE",
            Self::NoValidFilesInBatch => "E_NO_VALID_FILES",
            Self::InvalidSource(_) => "E_INVALID_SOURCE",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Io(_) => "E_IO",
        }
    }

    /// 错误发生的阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::InvalidSource(_) | Self::ResourceLimit(_) | Self::Io(_) => "load",
            Self::InvalidSizeSelector(_) | Self::InvalidSourceDimensions { .. } => "dimension",
            Self::UnsupportedContainer(_) | Self::CorruptStream(_) => "decode",
            Self::EncoderInitFailed(_)
            | Self::FrameEncodeFailed { .. }
            | Self::SingleFrameEncoderMisuse
            | Self::Aborted => "encode",
            Self::NoValidFilesInBatch => "batch",
            Self::NoCurrentImage => "session",
        }
    }
}

/// 一次流水线运行的最终失败，消息中带有目标格式。
#[derive(Debug, thiserror::Error)]
#[error("转换为 {format} 失败：{error}")]
pub struct ConversionFailure {
    pub format: TargetFormat,
    #[source]
    pub error: ConvertError,
}

impl ConversionFailure {
    pub fn new(format: TargetFormat, error: ConvertError) -> Self {
        Self { format, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_stages_are_stable() {
        let err = ConvertError::CorruptStream("eof".to_string());
        assert_eq!(err.code(), "E_CORRUPT_STREAM");
        assert_eq!(err.stage(), "decode");

        let err = ConvertError::FrameEncodeFailed {
            index: 3,
            reason: "bad length".to_string(),
        };
        assert_eq!(err.stage(), "encode");
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn failure_message_names_target_format() {
        let failure = ConversionFailure::new(TargetFormat::Gif, ConvertError::Aborted);
        let message = failure.to_string();
        assert!(message.contains("GIF"));
        assert!(message.contains("中止"));
    }
}
