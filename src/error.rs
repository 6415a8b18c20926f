//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，命令行各子命令统一返回 `Result<T, AppError>`。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `ConvertError` / `ConversionFailure` 提供 `From` 转换，无需手动 map。
//! - 实现 `Serialize` 将错误序列化为字符串，便于写入 JSON 报告。

use serde::Serialize;

use crate::converter::{ConversionFailure, ConvertError};

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 载入、尺寸、会话等转换链路错误
    #[error("{0}")]
    Convert(#[from] ConvertError),

    /// 单次转换失败（消息中带目标格式）
    #[error("{0}")]
    Conversion(#[from] ConversionFailure),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件或命令行参数无效
    #[error("配置无效: {0}")]
    Config(String),
}

impl AppError {
    /// 稳定错误码，便于脚本判断失败类型。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Convert(err) => err.code(),
            Self::Conversion(failure) => failure.error.code(),
            Self::Io(_) => "E_IO",
            Self::Config(_) => "E_CONFIG",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
