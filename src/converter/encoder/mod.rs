//! # 编码器模块
//!
//! ## 设计思路
//!
//! 两种编码器共用同一套生命周期：
//! - `begin(config, abort)`：校验输出尺寸与质量参数，失败即 `EncoderInitFailed`
//! - `feed(frame, options)`：静态编码器只接受一帧，动画编码器接受任意多帧
//! - `finish(progress)`：异步完成编码，进度通过 mpsc 通道以 `[0,1]` 的比例上报
//! - `abort()`：通过 [`AbortHandle`] 取消，幂等；已发起的 `finish` 一律返回 `Aborted`
//!
//! ## 实现思路
//!
//! CPU 密集的编码放到 `tokio::task::spawn_blocking` 中执行，避免阻塞异步运行时。
//! 阻塞任务返回后再检查一次取消标志，保证取消之后不会再交付成功结果。

mod animated;
mod static_encoder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedSender;

pub use animated::AnimatedEncoder;
pub(crate) use static_encoder::encode_still;
pub use static_encoder::StaticEncoder;

use super::source::{CompositedFrame, TargetFormat};
use super::ConvertError;

/// 编码进度发送端，数值为 `[0,1]` 的完成比例。
pub type ProgressSender = UnboundedSender<f32>;

/// 取消令牌，克隆后共享同一个标志。
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// 发出取消信号。重复调用或在编码完成后调用均无副作用。
    pub fn abort(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            log::debug!("🛑 已请求取消编码");
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<(), ConvertError> {
        if self.is_aborted() {
            Err(ConvertError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// 编码器初始化参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    pub format: TargetFormat,
    pub output_width: u32,
    pub output_height: u32,
    /// JPEG / WebP 为 0-100 的用户质量；GIF 为 1-30 的量化等级；PNG 忽略。
    pub quality: u8,
    /// 动画编码的量化线程数。
    pub workers: usize,
}

/// 每帧附带的编码参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub delay_ms: u32,
}

/// 编码产物。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedOutput {
    pub bytes: Bytes,
    /// 因数据异常被跳过的帧序号（仅动画编码会出现）。
    pub skipped_frames: Vec<usize>,
}

/// 按目标格式分派的编码器。
#[derive(Debug)]
pub enum Encoder {
    Static(StaticEncoder),
    Animated(AnimatedEncoder),
}

impl Encoder {
    /// GIF 目标使用动画编码器（单帧也输出合法 GIF），其余格式使用静态编码器。
    pub fn begin(config: EncoderConfig, abort: AbortHandle) -> Result<Self, ConvertError> {
        match config.format {
            TargetFormat::Gif => AnimatedEncoder::begin(config, abort).map(Self::Animated),
            _ => StaticEncoder::begin(config, abort).map(Self::Static),
        }
    }

    pub fn feed(&mut self, frame: CompositedFrame, options: FrameOptions) -> Result<(), ConvertError> {
        match self {
            Self::Static(encoder) => encoder.feed(frame, options),
            Self::Animated(encoder) => encoder.feed(frame, options),
        }
    }

    /// 上游无法产出某一帧时调用：动画编码器记录并跳过，静态编码器直接失败。
    pub fn reject_frame(&mut self, error: ConvertError) -> Result<(), ConvertError> {
        match self {
            Self::Static(_) => Err(error),
            Self::Animated(encoder) => {
                encoder.skip(&error);
                Ok(())
            }
        }
    }

    pub fn abort(&self) {
        match self {
            Self::Static(encoder) => encoder.abort(),
            Self::Animated(encoder) => encoder.abort(),
        }
    }

    pub async fn finish(self, progress: Option<ProgressSender>) -> Result<EncodedOutput, ConvertError> {
        match self {
            Self::Static(encoder) => encoder.finish(progress).await,
            Self::Animated(encoder) => encoder.finish(progress).await,
        }
    }
}

pub(crate) fn report_progress(progress: Option<&ProgressSender>, fraction: f32) {
    if let Some(sender) = progress {
        // 接收端已关闭时忽略
        let _ = sender.send(fraction.clamp(0.0, 1.0));
    }
}

/// 校验帧尺寸与缓冲长度是否与编码器配置一致。
pub(crate) fn validate_frame(
    frame: &CompositedFrame,
    config: &EncoderConfig,
    index: usize,
) -> Result<(), ConvertError> {
    if (frame.width, frame.height) != (config.output_width, config.output_height) {
        return Err(ConvertError::FrameEncodeFailed {
            index,
            reason: format!(
                "帧尺寸 {}x{} 与输出尺寸 {}x{} 不一致",
                frame.width, frame.height, config.output_width, config.output_height
            ),
        });
    }

    if frame.expected_len() != Some(frame.pixel_buffer.len()) {
        return Err(ConvertError::FrameEncodeFailed {
            index,
            reason: format!("像素缓冲长度异常：{}", frame.pixel_buffer.len()),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_handle_is_shared_and_idempotent() {
        let handle = AbortHandle::new();
        let clone = handle.clone();
        assert!(!clone.is_aborted());

        handle.abort();
        handle.abort();
        assert!(clone.is_aborted());
        assert!(matches!(clone.check(), Err(ConvertError::Aborted)));
    }

    #[test]
    fn format_selects_encoder_variant() {
        let config = EncoderConfig {
            format: TargetFormat::Gif,
            output_width: 4,
            output_height: 4,
            quality: 10,
            workers: 1,
        };
        let encoder = Encoder::begin(config, AbortHandle::new()).expect("begin gif");
        assert!(matches!(encoder, Encoder::Animated(_)));

        let config = EncoderConfig {
            format: TargetFormat::Png,
            ..config
        };
        let encoder = Encoder::begin(config, AbortHandle::new()).expect("begin png");
        assert!(matches!(encoder, Encoder::Static(_)));
    }

    #[test]
    fn static_encoder_propagates_rejected_frame() {
        let config = EncoderConfig {
            format: TargetFormat::Png,
            output_width: 4,
            output_height: 4,
            quality: 0,
            workers: 1,
        };
        let mut encoder = Encoder::begin(config, AbortHandle::new()).expect("begin png");
        let result = encoder.reject_frame(ConvertError::CorruptStream("bad".to_string()));
        assert!(matches!(result, Err(ConvertError::CorruptStream(_))));
    }
}
