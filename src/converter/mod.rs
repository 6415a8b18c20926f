//! # 图片转换模块（converter）
//!
//! ## 设计思路
//!
//! 该模块将“载入校验 → 解码 → 合成缩放 → 编码 → 会话/批处理”按职责拆分为多个子模块，
//! 每个阶段只依赖它的输入数据，便于单独测试。
//!
//! - `session`：会话状态（当前图片、尺寸选择、结果列表、批处理队列）
//! - `batch`：顺序批处理调度、条目状态、取消令牌
//! - `pipeline`：单次转换的状态机编排
//! - `decoder`：GIF 逐帧解码与单帧解码
//! - `compositor`：帧贴图与缩放
//! - `encoder`：静态 / 动画编码器及其生命周期
//! - `dimension`：输出尺寸策略
//! - `loader`：来源载入与资源上限校验
//! - `icons`：自定义图标集
//! - `config/error/source`：配置、错误、中间数据模型
//!
//! ## 新同事快速上手
//!
//! ```text
//! main.rs（命令行）
//!    ↓
//! session.rs（会话状态）
//!    ├─ pipeline.rs（Decoding → Compositing → Encoding）
//!    │    ├─ decoder.rs
//!    │    ├─ dimension.rs + compositor.rs
//!    │    └─ encoder/（static_encoder / animated）
//!    ├─ batch.rs（逐项运行 pipeline + SubjectGuard）
//!    └─ icons.rs
//!    ↓
//! 返回 AppError 给命令行
//! ```
//!
//! ## 分层职责建议
//!
//! - 策略数值变更优先改 `config.rs`
//! - 阶段顺序变更优先改 `pipeline.rs`
//! - 单阶段行为分别改 `decoder/compositor/encoder`

mod batch;
mod compositor;
mod config;
mod decoder;
mod dimension;
mod encoder;
mod error;
mod icons;
mod loader;
mod pipeline;
mod session;
mod source;

#[cfg(test)]
mod test_support;

pub use batch::{BatchCancel, BatchEvent, BatchItem, BatchScheduler, BatchStatus, BatchSummary};
pub use compositor::FrameCompositor;
pub use config::{ConvertConfig, ConvertProfile, ResizeFilter, GIF_QUALITY_RANGE};
pub use decoder::{decode_single_frame, FrameDecoder};
pub use dimension::resolve_dimensions;
pub use encoder::{
    AbortHandle, AnimatedEncoder, EncodedOutput, Encoder, EncoderConfig, FrameOptions,
    ProgressSender, StaticEncoder,
};
pub use error::{ConversionFailure, ConvertError};
pub use icons::{generate_custom_icons, IconAsset, IconSpec, CUSTOM_ICON_SET, ICON_BACKGROUND};
pub use pipeline::{ConversionPipeline, PipelineEvent, PipelineState};
pub use session::{ConversionSession, SubjectGuard};
pub use source::{
    format_file_size, output_file_name, CompositedFrame, ConversionResult, DecodedFrame,
    LivePreview, SizeSelector, SourceFile, SourceImage, TargetFormat, TargetSpec,
};
