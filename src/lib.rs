//! # 图片格式转换工具 · 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 命令行 (clap，main.rs)                     │
//! │      convert ── batch ── icons   (--config / --profile)  │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<T, AppError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            库 (Rust)                              │
//! │                                                          │
//! │  ┌─ error ────── AppError (统一错误类型)                  │
//! │  │                                                       │
//! │  └─ converter ── ConversionSession                       │
//! │      ├─ pipeline     Decoding → Compositing → Encoding   │
//! │      ├─ batch        顺序批处理 + SubjectGuard (RAII)     │
//! │      ├─ encoder      PNG/JPEG/WebP 单帧 · GIF 多帧        │
//! │      └─ icons        自定义 PWA 图标集                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `AppError`，命令行各子命令的返回类型 |
//! | [`converter`] | 载入、解码、缩放、编码、批处理与图标生成 |

pub mod error;
pub mod converter;
