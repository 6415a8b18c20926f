//! # 批处理调度
//!
//! ## 设计思路
//!
//! 严格按队列顺序逐个转换，同一时刻只有一张图片（及其帧）驻留内存。
//! 单项失败只记录在该项上，不会中断后续队列。
//!
//! ## 实现思路
//!
//! 对每一项：
//! 1. 标记为 `Processing`
//! 2. 载入源文件，并通过 [`SubjectGuard`] 临时替换会话的当前图片
//! 3. 在独立的 tokio 任务中运行流水线，panic 以 `JoinError` 的形式记为 `Error`
//! 4. 成功记为 `Completed` 并保留结果，失败记为 `Error`
//! 5. 上报总进度 `(index + 1) / N`
//!
//! 守卫在每一项结束时（包括提前返回）恢复原来的当前图片。
//! 条目状态只由调度器写入。每次运行开始时整个队列重置为 `Ready`
//! （清空上一次的结果与错误），运行期间状态只能单向推进。

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::encoder::AbortHandle;
use super::pipeline::ConversionPipeline;
use super::session::SubjectGuard;
use super::source::{ConversionResult, SourceFile, SourceImage, TargetSpec};
use super::{ConvertConfig, ConvertError};

/// 批处理条目状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Ready,
    Processing,
    Completed,
    Error,
}

impl BatchStatus {
    fn can_advance_to(self, next: BatchStatus) -> bool {
        matches!(
            (self, next),
            (Self::Ready, Self::Processing)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Error)
        )
    }
}

/// 队列中的一个文件。
#[derive(Debug, Clone)]
pub struct BatchItem {
    file: SourceFile,
    status: BatchStatus,
    result: Option<ConversionResult>,
    error: Option<String>,
}

impl BatchItem {
    pub fn new(file: SourceFile) -> Self {
        Self {
            file,
            status: BatchStatus::Ready,
            result: None,
            error: None,
        }
    }

    pub fn file(&self) -> &SourceFile {
        &self.file
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn result(&self) -> Option<&ConversionResult> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 已完成条目的下载文件名。
    pub fn download_name(&self) -> Option<String> {
        self.result.as_ref().map(ConversionResult::file_name)
    }

    fn reset(&mut self) {
        self.status = BatchStatus::Ready;
        self.result = None;
        self.error = None;
    }

    fn advance(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_advance_to(next) {
            log::warn!(
                "⚠️ 忽略非法的批处理状态变更：{} {:?} -> {:?}",
                self.file.name,
                self.status,
                next
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// 批处理事件。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    ItemStatus {
        index: usize,
        status: BatchStatus,
        error: Option<String>,
    },
    Progress {
        processed: usize,
        total: usize,
        fraction: f32,
    },
    Finished(BatchSummary),
}

/// 批处理汇总。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
}

/// 批处理取消令牌。
///
/// 每项开始前检查；同时传入正在运行的流水线，使当前编码尽快以 `Aborted` 结束。
#[derive(Debug, Clone, Default)]
pub struct BatchCancel {
    handle: AbortHandle,
}

impl BatchCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }

    pub(crate) fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }
}

/// 批处理调度器。
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    config: ConvertConfig,
    #[cfg(test)]
    panic_on: Option<String>,
}

impl BatchScheduler {
    /// 批处理使用独立的 JPEG 质量与 GIF 线程数。
    pub fn new(config: &ConvertConfig) -> Self {
        let mut config = config.clone();
        config.jpeg_quality = config.batch_jpeg_quality;
        config.gif_workers = config.batch_gif_workers;
        Self {
            config,
            #[cfg(test)]
            panic_on: None,
        }
    }

    /// 让名为 `name` 的条目在流水线任务内 panic。
    #[cfg(test)]
    fn panic_on(mut self, name: &str) -> Self {
        self.panic_on = Some(name.to_string());
        self
    }

    /// 顺序处理 `items`，返回汇总。`subject` 为会话的当前图片槽位，运行前后保持不变。
    pub async fn run(
        &self,
        items: &mut [BatchItem],
        subject: &mut Option<SourceImage>,
        target: TargetSpec,
        events: Option<&UnboundedSender<BatchEvent>>,
        cancel: &BatchCancel,
    ) -> BatchSummary {
        let total = items.len();
        let mut summary = BatchSummary {
            total,
            completed: 0,
            failed: 0,
            cancelled: false,
        };

        log::info!(
            "📦 开始批处理 - 数量: {} 目标: {} 尺寸: {}",
            total,
            target.format,
            target.size_selector
        );

        items.iter_mut().for_each(BatchItem::reset);

        for (index, item) in items.iter_mut().enumerate() {
            if cancel.is_cancelled() {
                log::info!("🛑 批处理已取消，剩余 {} 项保持就绪", total - index);
                break;
            }

            Self::set_status(item, index, BatchStatus::Processing, events);

            match self.process_item(item, subject, target, cancel).await {
                Ok(result) => {
                    log::info!(
                        "✅ 批处理第 {} 项完成 - {} ({} bytes)",
                        index + 1,
                        item.file.name,
                        result.byte_length
                    );
                    item.result = Some(result);
                    summary.completed += 1;
                    Self::set_status(item, index, BatchStatus::Completed, events);
                }
                Err(message) => {
                    log::warn!(
                        "⚠️ 批处理第 {} 项失败 - {}：{}",
                        index + 1,
                        item.file.name,
                        message
                    );
                    item.error = Some(message);
                    summary.failed += 1;
                    Self::set_status(item, index, BatchStatus::Error, events);
                }
            }

            emit(
                events,
                BatchEvent::Progress {
                    processed: index + 1,
                    total,
                    fraction: (index + 1) as f32 / total as f32,
                },
            );
        }

        summary.cancelled = cancel.is_cancelled();

        log::info!(
            "📦 批处理结束 - 完成: {} 失败: {} 取消: {}",
            summary.completed,
            summary.failed,
            summary.cancelled
        );
        emit(events, BatchEvent::Finished(summary));
        summary
    }

    async fn process_item(
        &self,
        item: &BatchItem,
        subject: &mut Option<SourceImage>,
        target: TargetSpec,
        cancel: &BatchCancel,
    ) -> Result<ConversionResult, String> {
        let source = SourceImage::load(&item.file, &self.config).map_err(|e| e.to_string())?;

        let guard = SubjectGuard::install(subject, source);
        let source = guard
            .subject()
            .cloned()
            .ok_or_else(|| ConvertError::NoCurrentImage.to_string())?;

        let pipeline = ConversionPipeline::new(self.config.clone())
            .with_abort_handle(cancel.abort_handle());
        #[cfg(test)]
        let panic_on = self.panic_on.clone();
        let task = tokio::spawn(async move {
            #[cfg(test)]
            panic_if_requested(panic_on.as_deref(), source.display_name());
            pipeline.run(&source, target).await
        });

        let outcome = match task.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(failure)) => Err(failure.to_string()),
            Err(join_error) => Err(format!("转换任务异常退出：{}", join_error)),
        };

        drop(guard);
        outcome
    }

    fn set_status(
        item: &mut BatchItem,
        index: usize,
        status: BatchStatus,
        events: Option<&UnboundedSender<BatchEvent>>,
    ) {
        if item.advance(status) {
            emit(
                events,
                BatchEvent::ItemStatus {
                    index,
                    status,
                    error: item.error.clone(),
                },
            );
        }
    }
}

#[cfg(test)]
fn panic_if_requested(panic_on: Option<&str>, name: &str) {
    if panic_on == Some(name) {
        panic!("模拟流水线崩溃：{}", name);
    }
}

fn emit(events: Option<&UnboundedSender<BatchEvent>>, event: BatchEvent) {
    if let Some(events) = events {
        let _ = events.send(event);
    }
}
