//! # 转换会话
//!
//! ## 设计思路
//!
//! 用一个显式的会话对象承载单图与批处理共享的状态，不使用全局变量：
//! - 当前图片槽位（单图操作的对象，批处理期间被临时替换）
//! - 每种格式的尺寸选择（每次载入新图片时全部重置为 `original`）
//! - 只追加的转换结果列表
//! - 批处理队列
//!
//! ## 实现思路
//!
//! 批处理对当前图片的临时替换通过 [`SubjectGuard`] 完成：
//! 安装时保存旧值，`Drop` 时恢复（包括 panic 展开），调用方无需手动回滚。

use std::collections::HashMap;

use tokio::sync::mpsc::UnboundedSender;

use super::batch::{BatchCancel, BatchEvent, BatchItem, BatchScheduler, BatchSummary};
use super::icons::{generate_custom_icons, IconAsset};
use super::pipeline::{ConversionPipeline, PipelineEvent};
use super::source::{
    ConversionResult, SizeSelector, SourceFile, SourceImage, TargetFormat, TargetSpec,
};
use super::{ConversionFailure, ConvertConfig, ConvertError};

/// 临时替换当前图片的 RAII 守卫。
///
/// # 示例
/// ```rust
/// use image_transcoder::converter::SubjectGuard;
///
/// let mut slot = None;
/// {
///     let _guard = SubjectGuard::vacate(&mut slot);
/// }
/// assert!(slot.is_none());
/// ```
pub struct SubjectGuard<'a> {
    slot: &'a mut Option<SourceImage>,
    previous: Option<Option<SourceImage>>,
}

impl<'a> SubjectGuard<'a> {
    /// 安装 `subject` 作为当前图片，返回的守卫在离开作用域时恢复原值。
    pub fn install(slot: &'a mut Option<SourceImage>, subject: SourceImage) -> Self {
        let previous = slot.replace(subject);
        Self {
            slot,
            previous: Some(previous),
        }
    }

    /// 临时清空当前图片。
    pub fn vacate(slot: &'a mut Option<SourceImage>) -> Self {
        let previous = slot.take();
        Self {
            slot,
            previous: Some(previous),
        }
    }

    pub fn subject(&self) -> Option<&SourceImage> {
        self.slot.as_ref()
    }
}

impl Drop for SubjectGuard<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            *self.slot = previous;
        }
    }
}

/// 单用户转换会话。
#[derive(Debug)]
pub struct ConversionSession {
    config: ConvertConfig,
    current: Option<SourceImage>,
    selected_sizes: HashMap<TargetFormat, SizeSelector>,
    results: Vec<ConversionResult>,
    batch: Vec<BatchItem>,
}

impl ConversionSession {
    pub fn new(config: ConvertConfig) -> Self {
        Self {
            config,
            current: None,
            selected_sizes: Self::default_sizes(),
            results: Vec::new(),
            batch: Vec::new(),
        }
    }

    fn default_sizes() -> HashMap<TargetFormat, SizeSelector> {
        TargetFormat::ALL
            .iter()
            .map(|format| (*format, SizeSelector::Original))
            .collect()
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// 载入新图片，替换当前图片并重置所有格式的尺寸选择。
    pub fn load(&mut self, file: &SourceFile) -> Result<&SourceImage, ConvertError> {
        let source = SourceImage::load(file, &self.config)?;
        self.selected_sizes = Self::default_sizes();
        Ok(self.current.insert(source))
    }

    pub fn current(&self) -> Option<&SourceImage> {
        self.current.as_ref()
    }

    pub fn select_size(&mut self, format: TargetFormat, selector: SizeSelector) {
        log::debug!("📐 {} 尺寸选择：{}", format, selector);
        self.selected_sizes.insert(format, selector);
    }

    pub fn selected_size(&self, format: TargetFormat) -> SizeSelector {
        self.selected_sizes
            .get(&format)
            .copied()
            .unwrap_or_default()
    }

    /// 以当前选择的尺寸把当前图片转换为 `format`，成功后追加到结果列表。
    pub async fn convert(&mut self, format: TargetFormat) -> Result<&ConversionResult, ConversionFailure> {
        self.convert_with_events(format, None).await
    }

    pub async fn convert_with_events(
        &mut self,
        format: TargetFormat,
        events: Option<UnboundedSender<PipelineEvent>>,
    ) -> Result<&ConversionResult, ConversionFailure> {
        let source = self
            .current
            .as_ref()
            .ok_or_else(|| ConversionFailure::new(format, ConvertError::NoCurrentImage))?;
        let target = TargetSpec::new(format, self.selected_size(format));

        let mut pipeline = ConversionPipeline::new(self.config.clone());
        if let Some(events) = events {
            pipeline = pipeline.with_events(events);
        }

        let result = pipeline.run(source, target).await?;
        let index = self.results.len();
        self.results.push(result);
        Ok(&self.results[index])
    }

    pub fn results(&self) -> &[ConversionResult] {
        &self.results
    }

    /// 第 `index` 个结果的下载文件名。
    pub fn download_name(&self, index: usize) -> Option<String> {
        self.results.get(index).map(ConversionResult::file_name)
    }

    /// 用给定文件替换批处理队列，只保留图片文件。返回入队数量。
    pub fn load_batch(&mut self, files: Vec<SourceFile>) -> Result<usize, ConvertError> {
        let total = files.len();
        let items: Vec<BatchItem> = files
            .into_iter()
            .filter(SourceFile::is_image)
            .map(BatchItem::new)
            .collect();

        if items.is_empty() {
            return Err(ConvertError::NoValidFilesInBatch);
        }

        log::info!("📥 批处理队列已更新 - 有效: {} / {}", items.len(), total);
        self.batch = items;
        Ok(self.batch.len())
    }

    pub fn batch_items(&self) -> &[BatchItem] {
        &self.batch
    }

    pub async fn process_batch(
        &mut self,
        format: TargetFormat,
        selector: SizeSelector,
    ) -> Result<BatchSummary, ConvertError> {
        self.process_batch_with(format, selector, None, &BatchCancel::new())
            .await
    }

    /// 顺序处理批处理队列，当前图片在运行前后保持不变。
    pub async fn process_batch_with(
        &mut self,
        format: TargetFormat,
        selector: SizeSelector,
        events: Option<&UnboundedSender<BatchEvent>>,
        cancel: &BatchCancel,
    ) -> Result<BatchSummary, ConvertError> {
        if self.batch.is_empty() {
            return Err(ConvertError::NoValidFilesInBatch);
        }

        let scheduler = BatchScheduler::new(&self.config);
        Ok(scheduler
            .run(
                &mut self.batch,
                &mut self.current,
                TargetSpec::new(format, selector),
                events,
                cancel,
            )
            .await)
    }

    /// 以当前图片生成自定义图标集。
    pub async fn generate_custom_icons(&self) -> Result<Vec<IconAsset>, ConvertError> {
        let source = self.current.as_ref().ok_or(ConvertError::NoCurrentImage)?;
        generate_custom_icons(source, &self.config).await
    }
}
