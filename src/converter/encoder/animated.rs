//! 多帧 GIF 编码。
//!
//! 颜色量化是最耗时的部分，交给 `rayon` 线程池并行处理（线程数 = `workers`），
//! 结果按输入顺序收集后再由 `gif` crate 顺序写出。输出无限循环播放。
//!
//! 单帧数据异常时记录警告并跳过该帧，其余帧照常编码。

use std::sync::Mutex;
use std::time::Instant;

use bytes::Bytes;
use rayon::prelude::*;

use super::{
    report_progress, validate_frame, AbortHandle, EncodedOutput, EncoderConfig, FrameOptions,
    ProgressSender,
};
use crate::converter::config::GIF_QUALITY_RANGE;
use crate::converter::source::CompositedFrame;
use crate::converter::ConvertError;

/// 量化阶段占总进度的比例，剩余部分留给写出阶段。
const QUANTIZE_PROGRESS_SHARE: f32 = 0.9;

#[derive(Debug)]
struct PendingFrame {
    index: usize,
    frame: CompositedFrame,
    delay_ms: u32,
}

/// 动画编码器。
#[derive(Debug)]
pub struct AnimatedEncoder {
    config: EncoderConfig,
    width: u16,
    height: u16,
    abort: AbortHandle,
    frames: Vec<PendingFrame>,
    skipped: Vec<usize>,
    next_index: usize,
}

impl AnimatedEncoder {
    pub fn begin(config: EncoderConfig, abort: AbortHandle) -> Result<Self, ConvertError> {
        let width = u16::try_from(config.output_width).ok().filter(|w| *w > 0);
        let height = u16::try_from(config.output_height).ok().filter(|h| *h > 0);
        let (Some(width), Some(height)) = (width, height) else {
            return Err(ConvertError::EncoderInitFailed(format!(
                "GIF 输出尺寸无效：{}x{}（1-{}）",
                config.output_width,
                config.output_height,
                u16::MAX
            )));
        };

        if !GIF_QUALITY_RANGE.contains(&config.quality) {
            return Err(ConvertError::EncoderInitFailed(format!(
                "GIF 量化等级超出范围：{}（{}-{}）",
                config.quality,
                GIF_QUALITY_RANGE.start(),
                GIF_QUALITY_RANGE.end()
            )));
        }

        Ok(Self {
            config,
            width,
            height,
            abort,
            frames: Vec::new(),
            skipped: Vec::new(),
            next_index: 0,
        })
    }

    /// 追加一帧。异常帧只记录，不会让整个编码失败。
    pub fn feed(&mut self, frame: CompositedFrame, options: FrameOptions) -> Result<(), ConvertError> {
        let index = self.next_index;
        self.next_index += 1;

        if let Err(err) = validate_frame(&frame, &self.config, index) {
            self.record_skip(index, &err);
            return Ok(());
        }

        self.frames.push(PendingFrame {
            index,
            frame,
            delay_ms: options.delay_ms,
        });
        Ok(())
    }

    /// 上游无法产出当前序号的帧时占位并跳过。
    pub fn skip(&mut self, error: &ConvertError) {
        let index = self.next_index;
        self.next_index += 1;
        self.record_skip(index, error);
    }

    fn record_skip(&mut self, index: usize, error: &ConvertError) {
        log::warn!("⚠️ 跳过第 {} 帧：{}", index, error);
        self.skipped.push(index);
    }

    pub fn skipped_frames(&self) -> &[usize] {
        &self.skipped
    }

    pub fn abort(&self) {
        self.abort.abort();
    }

    pub async fn finish(self, progress: Option<ProgressSender>) -> Result<EncodedOutput, ConvertError> {
        self.abort.check()?;
        if self.frames.is_empty() {
            return Err(ConvertError::FrameEncodeFailed {
                index: self.skipped.first().copied().unwrap_or(0),
                reason: "没有可编码的帧".to_string(),
            });
        }

        report_progress(progress.as_ref(), 0.0);
        let started = Instant::now();
        let frame_count = self.frames.len();
        let abort = self.abort.clone();
        let (width, height) = (self.width, self.height);
        let speed = i32::from(self.config.quality);
        let workers = self.config.workers.max(1);
        let frames = self.frames;
        let blocking_progress = progress.clone();

        let bytes = tokio::task::spawn_blocking(move || {
            encode_animation(
                frames,
                width,
                height,
                speed,
                workers,
                &abort,
                blocking_progress.as_ref(),
            )
        })
        .await
        .map_err(|e| ConvertError::FrameEncodeFailed {
            index: 0,
            reason: format!("编码线程执行失败：{}", e),
        })??;

        self.abort.check()?;
        report_progress(progress.as_ref(), 1.0);

        log::info!(
            "✅ GIF 编码完成 - {}x{} 帧数: {} 跳过: {} 大小: {} bytes 耗时: {}ms",
            width,
            height,
            frame_count,
            self.skipped.len(),
            bytes.len(),
            started.elapsed().as_millis()
        );

        Ok(EncodedOutput {
            bytes: Bytes::from(bytes),
            skipped_frames: self.skipped,
        })
    }
}

fn encode_animation(
    frames: Vec<PendingFrame>,
    width: u16,
    height: u16,
    speed: i32,
    workers: usize,
    abort: &AbortHandle,
    progress: Option<&ProgressSender>,
) -> Result<Vec<u8>, ConvertError> {
    let total = frames.len();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| ConvertError::EncoderInitFailed(format!("创建编码线程池失败：{}", e)))?;

    // 计数与上报在同一把锁内完成，保证进度单调递增
    let quantized_count = Mutex::new(0usize);

    let quantized: Vec<(usize, gif::Frame<'static>)> = pool.install(|| {
        frames
            .into_par_iter()
            .map(|pending| {
                abort.check()?;
                let PendingFrame {
                    index,
                    frame,
                    delay_ms,
                } = pending;

                let mut pixels = frame.pixel_buffer;
                let mut gif_frame = gif::Frame::from_rgba_speed(width, height, &mut pixels, speed);
                gif_frame.delay = delay_to_centiseconds(delay_ms);
                gif_frame.dispose = gif::DisposalMethod::Background;

                let mut done = quantized_count
                    .lock()
                    .map_err(|_| ConvertError::ResourceLimit("编码进度锁已中毒".to_string()))?;
                *done += 1;
                report_progress(
                    progress,
                    *done as f32 / total as f32 * QUANTIZE_PROGRESS_SHARE,
                );

                Ok((index, gif_frame))
            })
            .collect::<Result<Vec<_>, ConvertError>>()
    })?;

    abort.check()?;

    let mut encoder = gif::Encoder::new(Vec::new(), width, height, &[])
        .map_err(|e| ConvertError::EncoderInitFailed(format!("创建 GIF 编码器失败：{}", e)))?;
    encoder
        .set_repeat(gif::Repeat::Infinite)
        .map_err(|e| ConvertError::EncoderInitFailed(format!("设置循环播放失败：{}", e)))?;

    for (written, (index, frame)) in quantized.iter().enumerate() {
        abort.check()?;
        encoder
            .write_frame(frame)
            .map_err(|e| ConvertError::FrameEncodeFailed {
                index: *index,
                reason: format!("写入 GIF 帧失败：{}", e),
            })?;
        report_progress(
            progress,
            QUANTIZE_PROGRESS_SHARE
                + (written + 1) as f32 / total as f32 * (1.0 - QUANTIZE_PROGRESS_SHARE),
        );
    }

    encoder
        .into_inner()
        .map_err(|e| ConvertError::FrameEncodeFailed {
            index: total.saturating_sub(1),
            reason: format!("写入 GIF 结尾失败：{}", e),
        })
}

/// 毫秒换算为 GIF 的 1/100 秒，四舍五入且至少为 1。
fn delay_to_centiseconds(delay_ms: u32) -> u16 {
    let centiseconds = (delay_ms.saturating_add(5) / 10).max(1);
    u16::try_from(centiseconds).unwrap_or(u16::MAX)
}
