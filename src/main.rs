//! # 图片格式转换工具 · 命令行入口
//!
//! 本文件仅负责参数解析、配置组装与结果落盘。
//! 业务逻辑分布在 `converter` 各子模块中，详见 `lib.rs` 架构文档。

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;

use image_transcoder::converter::{
    format_file_size, BatchCancel, BatchEvent, BatchStatus, BatchSummary, ConversionSession,
    ConvertConfig, ConvertProfile, PipelineEvent, SizeSelector, SourceFile, TargetFormat,
};
use image_transcoder::error::AppError;

#[derive(Parser, Debug)]
#[command(name = "image-transcoder", version, about = "图片 / GIF 动画格式转换与图标生成")]
struct Cli {
    /// JSON 配置文件，缺省字段使用默认值。
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 性能档位：quality / balanced / speed。
    #[arg(long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 转换单张图片。
    Convert(ConvertArgs),
    /// 按顺序批量转换多张图片。
    Batch(BatchArgs),
    /// 生成自定义图标集。
    Icons(IconsArgs),
}

#[derive(Parser, Debug)]
struct ConvertArgs {
    /// 源图片路径。
    file: PathBuf,

    /// 目标格式：png / jpeg / webp / gif。
    #[arg(long)]
    format: TargetFormat,

    /// `original` 或 `宽x高`。
    #[arg(long, default_value = "original")]
    size: SizeSelector,

    /// JPEG 质量（0-100）。
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    quality: Option<u8>,

    /// 输出目录。
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Parser, Debug)]
struct BatchArgs {
    /// 源图片路径（可多个）。
    #[arg(required = true)]
    files: Vec<PathBuf>,

    #[arg(long)]
    format: TargetFormat,

    #[arg(long, default_value = "original")]
    size: SizeSelector,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// 以 JSON 输出批处理报告。
    #[arg(long, default_value_t = false)]
    report: bool,
}

#[derive(Parser, Debug)]
struct IconsArgs {
    file: PathBuf,

    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct BatchReport {
    summary: BatchSummary,
    items: Vec<BatchReportItem>,
}

#[derive(Debug, Serialize)]
struct BatchReportItem {
    file: String,
    status: BatchStatus,
    output: Option<String>,
    error: Option<String>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        log::error!("❌ 执行失败 - 错误码: {} 原因: {}", err.code(), err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config = build_config(cli.config.as_deref(), cli.profile.as_deref())?;
    log::info!("⚙️ 当前性能档位：{}", config.infer_profile().as_str());

    match cli.cmd {
        Command::Convert(args) => cmd_convert(config, args).await,
        Command::Batch(args) => cmd_batch(config, args).await,
        Command::Icons(args) => cmd_icons(config, args).await,
    }
}

fn build_config(path: Option<&Path>, profile: Option<&str>) -> Result<ConvertConfig, AppError> {
    let mut config = match path {
        Some(path) => ConvertConfig::from_json_file(path)?,
        None => ConvertConfig::default(),
    };

    if let Some(profile) = profile {
        let profile =
            ConvertProfile::from_str(profile).map_err(|e| AppError::Config(e.to_string()))?;
        config.apply_profile(profile);
    }

    config
        .validate()
        .map_err(|e| AppError::Config(e.to_string()))?;
    Ok(config)
}

async fn cmd_convert(mut config: ConvertConfig, args: ConvertArgs) -> Result<(), AppError> {
    if let Some(quality) = args.quality {
        config.jpeg_quality = quality;
    }

    let mut session = ConversionSession::new(config);
    let source = session.load(&SourceFile::from_path(&args.file)?)?;
    eprintln!(
        "{}: {}x{} {}",
        source.display_name(),
        source.width(),
        source.height(),
        format_file_size(source.file_size() as u64)
    );
    session.select_size(args.format, args.size);

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                PipelineEvent::StateChanged(state) => log::debug!("🔄 {:?}", state),
                PipelineEvent::Preview(preview) => {
                    log::info!("👀 预览就绪 - {}x{}", preview.width, preview.height)
                }
                PipelineEvent::Progress(fraction) => {
                    log::debug!("⏳ 编码进度 {:.0}%", fraction * 100.0)
                }
            }
        }
    });

    let result = session.convert_with_events(args.format, Some(tx)).await;
    let _ = watcher.await;
    let result = result?;

    if !result.skipped_frames.is_empty() {
        eprintln!("已跳过损坏的帧：{:?}", result.skipped_frames);
    }

    let path = write_output(&args.out_dir, &result.file_name(), &result.blob)?;
    eprintln!(
        "wrote {} ({}x{}, {})",
        path.display(),
        result.width,
        result.height,
        format_file_size(result.byte_length as u64)
    );
    Ok(())
}

async fn cmd_batch(config: ConvertConfig, args: BatchArgs) -> Result<(), AppError> {
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        match SourceFile::from_path(path) {
            Ok(file) => files.push(file),
            Err(err) => log::warn!("⚠️ 跳过无法读取的文件 {}：{}", path.display(), err),
        }
    }

    let mut session = ConversionSession::new(config);
    session.load_batch(files)?;

    let cancel = BatchCancel::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("🛑 收到中断信号，停止批处理");
            ctrl_c_cancel.cancel();
        }
    });

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let BatchEvent::Progress { processed, total, .. } = event {
                eprintln!("[{}/{}]", processed, total);
            }
        }
    });

    let summary = session
        .process_batch_with(args.format, args.size, Some(&tx), &cancel)
        .await;
    drop(tx);
    let _ = watcher.await;
    let summary = summary?;

    let mut report_items = Vec::with_capacity(session.batch_items().len());
    for item in session.batch_items() {
        let mut output = None;
        if let (Some(result), Some(name)) = (item.result(), item.download_name()) {
            let path = write_output(&args.out_dir, &name, &result.blob)?;
            output = Some(path.display().to_string());
        }
        report_items.push(BatchReportItem {
            file: item.file().name.clone(),
            status: item.status(),
            output,
            error: item.error().map(str::to_string),
        });
    }

    if args.report {
        let report = BatchReport {
            summary,
            items: report_items,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| AppError::Config(format!("报告序列化失败：{}", e)))?;
        println!("{}", json);
    } else {
        eprintln!(
            "完成 {} / {}，失败 {}{}",
            summary.completed,
            summary.total,
            summary.failed,
            if summary.cancelled { "（已取消）" } else { "" }
        );
    }

    Ok(())
}

async fn cmd_icons(config: ConvertConfig, args: IconsArgs) -> Result<(), AppError> {
    let mut session = ConversionSession::new(config);
    session.load(&SourceFile::from_path(&args.file)?)?;

    for icon in session.generate_custom_icons().await? {
        let path = write_output(&args.out_dir, &icon.name, &icon.bytes)?;
        eprintln!("wrote {} ({}x{})", path.display(), icon.size, icon.size);
    }
    Ok(())
}

fn write_output(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
