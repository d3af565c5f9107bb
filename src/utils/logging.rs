/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::infrastructure::StatusCounts;
use crate::orchestrator::{CollectReport, DispatchReport, PatchReport};

/// 安装全局日志
///
/// 默认级别 `info`，`verbose` 时为 `debug`，设置了 `RUST_LOG` 则以它为准。
/// 传入 `log_file` 时同时追加写入该文件（不带颜色）。
pub fn init(verbose: bool, log_file: Option<&str>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn", default_level)));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("无法打开日志文件: {}", path))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("日志系统已经初始化")?;
    Ok(())
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
/// - `title`: 本次运行的标题
pub fn init_log_file(log_file_path: &str, title: &str) -> Result<()> {
    let log_header = format!(
        "{}\n{} - {}\n{}\n\n",
        "=".repeat(60),
        title,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)
        .with_context(|| format!("无法写入日志文件: {}", log_file_path))?;
    Ok(())
}

/// 记录阶段开始
pub fn log_phase_start(phase: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始阶段: {}", phase);
    info!("{}", "=".repeat(60));
}

/// 打印采集统计
pub fn print_collect_stats(report: &CollectReport) {
    info!("\n{}", "─".repeat(60));
    info!("📊 采集完成: {}", report.stop_reason);
    info!("{}", "─".repeat(60));
    info!("📄 成功页数: {}", report.pages_fetched);
    info!("❌ 失败页数: {}", report.pages_failed);
    info!("🔍 发现订单: {}", report.discovered);
    info!("✅ 新入库: {}", report.inserted);
    info!("♻️ 重复忽略: {}", report.duplicates());
    info!("{}", "─".repeat(60));
}

/// 打印截图统计
pub fn print_dispatch_stats(report: &DispatchReport) {
    info!("\n{}", "─".repeat(60));
    info!("📊 截图完成");
    info!("{}", "─".repeat(60));
    info!("📥 领取任务: {}", report.claimed);
    info!("✅ 成功: {}", report.completed);
    info!("❌ 失败: {}", report.failed);
    info!("{}", "─".repeat(60));
}

pub fn print_patch_stats(report: &PatchReport) {
    info!("\n{}", "─".repeat(60));
    info!("📊 补拍完成");
    info!("{}", "─".repeat(60));
    info!("🔍 检查已完成订单: {}", report.checked);
    info!("🕳️ 缺少截图: {}", report.missing);
    info!("✅ 补拍成功: {}", report.patched);
    info!("❌ 补拍失败: {}", report.failed);
    if report.skipped > 0 {
        info!("⏭️ 中断跳过: {}", report.skipped);
    }
    info!("{}", "─".repeat(60));
}

/// 打印数据库中各状态的订单数
pub fn print_status_counts(counts: &StatusCounts, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 数据库状态统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("⏳ 待处理: {}", counts.pending);
    info!("🔄 处理中: {}", counts.running);
    info!("✅ 已完成: {}", counts.completed);
    info!("❌ 已失败: {}", counts.failed);
    info!("📦 总计: {}", counts.total());
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
