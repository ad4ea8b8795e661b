/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::models::metrics::{Distribution, QuestionMetrics};

/// 初始化 tracing 订阅者
///
/// 优先使用 `RUST_LOG`，否则 `verbose` 时为 debug，默认 info。重复调用无副作用
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n回答提交日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 离线回答提交模式");
    info!("📊 队列上限: {}, 每块提交: {}", config.max_queue_size, config.batch_size);
    info!(
        "🔁 重试: 最多 {} 次, 初始间隔 {}ms",
        config.retry_max_attempts, config.retry_initial_delay_ms
    );
    info!("{}", "=".repeat(60));
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `total_batches`: 批次总数
/// - `file_path`: 本批回答来自的文件
/// - `count`: 本批回答数
pub fn log_batch_start(batch_num: usize, total_batches: usize, file_path: &str, count: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("📄 来源: {} ({} 条回答)", file_path, count);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, queued: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 批完成: 入队 {}/{}", batch_num, queued, total);
    info!("{}", "─".repeat(60));
}

/// 打印单题指标摘要
pub fn log_question_metrics(metrics: &QuestionMetrics) {
    info!(
        "📈 题目 {}: 回答 {} 条, 猜测 {} 条, 平均作答 {:.0}ms",
        metrics.question_id,
        metrics.total_responses,
        metrics.total_guesses,
        metrics.time_stats.average_response_time
    );
    match &metrics.distribution {
        Distribution::Spatial(spatial) => {
            let q = &spatial.quadrants;
            info!(
                "   象限: 左上 {} / 右上 {} / 左下 {} / 右下 {}, 平均位置 ({:.2}, {:.2})",
                q.top_left,
                q.top_right,
                q.bottom_left,
                q.bottom_right,
                spatial.average_position.x,
                spatial.average_position.y
            );
        }
        Distribution::Categorical { counts } => {
            let summary: Vec<String> = counts
                .iter()
                .map(|(option, n)| format!("{}={}", truncate_text(option, 20), n))
                .collect();
            info!("   选项: {}", summary.join(", "));
        }
        Distribution::Empty => {}
    }
}

/// 最终统计
#[derive(Debug, Default, Clone, Copy)]
pub struct RunStats {
    pub loaded: usize,
    pub rejected: usize,
    pub submitted: usize,
    pub pending: usize,
}

/// 打印最终统计信息
pub fn print_final_stats(stats: &RunStats, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 已提交: {}/{}", stats.submitted, stats.loaded);
    info!("❌ 校验未通过: {}", stats.rejected);
    info!("⏳ 仍在队列: {}", stats.pending);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
