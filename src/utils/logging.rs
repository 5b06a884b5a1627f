use anyhow::Result;
/// 日志工具模块
///
/// 提供日志格式化和输出的辅助函数
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::summary::RunSummary;

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &Path) -> Result<()> {
    let log_header = format!(
        "{}\n案卷提交日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `insurer`: 保险公司名称
/// - `max_attempts`: 单个案卷的最大尝试次数
pub fn log_startup(insurer: &str, max_attempts: u32) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 案卷批量提交");
    info!("🏢 保险公司: {}", insurer);
    info!("📊 单个案卷最多尝试 {} 次", max_attempts);
    info!("{}", "=".repeat(60));
}

/// 记录案卷加载信息
pub fn log_claims_loaded(total: usize, reconciliation: bool) {
    info!("✓ 找到 {} 个待处理的案卷", total);
    if reconciliation {
        info!("📬 成功提交的案卷将进入邮件对账队列");
    }
    info!("💡 案卷按顺序逐个处理\n");
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 运行汇总
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(summary: &RunSummary, log_file_path: &Path) {
    let counts = &summary.counts;
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("总耗时: {}", format_elapsed(summary.elapsed));
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", counts.success, counts.total());
    info!("❌ 失败: {}", counts.failure);
    info!("⏭️ 跳过（已提交）: {}", counts.omitted_already_submitted);
    info!("⏭️ 跳过（发票重复）: {}", counts.omitted_duplicate);
    if summary.worker != Default::default() {
        info!("📬 对账工作者: {}", summary.worker.describe());
        if summary.unresolved_jobs.is_empty() {
            info!("📬 未对账任务: 0");
        } else {
            warn!("⚠️ 未对账任务: {}", summary.unresolved_jobs.len());
            for job in &summary.unresolved_jobs {
                warn!("   - 受理号 {} ({})", job.receipt_code, job.claim_folder.display());
            }
        }
    }
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path.display());
}

/// 将耗时格式化为"X 小时 Y 分 Z 秒"
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    let mut parts = Vec::new();
    if hours > 0 {
        parts.push(format!("{} 小时", hours));
    }
    if minutes > 0 {
        parts.push(format!("{} 分", minutes));
    }
    if seconds > 0 || parts.is_empty() {
        parts.push(format!("{} 秒", seconds));
    }
    parts.join(" ")
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
