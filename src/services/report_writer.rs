//! 报告写入服务 - 业务能力层
//!
//! 只负责把运行汇总写成文件，不关心流程

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::AppError;
use crate::models::summary::{FailureRecord, OmissionRecord, RunSummary, SuccessRecord};

/// 报告写入服务
///
/// 职责：
/// - 成功列表写成 JSON（供下游对账和统计）
/// - 失败报告：每个失败案卷一段，附完整案卷日志
/// - 跳过报告：每个跳过案卷一行，附原因
pub struct ReportWriter {
    results_file: PathBuf,
    failures_report: PathBuf,
    omissions_report: PathBuf,
}

impl ReportWriter {
    pub fn new(
        results_file: impl Into<PathBuf>,
        failures_report: impl Into<PathBuf>,
        omissions_report: impl Into<PathBuf>,
    ) -> Self {
        Self {
            results_file: results_file.into(),
            failures_report: failures_report.into(),
            omissions_report: omissions_report.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.results_file,
            &config.failures_report,
            &config.omissions_report,
        )
    }

    /// 写出全部报告，空列表对应的文件不生成
    pub async fn write_all(&self, summary: &RunSummary) -> Result<()> {
        if self.write_results(&summary.successes).await? {
            info!("💾 成功列表已保存至: {}", self.results_file.display());
        }
        if self.write_failures(&summary.failures).await? {
            info!("💾 失败报告已保存至: {}", self.failures_report.display());
        }
        if self.write_omissions(&summary.omissions).await? {
            info!("💾 跳过报告已保存至: {}", self.omissions_report.display());
        }
        Ok(())
    }

    /// 写入成功列表（JSON 数组）
    pub async fn write_results(&self, successes: &[SuccessRecord]) -> Result<bool> {
        if successes.is_empty() {
            return Ok(false);
        }
        let json = serde_json::to_string_pretty(successes).context("序列化成功列表失败")?;
        write_file(&self.results_file, json).await?;
        Ok(true)
    }

    /// 写入失败报告
    pub async fn write_failures(&self, failures: &[FailureRecord]) -> Result<bool> {
        if failures.is_empty() {
            return Ok(false);
        }

        let mut report = String::new();
        for failure in failures {
            let _ = writeln!(
                report,
                "==== 案卷 {} | 发票 {} ====",
                failure.claim_id,
                failure.invoice_code.as_deref().unwrap_or("-")
            );
            if let Some(reason) = &failure.reason {
                let _ = writeln!(report, "原因: {}", reason);
            }
            for line in &failure.log {
                let _ = writeln!(report, "{}", line);
            }
            report.push('\n');
        }

        write_file(&self.failures_report, report).await?;
        Ok(true)
    }

    /// 写入跳过报告
    pub async fn write_omissions(&self, omissions: &[OmissionRecord]) -> Result<bool> {
        if omissions.is_empty() {
            return Ok(false);
        }

        let mut report = String::new();
        for omission in omissions {
            let _ = writeln!(
                report,
                "案卷 {} | {} | {}",
                omission.claim_id,
                omission.status.label(),
                omission.reason
            );
        }

        write_file(&self.omissions_report, report).await?;
        Ok(true)
    }
}

async fn write_file(path: &Path, content: String) -> Result<()> {
    debug!("写入文件: {} ({} 字节)", path.display(), content.len());
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("无法创建目录: {}", parent.display()))?;
    }
    fs::write(path, content)
        .await
        .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
    Ok(())
}
