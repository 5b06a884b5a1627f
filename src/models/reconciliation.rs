//! 对账任务模型

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::PathBuf;

/// 对账任务
///
/// 入队后所有权转移给对账工作者。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationJob {
    /// 受理号
    pub receipt_code: String,
    /// 附件下载目标文件夹
    pub claim_folder: PathBuf,
    /// 入队时间
    pub enqueued_at: DateTime<Local>,
}

impl ReconciliationJob {
    pub fn new(receipt_code: impl Into<String>, claim_folder: impl Into<PathBuf>) -> Self {
        Self {
            receipt_code: receipt_code.into(),
            claim_folder: claim_folder.into(),
            enqueued_at: Local::now(),
        }
    }
}

/// 单个对账任务的处理结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciliationOutcome {
    pub resolved: bool,
    pub attachment_path: Option<PathBuf>,
    pub attempts_used: u32,
}

impl ReconciliationOutcome {
    pub fn resolved(path: PathBuf, attempts_used: u32) -> Self {
        Self {
            resolved: true,
            attachment_path: Some(path),
            attempts_used,
        }
    }

    pub fn unresolved(attempts_used: u32) -> Self {
        Self {
            resolved: false,
            attachment_path: None,
            attempts_used,
        }
    }
}
