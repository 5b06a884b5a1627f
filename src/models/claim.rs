//! 案卷模型
//!
//! 一个案卷（claim unit）对应一个文件夹，代表一次发票提交。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::ClaimError;

/// 案卷处理状态
///
/// 只会沿 `Pending` → `InProgress` → 终态 单向推进，终态不可再变更。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimStatus {
    Pending,
    InProgress,
    Success,
    Failure,
    OmittedAlreadySubmitted,
    OmittedDuplicateInvoice,
}

impl ClaimStatus {
    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    fn rank(self) -> u8 {
        match self {
            ClaimStatus::Pending => 0,
            ClaimStatus::InProgress => 1,
            _ => 2,
        }
    }
}

/// 提交结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeStatus {
    Success,
    Failure,
    OmittedAlreadySubmitted,
    OmittedDuplicateInvoice,
}

impl OutcomeStatus {
    /// 报告中使用的中文标签
    pub fn label(self) -> &'static str {
        match self {
            OutcomeStatus::Success => "成功",
            OutcomeStatus::Failure => "失败",
            OutcomeStatus::OmittedAlreadySubmitted => "跳过（已提交）",
            OutcomeStatus::OmittedDuplicateInvoice => "跳过（发票重复）",
        }
    }
}

impl From<OutcomeStatus> for ClaimStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Success => ClaimStatus::Success,
            OutcomeStatus::Failure => ClaimStatus::Failure,
            OutcomeStatus::OmittedAlreadySubmitted => ClaimStatus::OmittedAlreadySubmitted,
            OutcomeStatus::OmittedDuplicateInvoice => ClaimStatus::OmittedDuplicateInvoice,
        }
    }
}

/// 案卷
///
/// 由编排层发现文件夹时创建，只在重试控制器 / 状态机中被修改，
/// 运行汇总写出后丢弃。
#[derive(Debug, Clone)]
pub struct ClaimUnit {
    /// 文件夹名称
    pub id: String,
    /// 文件夹路径
    pub folder: PathBuf,
    /// 发票号，解析文件前为空
    pub invoice_code: Option<String>,
    /// 文件类型 → 文件路径
    pub documents: BTreeMap<String, PathBuf>,
    /// 提交成功后提取到的受理号
    pub receipt_code: Option<String>,
    /// 已使用的尝试次数
    pub attempt_count: u32,
    status: ClaimStatus,
    reason: Option<String>,
    log: Vec<String>,
}

impl ClaimUnit {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        let folder = folder.into();
        let id = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| folder.to_string_lossy().to_string());

        Self {
            id,
            folder,
            invoice_code: None,
            documents: BTreeMap::new(),
            receipt_code: None,
            attempt_count: 0,
            status: ClaimStatus::Pending,
            reason: None,
            log: Vec::new(),
        }
    }

    pub fn status(&self) -> ClaimStatus {
        self.status
    }

    /// 进入处理中状态
    pub fn begin(&mut self) -> Result<(), ClaimError> {
        self.transition(ClaimStatus::InProgress)
    }

    /// 进入终态
    pub fn conclude(&mut self, status: OutcomeStatus) -> Result<(), ClaimError> {
        self.transition(status.into())
    }

    fn transition(&mut self, to: ClaimStatus) -> Result<(), ClaimError> {
        if self.status.is_terminal() || to.rank() < self.status.rank() {
            return Err(ClaimError::InvalidTransition {
                claim_id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// 记录一行案卷日志
    pub fn log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn log_lines(&self) -> &[String] {
        &self.log
    }

    /// 跳过或失败的原因（写入报告）
    pub fn set_reason(&mut self, reason: impl Into<String>) {
        self.reason = Some(reason.into());
    }

    pub fn document(&self, kind: &str) -> Option<&Path> {
        self.documents.get(kind).map(PathBuf::as_path)
    }

    /// 生成不可变的提交结果
    ///
    /// 未到终态的案卷按失败处理。
    pub fn into_outcome(self) -> SubmissionOutcome {
        let status = match self.status {
            ClaimStatus::Success => OutcomeStatus::Success,
            ClaimStatus::OmittedAlreadySubmitted => OutcomeStatus::OmittedAlreadySubmitted,
            ClaimStatus::OmittedDuplicateInvoice => OutcomeStatus::OmittedDuplicateInvoice,
            ClaimStatus::Failure | ClaimStatus::Pending | ClaimStatus::InProgress => {
                OutcomeStatus::Failure
            }
        };

        SubmissionOutcome {
            claim_id: self.id,
            folder: self.folder,
            status,
            receipt_code: self.receipt_code,
            invoice_code: self.invoice_code,
            attempts: self.attempt_count,
            reason: self.reason,
            log: self.log,
        }
    }
}

/// 单个案卷的提交结果，生成后不可变
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    claim_id: String,
    folder: PathBuf,
    status: OutcomeStatus,
    receipt_code: Option<String>,
    invoice_code: Option<String>,
    attempts: u32,
    reason: Option<String>,
    log: Vec<String>,
}

impl SubmissionOutcome {
    pub fn claim_id(&self) -> &str {
        &self.claim_id
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn status(&self) -> OutcomeStatus {
        self.status
    }

    pub fn receipt_code(&self) -> Option<&str> {
        self.receipt_code.as_deref()
    }

    pub fn invoice_code(&self) -> Option<&str> {
        self.invoice_code.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_id_comes_from_folder_name() {
        let claim = ClaimUnit::new("/tmp/cuenta/17");
        assert_eq!(claim.id, "17");
        assert_eq!(claim.status(), ClaimStatus::Pending);
    }

    #[test]
    fn test_terminal_status_cannot_change() {
        let mut claim = ClaimUnit::new("/tmp/cuenta/3");
        claim.begin().unwrap();
        claim.conclude(OutcomeStatus::Success).unwrap();

        assert!(claim.conclude(OutcomeStatus::Failure).is_err());
        assert!(claim.begin().is_err());
        assert_eq!(claim.status(), ClaimStatus::Success);
    }

    #[test]
    fn test_unfinished_claim_becomes_failure_outcome() {
        let mut claim = ClaimUnit::new("/tmp/cuenta/8");
        claim.begin().unwrap();
        claim.log("第一行");

        let outcome = claim.into_outcome();
        assert_eq!(outcome.status(), OutcomeStatus::Failure);
        assert_eq!(outcome.log(), ["第一行".to_string()]);
    }
}
