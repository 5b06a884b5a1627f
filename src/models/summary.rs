//! 运行汇总模型

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::models::claim::{OutcomeStatus, SubmissionOutcome};
use crate::models::reconciliation::ReconciliationJob;

/// 各结果状态的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub success: usize,
    pub failure: usize,
    pub omitted_already_submitted: usize,
    pub omitted_duplicate: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.success + self.failure + self.omitted_already_submitted + self.omitted_duplicate
    }

    fn bump(&mut self, status: OutcomeStatus) {
        match status {
            OutcomeStatus::Success => self.success += 1,
            OutcomeStatus::Failure => self.failure += 1,
            OutcomeStatus::OmittedAlreadySubmitted => self.omitted_already_submitted += 1,
            OutcomeStatus::OmittedDuplicateInvoice => self.omitted_duplicate += 1,
        }
    }
}

/// 成功记录（写入结果 JSON）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub claim_id: String,
    pub invoice_code: Option<String>,
    pub receipt_code: Option<String>,
}

/// 失败记录（写入失败报告，含完整案卷日志）
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub claim_id: String,
    pub invoice_code: Option<String>,
    pub reason: Option<String>,
    pub log: Vec<String>,
}

/// 跳过记录（写入跳过报告）
#[derive(Debug, Clone)]
pub struct OmissionRecord {
    pub claim_id: String,
    pub status: OutcomeStatus,
    pub reason: String,
}

/// 对账工作者的结束状态
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WorkerStatus {
    /// 本次运行没有启动对账
    #[default]
    NotStarted,
    /// 正常结束
    Completed,
    /// 在限定时间内没有结束
    TimedOut,
    /// 任务异常退出
    Crashed(String),
}

impl WorkerStatus {
    pub fn describe(&self) -> String {
        match self {
            WorkerStatus::NotStarted => "未启动".to_string(),
            WorkerStatus::Completed => "已完成".to_string(),
            WorkerStatus::TimedOut => "未能按时结束".to_string(),
            WorkerStatus::Crashed(reason) => format!("异常退出: {}", reason),
        }
    }
}

/// 运行汇总
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub counts: OutcomeCounts,
    pub elapsed: Duration,
    /// 运行结束后仍未对账的任务
    pub unresolved_jobs: Vec<ReconciliationJob>,
    pub successes: Vec<SuccessRecord>,
    pub failures: Vec<FailureRecord>,
    pub omissions: Vec<OmissionRecord>,
    pub worker: WorkerStatus,
}

impl RunSummary {
    /// 按结果状态归类一个案卷
    pub fn record_outcome(&mut self, outcome: &SubmissionOutcome) {
        self.counts.bump(outcome.status());

        match outcome.status() {
            OutcomeStatus::Success => self.successes.push(SuccessRecord {
                claim_id: outcome.claim_id().to_string(),
                invoice_code: outcome.invoice_code().map(str::to_string),
                receipt_code: outcome.receipt_code().map(str::to_string),
            }),
            OutcomeStatus::Failure => self.failures.push(FailureRecord {
                claim_id: outcome.claim_id().to_string(),
                invoice_code: outcome.invoice_code().map(str::to_string),
                reason: outcome.reason().map(str::to_string),
                log: outcome.log().to_vec(),
            }),
            status => self.omissions.push(OmissionRecord {
                claim_id: outcome.claim_id().to_string(),
                status,
                reason: outcome
                    .reason()
                    .unwrap_or_else(|| status.label())
                    .to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::claim::ClaimUnit;

    fn outcome(folder: &str, status: OutcomeStatus, receipt: Option<&str>) -> SubmissionOutcome {
        let mut claim = ClaimUnit::new(folder);
        claim.begin().unwrap();
        claim.receipt_code = receipt.map(str::to_string);
        claim.conclude(status).unwrap();
        claim.into_outcome()
    }

    #[test]
    fn test_record_outcome_sorts_into_lists() {
        let mut summary = RunSummary::default();
        summary.record_outcome(&outcome("/c/1", OutcomeStatus::Success, Some("999")));
        summary.record_outcome(&outcome("/c/2", OutcomeStatus::Failure, None));
        summary.record_outcome(&outcome("/c/3", OutcomeStatus::OmittedDuplicateInvoice, None));

        assert_eq!(summary.counts.total(), 3);
        assert_eq!(summary.successes[0].receipt_code.as_deref(), Some("999"));
        assert_eq!(summary.failures[0].claim_id, "2");
        assert_eq!(summary.omissions[0].reason, "跳过（发票重复）");
    }
}
