pub mod claim_ctx;
pub mod claim_flow;
pub mod retry;
pub mod strategy;
pub mod submission;

pub use claim_ctx::ClaimCtx;
pub use claim_flow::ClaimFlow;
pub use retry::{RetryController, RetryVerdict};
pub use strategy::{Confirmation, FillOutcome, InsurerStrategy, ProfileStrategy};
pub use submission::{AttemptError, AttemptResult, SubmissionMachine, SubmissionState};

use chrono::Local;
use tracing::{info, warn};

use crate::models::claim::ClaimUnit;

/// 同时写入运行日志和案卷日志
pub(crate) fn note(claim: &mut ClaimUnit, message: impl Into<String>) {
    let message = message.into();
    info!("[案卷 {}] {}", claim.id, message);
    claim.log(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
}

pub(crate) fn warn_note(claim: &mut ClaimUnit, message: impl Into<String>) {
    let message = message.into();
    warn!("[案卷 {}] {}", claim.id, message);
    claim.log(format!("[{}] {}", Local::now().format("%H:%M:%S"), message));
}
