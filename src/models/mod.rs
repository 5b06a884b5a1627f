pub mod claim;
pub mod loaders;
pub mod profile;
pub mod reconciliation;
pub mod summary;

pub use claim::{ClaimStatus, ClaimUnit, OutcomeStatus, SubmissionOutcome};
pub use loaders::{list_profiles, load_profile};
pub use profile::StrategyProfile;
pub use reconciliation::{ReconciliationJob, ReconciliationOutcome};
pub use summary::{OutcomeCounts, RunSummary, SuccessRecord, WorkerStatus};
