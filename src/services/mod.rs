pub mod extractor;
pub mod popup;
pub mod report_writer;
pub mod resolver;
pub mod size_guard;

pub use extractor::ConfirmationExtractor;
pub use popup::PopupDismisser;
pub use report_writer::ReportWriter;
pub use resolver::{DocumentResolver, PatternResolver, ResolvedClaim};
pub use size_guard::{SizeGuard, SizeVerdict};
