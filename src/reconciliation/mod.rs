//! 邮件对账
//!
//! 编排层把提交成功的受理号放进队列，工作者在独立任务中到邮箱里找回执附件。
//! 两边只通过队列通信。

pub mod queue;
pub mod worker;

pub use queue::{reconciliation_queue, JobProducer, QueueMessage};
pub use worker::ReconciliationWorker;
