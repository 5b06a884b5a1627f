//! 进度事件
//!
//! 界面或命令行作为被动订阅者，发送方从不等待接收方。

use tokio::sync::broadcast;

use crate::models::claim::OutcomeStatus;
use crate::models::summary::{OutcomeCounts, WorkerStatus};

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    RunStarted {
        total: usize,
    },
    ClaimStarted {
        index: usize,
        total: usize,
        claim_id: String,
    },
    ClaimFinished {
        claim_id: String,
        status: OutcomeStatus,
        receipt_code: Option<String>,
    },
    JobQueued {
        receipt_code: String,
    },
    ReconciliationFinished {
        status: WorkerStatus,
        unresolved: usize,
    },
    RunFinished {
        counts: OutcomeCounts,
    },
}

/// 事件发送端
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressSender {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// 没有订阅者时直接丢弃
    pub fn emit(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressSender {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_silent() {
        let sender = ProgressSender::default();
        sender.emit(ProgressEvent::RunStarted { total: 3 });

        let mut rx = sender.subscribe();
        sender.emit(ProgressEvent::JobQueued {
            receipt_code: "999".to_string(),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            ProgressEvent::JobQueued {
                receipt_code: "999".to_string()
            }
        );
    }
}
