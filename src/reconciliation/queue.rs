//! 对账队列
//!
//! 无界 FIFO，生产者是编排层，消费者是对账工作者。
//! 运行结束时由 `JobProducer::close` 发送唯一一次结束信号。

use tokio::sync::mpsc;
use tracing::debug;

use crate::models::reconciliation::ReconciliationJob;

/// 队列消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueMessage {
    Job(ReconciliationJob),
    /// 不会再有新任务
    Shutdown,
}

/// 创建对账队列
pub fn reconciliation_queue() -> (JobProducer, mpsc::UnboundedReceiver<QueueMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobProducer { tx, queued: 0 }, rx)
}

/// 队列生产端
///
/// `close` 按值消费生产端，结束信号因此最多发送一次，且一定在最后一个任务之后。
#[derive(Debug)]
pub struct JobProducer {
    tx: mpsc::UnboundedSender<QueueMessage>,
    queued: usize,
}

impl JobProducer {
    /// 入队；工作者已经退出时返回 false
    pub fn enqueue(&mut self, job: ReconciliationJob) -> bool {
        debug!("对账任务入队: {}", job.receipt_code);
        match self.tx.send(QueueMessage::Job(job)) {
            Ok(()) => {
                self.queued += 1;
                true
            }
            Err(_) => false,
        }
    }

    pub fn queued(&self) -> usize {
        self.queued
    }

    /// 发送结束信号，返回入队的任务总数
    pub fn close(self) -> usize {
        let _ = self.tx.send(QueueMessage::Shutdown);
        self.queued
    }
}
