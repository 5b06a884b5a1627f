//! 对账工作者
//!
//! 独占一个邮箱连接，一次只处理一个任务：
//! 1. 首轮：每个任务最多搜索 N 次，间隔固定
//! 2. 收到结束信号后对未找到的任务做若干轮补查
//! 3. 空闲超过阈值时发送 NOOP 保活，失败则重连
//!
//! 先下载附件再归档邮件，重复搜索同一受理号不会再下载一次。

use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ReconciliationConfig;
use crate::error::MailboxError;
use crate::infrastructure::Mailbox;
use crate::models::profile::ReconciliationProfile;
use crate::models::reconciliation::{ReconciliationJob, ReconciliationOutcome};
use crate::reconciliation::queue::QueueMessage;

/// 对账工作者
pub struct ReconciliationWorker<M: Mailbox> {
    mailbox: M,
    config: ReconciliationConfig,
    sender: String,
    extension: String,
}

impl<M: Mailbox + 'static> ReconciliationWorker<M> {
    pub fn new(mailbox: M, config: ReconciliationConfig, profile: &ReconciliationProfile) -> Self {
        Self {
            mailbox,
            config,
            sender: profile.sender.clone(),
            extension: profile.attachment_extension.to_lowercase(),
        }
    }

    /// 在独立任务中运行，返回最终未找到的任务
    pub fn spawn(self, rx: UnboundedReceiver<QueueMessage>) -> JoinHandle<Vec<ReconciliationJob>> {
        tokio::spawn(self.run(rx))
    }

    pub async fn run(mut self, mut rx: UnboundedReceiver<QueueMessage>) -> Vec<ReconciliationJob> {
        info!("📬 对账工作者启动");
        if let Err(e) = self.mailbox.connect().await {
            warn!("⚠️ 邮箱连接失败，将在处理任务时重试: {}", e);
        }

        let mut pending = Vec::new();
        let mut idle_since = Instant::now();

        // ========== 首轮 ==========
        loop {
            match timeout(self.config.idle_poll, rx.recv()).await {
                Ok(Some(QueueMessage::Job(job))) => {
                    let outcome = self.process_job(&job, self.config.max_retries).await;
                    if !outcome.resolved {
                        warn!(
                            "⚠️ 受理号 {} 首轮 {} 次未找到回执，稍后补查",
                            job.receipt_code, outcome.attempts_used
                        );
                        pending.push(job);
                    }
                    idle_since = Instant::now();
                }
                Ok(Some(QueueMessage::Shutdown)) => {
                    debug!("收到结束信号");
                    break;
                }
                Ok(None) => {
                    warn!("⚠️ 队列在没有结束信号的情况下关闭，按结束处理");
                    break;
                }
                Err(_) => {
                    if idle_since.elapsed() >= self.config.keepalive_after {
                        self.keepalive().await;
                        idle_since = Instant::now();
                    }
                }
            }
        }

        // ========== 补查 ==========
        let failed = self.sweep(pending).await;

        if let Err(e) = self.mailbox.disconnect().await {
            debug!("断开邮箱连接失败: {}", e);
        }
        info!("📭 对账工作者结束，未找到回执 {} 个", failed.len());
        failed
    }

    /// 对单个任务最多搜索 `retries` 次
    pub async fn process_job(&mut self, job: &ReconciliationJob, retries: u32) -> ReconciliationOutcome {
        for attempt in 1..=retries {
            debug!("搜索受理号 {} (第 {}/{} 次)", job.receipt_code, attempt, retries);
            match self.try_fetch(job).await {
                Ok(Some(path)) => {
                    info!("✅ 受理号 {} 回执已保存: {}", job.receipt_code, path.display());
                    return ReconciliationOutcome::resolved(path, attempt);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("⚠️ 搜索受理号 {} 出错: {}，重新连接", job.receipt_code, e);
                    self.reconnect().await;
                }
            }
            if attempt < retries {
                sleep(self.config.retry_delay).await;
            }
        }
        ReconciliationOutcome::unresolved(retries)
    }

    async fn sweep(&mut self, mut pending: Vec<ReconciliationJob>) -> Vec<ReconciliationJob> {
        for pass in 1..=self.config.sweep_passes {
            if pending.is_empty() {
                break;
            }
            info!("🔁 第 {} 轮补查: {} 个待找", pass, pending.len());
            sleep(self.config.sweep_pause).await;

            let mut still_pending = Vec::new();
            for job in pending {
                if !self.process_job(&job, 1).await.resolved {
                    still_pending.push(job);
                }
            }
            pending = still_pending;
        }
        pending
    }

    async fn try_fetch(&mut self, job: &ReconciliationJob) -> Result<Option<PathBuf>, MailboxError> {
        let today = Local::now().date_naive();
        let ids = self
            .mailbox
            .search_by_sender_and_date(&self.sender, today)
            .await?;

        let receipt = job.receipt_code.clone();
        let extension = self.extension.clone();
        let predicate = move |name: &str| {
            name.contains(receipt.as_str()) && name.to_lowercase().ends_with(extension.as_str())
        };

        for id in ids {
            let Some(attachment) = self.mailbox.fetch_attachment(&id, &predicate).await? else {
                continue;
            };

            let path = job.claim_folder.join(safe_file_name(&attachment.filename));
            fs::write(&path, &attachment.bytes)
                .await
                .map_err(MailboxError::Io)?;

            self.mailbox
                .move_and_delete(&id, &self.config.processed_folder)
                .await?;
            return Ok(Some(path));
        }
        Ok(None)
    }

    async fn keepalive(&mut self) {
        debug!("邮箱空闲，发送 NOOP");
        if let Err(e) = self.mailbox.noop().await {
            warn!("⚠️ 邮箱连接已断开 ({})，重新连接", e);
            self.reconnect().await;
        }
    }

    async fn reconnect(&mut self) {
        let _ = self.mailbox.disconnect().await;
        if let Err(e) = self.mailbox.connect().await {
            warn!("⚠️ 重新连接邮箱失败: {}", e);
        }
    }
}

/// 去掉附件名里的目录部分
fn safe_file_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "attachment".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciliation::queue::reconciliation_queue;
    use crate::testing::{FakeMessage, MemoryMailbox};
    use std::time::Duration;

    const SENDER: &str = "radicacion@aseguradora.test";

    fn profile() -> ReconciliationProfile {
        ReconciliationProfile {
            sender: SENDER.to_string(),
            attachment_extension: ".pdf".to_string(),
        }
    }

    fn config(max_retries: u32) -> ReconciliationConfig {
        ReconciliationConfig {
            max_retries,
            ..ReconciliationConfig::default()
        }
    }

    fn today_message(id: &str, attachment: &str) -> FakeMessage {
        FakeMessage::new(id, SENDER, Local::now().date_naive(), attachment)
    }

    #[test]
    fn test_safe_file_name() {
        assert_eq!(safe_file_name("../../etc/x-999.pdf"), "x-999.pdf");
        assert_eq!(safe_file_name("999.pdf"), "999.pdf");
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_on_later_retry() {
        let folder = tempfile::tempdir().unwrap();
        let mailbox = MemoryMailbox::new()
            .with_message(today_message("m1", "Radicado-4521.PDF").arriving_on_search(3));
        let handle = mailbox.handle();
        let mut worker = ReconciliationWorker::new(mailbox, config(5), &profile());
        worker.mailbox.connect().await.unwrap();

        let job = ReconciliationJob::new("4521", folder.path());
        let outcome = worker.process_job(&job, 5).await;

        assert!(outcome.resolved);
        assert_eq!(outcome.attempts_used, 3);
        assert_eq!(handle.searches(), 3);
        assert!(folder.path().join("Radicado-4521.PDF").exists());
        assert_eq!(handle.moved(), vec![("m1".to_string(), "Procesados".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_sender_day_or_extension_never_match() {
        let folder = tempfile::tempdir().unwrap();
        let yesterday = Local::now().date_naive() - chrono::Duration::days(1);
        let mailbox = MemoryMailbox::new()
            .with_message(FakeMessage::new("old", SENDER, yesterday, "4521.pdf"))
            .with_message(today_message("xml", "4521.xml"))
            .with_message(FakeMessage::new(
                "spam",
                "otro@test",
                Local::now().date_naive(),
                "4521.pdf",
            ));
        let handle = mailbox.handle();
        let mut worker = ReconciliationWorker::new(mailbox, config(2), &profile());
        worker.mailbox.connect().await.unwrap();

        let outcome = worker
            .process_job(&ReconciliationJob::new("4521", folder.path()), 2)
            .await;
        assert!(!outcome.resolved);
        assert!(handle.moved().is_empty());
        assert_eq!(handle.inbox_len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_search_does_not_download_twice() {
        let folder = tempfile::tempdir().unwrap();
        let mailbox = MemoryMailbox::new().with_message(today_message("m1", "777.pdf"));
        let handle = mailbox.handle();
        let mut worker = ReconciliationWorker::new(mailbox, config(2), &profile());
        worker.mailbox.connect().await.unwrap();

        let job = ReconciliationJob::new("777", folder.path());
        assert!(worker.process_job(&job, 2).await.resolved);
        std::fs::remove_file(folder.path().join("777.pdf")).unwrap();

        assert!(!worker.process_job(&job, 2).await.resolved);
        assert!(!folder.path().join("777.pdf").exists());
        assert_eq!(handle.moved().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_job_reported_once_after_sweeps() {
        let folder = tempfile::tempdir().unwrap();
        let mailbox = MemoryMailbox::new();
        let handle = mailbox.handle();
        let worker = ReconciliationWorker::new(mailbox, config(4), &profile());

        let (mut producer, rx) = reconciliation_queue();
        let task = worker.spawn(rx);
        producer.enqueue(ReconciliationJob::new("404", folder.path()));
        producer.close();

        let failed = task.await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].receipt_code, "404");
        // 首轮 4 次 + 3 轮补查各 1 次
        assert_eq!(handle.searches(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_resolves_late_message() {
        let folder = tempfile::tempdir().unwrap();
        let mailbox = MemoryMailbox::new()
            .with_message(today_message("m1", "RAD-55.pdf").arriving_on_search(3));
        let handle = mailbox.handle();
        let worker = ReconciliationWorker::new(mailbox, config(2), &profile());

        let (mut producer, rx) = reconciliation_queue();
        let task = worker.spawn(rx);
        producer.enqueue(ReconciliationJob::new("55", folder.path()));
        producer.close();

        assert!(task.await.unwrap().is_empty());
        assert_eq!(handle.searches(), 3);
        assert!(folder.path().join("RAD-55.pdf").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jobs_processed_in_fifo_order() {
        let folder = tempfile::tempdir().unwrap();
        let mailbox = MemoryMailbox::new()
            .with_message(today_message("a", "1.pdf"))
            .with_message(today_message("b", "2.pdf"));
        let handle = mailbox.handle();
        let worker = ReconciliationWorker::new(mailbox, config(1), &profile());

        let (mut producer, rx) = reconciliation_queue();
        let task = worker.spawn(rx);
        producer.enqueue(ReconciliationJob::new("2", folder.path()));
        producer.enqueue(ReconciliationJob::new("1", folder.path()));
        producer.close();

        assert!(task.await.unwrap().is_empty());
        let moved: Vec<String> = handle.moved().into_iter().map(|(id, _)| id).collect();
        assert_eq!(moved, ["b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_keepalive_reconnects_after_failed_noop() {
        let mailbox = MemoryMailbox::new();
        let handle = mailbox.handle();
        handle.fail_noops(1);
        let worker = ReconciliationWorker::new(mailbox, config(1), &profile());

        let (producer, rx) = reconciliation_queue();
        let task = worker.spawn(rx);
        sleep(Duration::from_secs(250)).await;
        producer.close();

        assert!(task.await.unwrap().is_empty());
        assert_eq!(handle.noops(), 1);
        assert_eq!(handle.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_producer_counts_as_shutdown() {
        let folder = tempfile::tempdir().unwrap();
        let worker = ReconciliationWorker::new(MemoryMailbox::new(), config(1), &profile());

        let (mut producer, rx) = reconciliation_queue();
        let task = worker.spawn(rx);
        producer.enqueue(ReconciliationJob::new("9", folder.path()));
        drop(producer);

        let failed = task.await.unwrap();
        assert_eq!(failed.len(), 1);
    }
}
