//! 批量案卷处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一次运行的全部调度。
//!
//! ## 核心流程
//!
//! 1. **应用初始化**：写日志文件头、加载配置档、启动或连接浏览器、打开邮箱
//! 2. **登录**：失败即整个运行失败
//! 3. **启动对账工作者**：配置档要求对账时才启动
//! 4. **逐个处理案卷**：数字文件夹名按数值升序在前，其余按名称在后
//! 5. **入队**：只有带受理号的成功案卷进入对账队列，同一受理号只入队一次
//! 6. **收尾**：发送结束信号，限时等待工作者，写报告，打印统计
//!
//! 会话只在本任务内使用，与对账工作者之间只通过队列通信。

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::time::{timeout, Instant};
use tracing::{error, info, warn};

use crate::browser;
use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::{ChromeSession, CommandCompressor, Compressor, Mailbox, SessionAdapter, SpoolMailbox};
use crate::models::claim::OutcomeStatus;
use crate::models::{list_profiles, load_profile};
use crate::models::profile::StrategyProfile;
use crate::models::reconciliation::ReconciliationJob;
use crate::models::summary::{RunSummary, WorkerStatus};
use crate::orchestrator::progress::{ProgressEvent, ProgressSender};
use crate::reconciliation::{reconciliation_queue, ReconciliationWorker};
use crate::services::{PatternResolver, ReportWriter, SizeGuard};
use crate::utils::{init_log_file, log_claims_loaded, log_startup, print_final_stats};
use crate::workflow::{ClaimCtx, ClaimFlow, InsurerStrategy, ProfileStrategy};

/// 应用主结构
pub struct App {
    config: Config,
    strategy: ProfileStrategy,
    resolver: PatternResolver,
    session: Box<dyn SessionAdapter>,
    mailbox: Option<Box<dyn Mailbox>>,
    compressor: Option<Arc<dyn Compressor>>,
    progress: ProgressSender,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        init_log_file(&config.output_log_file)?;

        let profile = match load_profile(&config.profile_path).await {
            Ok(profile) => profile,
            Err(e) => {
                if let Some(dir) = config.profile_path.parent() {
                    if let Ok(available) = list_profiles(dir).await {
                        warn!("⚠️ 可用的配置档: {:?}", available);
                    }
                }
                return Err(e);
            }
        };
        log_startup(&profile.name, profile.max_attempts);

        // 连接或启动浏览器
        let login_url = profile.login.url.clone();
        let (browser, page) = match config.browser_debug_port {
            Some(port) => browser::connect_to_browser(port, &login_url).await?,
            None => {
                browser::launch_browser(
                    &login_url,
                    config.headless,
                    config.chrome_executable.as_deref(),
                )
                .await?
            }
        };
        let session: Box<dyn SessionAdapter> = Box::new(ChromeSession::new(browser, page));

        let mailbox: Option<Box<dyn Mailbox>> = match &profile.reconciliation {
            Some(_) => Some(Box::new(SpoolMailbox::new(&config.mailbox_root))),
            None => None,
        };

        Self::new(config, profile, session, mailbox)
    }

    /// 用现成的会话与邮箱组装应用
    pub fn new(
        config: Config,
        profile: StrategyProfile,
        session: Box<dyn SessionAdapter>,
        mailbox: Option<Box<dyn Mailbox>>,
    ) -> Result<Self> {
        let resolver = PatternResolver::new(&profile.documents).map_err(AppError::from)?;
        let strategy = ProfileStrategy::new(profile, config.popup.clone()).map_err(AppError::from)?;

        let compressor = config
            .compress_command
            .as_deref()
            .and_then(CommandCompressor::parse)
            .map(|c| Arc::new(c) as Arc<dyn Compressor>);

        Ok(Self {
            config,
            strategy,
            resolver,
            session,
            mailbox,
            compressor,
            progress: ProgressSender::default(),
        })
    }

    /// 订阅进度事件
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// 运行应用主逻辑
    pub async fn run(&mut self) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::default();

        // ========== 登录 ==========
        info!("🔐 正在登录 {} ...", self.strategy.name());
        if let Err(e) = self.strategy.login(self.session.as_mut()).await {
            error!("❌ 登录失败: {}", e);
            return Err(AppError::login_failed(self.strategy.name(), e).into());
        }
        info!("✓ 登录成功");

        // ========== 扫描案卷 ==========
        if !self.config.claims_root.is_dir() {
            return Err(
                AppError::directory_not_found(self.config.claims_root.display().to_string()).into(),
            );
        }
        let folders = discover_claim_folders(&self.config.claims_root)
            .await
            .with_context(|| {
                format!("无法读取案卷根目录: {}", self.config.claims_root.display())
            })?;
        let total = folders.len();

        // ========== 启动对账工作者 ==========
        let reconciliation = self.strategy.profile().reconciliation.clone();
        let (mut producer, worker) = match (reconciliation, self.mailbox.take()) {
            (Some(profile), Some(mailbox)) => {
                let (producer, rx) = reconciliation_queue();
                let worker =
                    ReconciliationWorker::new(mailbox, self.config.reconciliation.clone(), &profile);
                (Some(producer), Some(worker.spawn(rx)))
            }
            (Some(_), None) => {
                warn!("⚠️ 配置档要求对账但没有可用邮箱，跳过对账");
                (None, None)
            }
            _ => (None, None),
        };

        log_claims_loaded(total, producer.is_some());
        self.progress.emit(ProgressEvent::RunStarted { total });

        // ========== 逐个处理案卷 ==========
        let mut flow = ClaimFlow::new(
            &self.strategy,
            &self.resolver,
            self.config.retry.clone(),
            self.config.diagnostics_dir.clone(),
        );
        if let Some(limit) = &self.strategy.profile().size_limit {
            flow = flow.with_size_guard(
                limit.document.clone(),
                SizeGuard::new(limit.max_bytes, self.compressor.clone()),
            );
        }

        let mut queued_receipts = HashSet::new();
        for (i, folder) in folders.iter().enumerate() {
            let ctx = ClaimCtx::new(folder_name(folder), i + 1, total);
            self.progress.emit(ProgressEvent::ClaimStarted {
                index: ctx.index,
                total,
                claim_id: ctx.claim_id.clone(),
            });

            let outcome = flow.run(self.session.as_mut(), folder, &ctx).await;
            summary.record_outcome(&outcome);
            self.progress.emit(ProgressEvent::ClaimFinished {
                claim_id: outcome.claim_id().to_string(),
                status: outcome.status(),
                receipt_code: outcome.receipt_code().map(str::to_string),
            });

            if outcome.status() != OutcomeStatus::Success {
                continue;
            }
            let Some(producer) = producer.as_mut() else {
                continue;
            };
            let Some(code) = outcome.receipt_code() else {
                warn!("{} ⚠️ 提交成功但没有受理号，不进入对账", ctx);
                continue;
            };
            if !queued_receipts.insert(code.to_string()) {
                warn!("{} ⚠️ 受理号 {} 已入队，不重复入队", ctx, code);
                continue;
            }
            if producer.enqueue(ReconciliationJob::new(code, outcome.folder())) {
                info!("{} 📨 受理号 {} 进入对账队列", ctx, code);
                self.progress.emit(ProgressEvent::JobQueued {
                    receipt_code: code.to_string(),
                });
            } else {
                warn!("{} ⚠️ 对账工作者已退出，受理号 {} 未入队", ctx, code);
            }
        }

        // ========== 等待对账结束 ==========
        if let (Some(producer), Some(handle)) = (producer, worker) {
            let queued = producer.close();
            info!("⏳ 已发送结束信号，等待对账工作者处理 {} 个任务...", queued);

            summary.worker = match timeout(self.config.reconciliation.join_timeout, handle).await {
                Ok(Ok(unresolved)) => {
                    summary.unresolved_jobs = unresolved;
                    WorkerStatus::Completed
                }
                Ok(Err(e)) => {
                    error!("❌ 对账工作者异常退出: {}", e);
                    WorkerStatus::Crashed(e.to_string())
                }
                Err(_) => {
                    warn!("⚠️ 对账工作者未能按时结束，不再等待");
                    WorkerStatus::TimedOut
                }
            };
            self.progress.emit(ProgressEvent::ReconciliationFinished {
                status: summary.worker.clone(),
                unresolved: summary.unresolved_jobs.len(),
            });
        }

        // ========== 汇总 ==========
        summary.elapsed = started.elapsed();
        if let Err(e) = ReportWriter::from_config(&self.config)
            .write_all(&summary)
            .await
        {
            error!("❌ 写入报告失败: {:#}", e);
        }
        print_final_stats(&summary, &self.config.output_log_file);
        self.progress.emit(ProgressEvent::RunFinished {
            counts: summary.counts,
        });

        Ok(summary)
    }
}

/// 扫描案卷文件夹
///
/// 数字名称按数值升序在前，其余按名称排序在后。
pub async fn discover_claim_folders(root: &Path) -> Result<Vec<PathBuf>> {
    let mut folders = Vec::new();
    let mut entries = fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            folders.push(entry.path());
        }
    }

    folders.sort_by_cached_key(|path| {
        let name = folder_name(path);
        match name.trim().parse::<u64>() {
            Ok(n) => (0, n, name),
            Err(_) => (1, 0, name),
        }
    });
    Ok(folders)
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_discover_orders_numeric_first() {
        let root = tempfile::tempdir().unwrap();
        for name in ["10", "9", "abc", "100", "Anexos", "2"] {
            std::fs::create_dir(root.path().join(name)).unwrap();
        }
        std::fs::write(root.path().join("1"), b"not a folder").unwrap();

        let folders = discover_claim_folders(root.path()).await.unwrap();
        let names: Vec<String> = folders.iter().map(|p| folder_name(p)).collect();
        assert_eq!(names, ["2", "9", "10", "100", "Anexos", "abc"]);
    }

    #[tokio::test]
    async fn test_discover_missing_root_is_error() {
        let root = tempfile::tempdir().unwrap();
        let result = discover_claim_folders(&root.path().join("nope")).await;
        tokio_test::assert_err!(result);
    }
}
