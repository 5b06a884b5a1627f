//! # Claim Submit
//!
//! 把案卷文件夹批量提交到保险公司网页平台，并通过邮件异步找回回执的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构，外加一个独立的对账任务：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源，只暴露能力
//! - `SessionAdapter` / `ChromeSession` - 浏览器会话，同一时刻只有一个操作
//! - `Mailbox` / `SpoolMailbox` - 邮箱连接
//! - `Compressor` - 外部压缩程序
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个案卷
//! - `ConfirmationExtractor` - 从确认文本提取受理号
//! - `PopupDismisser` - 有界的弹窗清理
//! - `PatternResolver` - 识别文件与发票号
//! - `SizeGuard` - 主文件大小检查与一次性压缩
//! - `ReportWriter` - 写结果、失败、跳过报告
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个案卷"的完整处理流程
//! - `InsurerStrategy` - 保险公司差异，全部来自配置档
//! - `SubmissionMachine` - 单次尝试的状态机
//! - `RetryController` - 有界重试、连接恢复、重复发票短路
//! - `ClaimFlow` - 预检 → 识别 → 大小检查 → 提交
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 登录、逐个处理案卷、入队、收尾
//! - `orchestrator/progress` - 进度事件广播
//!
//! ### 对账（Reconciliation）
//! - `reconciliation/` - 无界队列 + 独占邮箱连接的工作者任务
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;
pub mod models;
pub mod orchestrator;
pub mod reconciliation;
pub mod services;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{ChromeSession, Mailbox, SessionAdapter, SpoolMailbox};
pub use models::{ClaimUnit, OutcomeStatus, RunSummary, StrategyProfile, SubmissionOutcome};
pub use orchestrator::{App, ProgressEvent};
pub use reconciliation::{reconciliation_queue, ReconciliationWorker};
pub use workflow::{ClaimCtx, ClaimFlow, InsurerStrategy, ProfileStrategy, RetryController};
