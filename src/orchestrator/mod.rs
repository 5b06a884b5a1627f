//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责一次运行的批量调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量案卷处理器
//! - 管理应用生命周期（初始化、登录、运行、收尾）
//! - 按确定顺序扫描案卷文件夹
//! - 唯一持有浏览器会话的模块
//! - 把成功案卷的受理号交给对账队列
//! - 限时等待对账工作者，写报告并输出统计
//!
//! ### `progress` - 进度事件
//! - 广播运行、案卷、对账的进度，订阅方只读
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<案卷文件夹>)      ──队列──▶ reconciliation::ReconciliationWorker
//!     ↓                                                     ↓
//! workflow::ClaimFlow (处理单个案卷)                   infrastructure (Mailbox)
//!     ↓
//! workflow::RetryController / SubmissionMachine
//!     ↓
//! services (能力层：extractor / popup / resolver / size guard / report)
//!     ↓
//! infrastructure (基础设施：SessionAdapter)
//! ```

pub mod batch_processor;
pub mod progress;

// 重新导出主要类型
pub use batch_processor::{discover_claim_folders, App};
pub use progress::{ProgressEvent, ProgressSender};
