//! 基础设施层（Infrastructure Layer）
//!
//! 持有稀缺资源（浏览器页面、邮箱连接、压缩程序），只暴露能力，不认识案卷。

pub mod chrome;
pub mod compressor;
pub mod mailbox;
pub mod session;
pub mod wait;

pub use chrome::ChromeSession;
pub use compressor::{CommandCompressor, Compressor};
pub use mailbox::{Attachment, FilenamePredicate, Mailbox, MessageId, SpoolMailbox};
pub use session::SessionAdapter;
pub use wait::{wait_until, Poller};
