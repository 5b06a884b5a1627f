//! 邮箱接口与目录邮箱实现

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::MailboxError;

pub type MessageId = String;

/// 附件文件名判定
pub type FilenamePredicate = dyn Fn(&str) -> bool + Send + Sync;

/// 邮件附件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// 邮箱连接
///
/// 同一时刻只有一个操作在进行，由对账工作者独占。
#[async_trait]
pub trait Mailbox: Send {
    async fn connect(&mut self) -> Result<(), MailboxError>;

    /// 保活
    async fn noop(&mut self) -> Result<(), MailboxError>;

    /// 按发件人与日期查找邮件，新邮件在前
    async fn search_by_sender_and_date(
        &mut self,
        sender: &str,
        date: NaiveDate,
    ) -> Result<Vec<MessageId>, MailboxError>;

    /// 取第一个文件名满足条件的附件
    async fn fetch_attachment(
        &mut self,
        id: &MessageId,
        predicate: &FilenamePredicate,
    ) -> Result<Option<Attachment>, MailboxError>;

    /// 移入目标文件夹并从收件箱删除
    async fn move_and_delete(&mut self, id: &MessageId, folder: &str) -> Result<(), MailboxError>;

    async fn disconnect(&mut self) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[async_trait]
impl<M: Mailbox + ?Sized> Mailbox for Box<M> {
    async fn connect(&mut self) -> Result<(), MailboxError> {
        (**self).connect().await
    }

    async fn noop(&mut self) -> Result<(), MailboxError> {
        (**self).noop().await
    }

    async fn search_by_sender_and_date(
        &mut self,
        sender: &str,
        date: NaiveDate,
    ) -> Result<Vec<MessageId>, MailboxError> {
        (**self).search_by_sender_and_date(sender, date).await
    }

    async fn fetch_attachment(
        &mut self,
        id: &MessageId,
        predicate: &FilenamePredicate,
    ) -> Result<Option<Attachment>, MailboxError> {
        (**self).fetch_attachment(id, predicate).await
    }

    async fn move_and_delete(&mut self, id: &MessageId, folder: &str) -> Result<(), MailboxError> {
        (**self).move_and_delete(id, folder).await
    }

    async fn disconnect(&mut self) -> Result<(), MailboxError> {
        (**self).disconnect().await
    }
}

/// 邮件元数据文件名
const META_FILE: &str = "message.toml";
const INBOX: &str = "INBOX";

#[derive(Debug, Deserialize)]
struct MessageMeta {
    from: String,
    date: NaiveDate,
}

/// 目录邮箱
///
/// 布局：
/// ```text
/// <root>/INBOX/<id>/message.toml   (from, date)
/// <root>/INBOX/<id>/<附件>
/// <root>/<已处理文件夹>/<id>/...
/// ```
pub struct SpoolMailbox {
    root: PathBuf,
    connected: bool,
}

impl SpoolMailbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            connected: false,
        }
    }

    fn inbox(&self) -> PathBuf {
        self.root.join(INBOX)
    }

    fn ensure_connected(&self) -> Result<(), MailboxError> {
        if self.connected {
            Ok(())
        } else {
            Err(MailboxError::NotConnected)
        }
    }

    fn message_dir(&self, id: &MessageId) -> Result<PathBuf, MailboxError> {
        let dir = self.inbox().join(id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(MailboxError::MessageNotFound(id.clone()))
        }
    }

    async fn read_meta(dir: &Path, id: &str) -> Result<MessageMeta, MailboxError> {
        let content = fs::read_to_string(dir.join(META_FILE)).await?;
        toml::from_str(&content).map_err(|e| MailboxError::Metadata {
            id: id.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl Mailbox for SpoolMailbox {
    async fn connect(&mut self) -> Result<(), MailboxError> {
        if !self.inbox().is_dir() {
            self.connected = false;
            return Err(MailboxError::ConnectionFailed(format!(
                "收件箱不存在: {}",
                self.inbox().display()
            )));
        }
        self.connected = true;
        debug!("已打开目录邮箱: {}", self.root.display());
        Ok(())
    }

    async fn noop(&mut self) -> Result<(), MailboxError> {
        self.ensure_connected()?;
        if !self.inbox().is_dir() {
            self.connected = false;
            return Err(MailboxError::ConnectionFailed("收件箱已不可访问".to_string()));
        }
        Ok(())
    }

    async fn search_by_sender_and_date(
        &mut self,
        sender: &str,
        date: NaiveDate,
    ) -> Result<Vec<MessageId>, MailboxError> {
        self.ensure_connected()?;

        let mut ids = Vec::new();
        let mut entries = fs::read_dir(self.inbox()).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().to_string();
            // 元数据损坏的邮件直接跳过
            let Ok(meta) = Self::read_meta(&entry.path(), &id).await else {
                continue;
            };
            if meta.from.eq_ignore_ascii_case(sender) && meta.date == date {
                ids.push(id);
            }
        }

        ids.sort_unstable_by(|a, b| b.cmp(a));
        Ok(ids)
    }

    async fn fetch_attachment(
        &mut self,
        id: &MessageId,
        predicate: &FilenamePredicate,
    ) -> Result<Option<Attachment>, MailboxError> {
        self.ensure_connected()?;
        let dir = self.message_dir(id)?;

        let mut names = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name != META_FILE && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();

        for name in names {
            if predicate(&name) {
                let bytes = fs::read(dir.join(&name)).await?;
                return Ok(Some(Attachment {
                    filename: name,
                    bytes,
                }));
            }
        }
        Ok(None)
    }

    async fn move_and_delete(&mut self, id: &MessageId, folder: &str) -> Result<(), MailboxError> {
        self.ensure_connected()?;
        let source = self.message_dir(id)?;
        let target_dir = self.root.join(folder);
        fs::create_dir_all(&target_dir).await?;

        let target = target_dir.join(id);
        if target.exists() {
            fs::remove_dir_all(&target).await?;
        }
        fs::rename(&source, &target).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MailboxError> {
        self.connected = false;
        Ok(())
    }
}
