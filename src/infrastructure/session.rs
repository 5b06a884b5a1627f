//! 会话适配器接口
//!
//! 对一个有状态网页会话的原子操作。会话不是线程安全的，
//! 所有方法都要求 `&mut self`，同一时刻只能有一个操作在进行。

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SessionError;

/// 会话适配器
///
/// `target` 既可以是 CSS 选择器，也可以是 XPath（以 `/` 或 `(` 开头）。
#[async_trait]
pub trait SessionAdapter: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    async fn fill(&mut self, target: &str, value: &str) -> Result<(), SessionError>;

    async fn select_option(&mut self, target: &str, value: &str) -> Result<(), SessionError>;

    async fn upload_files(&mut self, target: &str, paths: &[PathBuf]) -> Result<(), SessionError>;

    /// 等待元素可见，返回是否在超时前出现
    async fn wait_visible(&mut self, target: &str, timeout: Duration) -> Result<bool, SessionError>;

    async fn click(&mut self, target: &str) -> Result<(), SessionError>;

    async fn text_of(&mut self, target: &str) -> Result<String, SessionError>;

    /// 读取输入框当前的值
    async fn value_of(&mut self, target: &str) -> Result<String, SessionError>;

    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError>;

    async fn reload(&mut self) -> Result<(), SessionError>;

    /// 当前页面的完整内容，用于查找连接错误标记
    async fn content(&mut self) -> Result<String, SessionError>;
}

/// 判断元素此刻是否可见（不等待）
pub async fn is_visible<S: SessionAdapter + ?Sized>(
    session: &mut S,
    target: &str,
) -> Result<bool, SessionError> {
    session.wait_visible(target, Duration::ZERO).await
}
