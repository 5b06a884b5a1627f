//! 测试替身
//!
//! `ScriptedSession` 是按规则响应的假会话，记录每一次调用；
//! `MemoryMailbox` 是内存邮箱，邮件可以在第 r 次搜索后才出现。
//! 单元测试与集成测试共用。

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{MailboxError, SessionError};
use crate::infrastructure::mailbox::{Attachment, FilenamePredicate, Mailbox, MessageId};
use crate::infrastructure::SessionAdapter;

// ========== 假会话 ==========

/// 会话调用记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Navigate(String),
    Fill(String, String),
    Select(String, String),
    Upload(String, Vec<PathBuf>),
    WaitVisible(String),
    Click(String),
    TextOf(String),
    ValueOf(String),
    Screenshot(PathBuf),
    Reload,
    Content,
}

/// 触发规则的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Navigate,
    Click(&'static str),
    Fill(&'static str),
    Upload(&'static str),
    Reload,
}

/// 规则命中后对页面状态的修改
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Show(&'static str),
    Hide(&'static str),
    SetText(&'static str, &'static str),
    SetValue(&'static str, &'static str),
    ClearValue(&'static str),
    SetContent(&'static str),
}

/// 响应规则
#[derive(Debug, Clone)]
pub struct Rule {
    trigger: Trigger,
    condition: Option<(&'static str, &'static str)>,
    effects: Vec<Effect>,
    once: bool,
    fired: bool,
}

impl Rule {
    pub fn on(trigger: Trigger) -> Self {
        Self {
            trigger,
            condition: None,
            effects: Vec::new(),
            once: false,
            fired: false,
        }
    }

    /// 仅当输入框 `field` 当前值为 `value` 时生效
    pub fn when_value(mut self, field: &'static str, value: &'static str) -> Self {
        self.condition = Some((field, value));
        self
    }

    pub fn then(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// 只生效一次
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }
}

#[derive(Debug, Default)]
struct PageState {
    calls: Vec<Call>,
    visible: HashSet<String>,
    values: HashMap<String, String>,
    texts: HashMap<String, String>,
    broken: HashSet<String>,
    content: String,
    rules: Vec<Rule>,
}

impl PageState {
    fn fire(&mut self, matches: impl Fn(&Trigger) -> bool) {
        let mut effects = Vec::new();
        for rule in self.rules.iter_mut() {
            if !matches(&rule.trigger) || (rule.once && rule.fired) {
                continue;
            }
            if let Some((field, value)) = rule.condition {
                if self.values.get(field).map(String::as_str) != Some(value) {
                    continue;
                }
            }
            rule.fired = true;
            effects.extend(rule.effects.iter().copied());
        }
        for effect in effects {
            self.apply(effect);
        }
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Show(target) => {
                self.visible.insert(target.to_string());
            }
            Effect::Hide(target) => {
                self.visible.remove(target);
            }
            Effect::SetText(target, text) => {
                self.texts.insert(target.to_string(), text.to_string());
            }
            Effect::SetValue(target, value) => {
                self.values.insert(target.to_string(), value.to_string());
            }
            Effect::ClearValue(target) => {
                self.values.remove(target);
            }
            Effect::SetContent(content) => self.content = content.to_string(),
        }
    }

    fn check_broken(&self, target: &str) -> Result<(), SessionError> {
        if self.broken.contains(target) {
            return Err(SessionError::ElementNotFound {
                target: target.to_string(),
            });
        }
        Ok(())
    }
}

/// 规则驱动的假会话
///
/// 看不见的元素在 `wait_visible` 中会等满超时（tokio 时钟），
/// 刷新页面会清空所有输入框的值。
#[derive(Debug, Clone, Default)]
pub struct ScriptedSession {
    state: Arc<Mutex<PageState>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_visible(self, target: &str) -> Self {
        self.lock().visible.insert(target.to_string());
        self
    }

    pub fn with_content(self, content: &str) -> Self {
        self.lock().content = content.to_string();
        self
    }

    /// 对该元素的任何操作都报"元素不存在"
    pub fn with_broken(self, target: &str) -> Self {
        self.lock().broken.insert(target.to_string());
        self
    }

    pub fn with_rule(self, rule: Rule) -> Self {
        self.lock().rules.push(rule);
        self
    }

    /// 用于断言的共享句柄
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 假会话的观察句柄
#[derive(Debug, Clone)]
pub struct SessionHandle {
    state: Arc<Mutex<PageState>>,
}

impl SessionHandle {
    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Click(target) => Some(target),
                _ => None,
            })
            .collect()
    }

    pub fn uploads(&self) -> Vec<(String, Vec<PathBuf>)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Upload(target, paths) => Some((target, paths)),
                _ => None,
            })
            .collect()
    }

    pub fn reloads(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Reload).count()
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Screenshot(path) => Some(path),
                _ => None,
            })
            .collect()
    }

    pub fn value(&self, target: &str) -> Option<String> {
        self.lock().values.get(target).cloned()
    }

    pub fn is_visible(&self, target: &str) -> bool {
        self.lock().visible.contains(target)
    }
}

#[async_trait]
impl SessionAdapter for ScriptedSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Navigate(url.to_string()));
        state.fire(|t| *t == Trigger::Navigate);
        Ok(())
    }

    async fn fill(&mut self, target: &str, value: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Fill(target.to_string(), value.to_string()));
        state.check_broken(target)?;
        state.values.insert(target.to_string(), value.to_string());
        state.fire(|t| matches!(t, Trigger::Fill(x) if *x == target));
        Ok(())
    }

    async fn select_option(&mut self, target: &str, value: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Select(target.to_string(), value.to_string()));
        state.check_broken(target)?;
        state.values.insert(target.to_string(), value.to_string());
        Ok(())
    }

    async fn upload_files(&mut self, target: &str, paths: &[PathBuf]) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Upload(target.to_string(), paths.to_vec()));
        state.check_broken(target)?;
        state.fire(|t| matches!(t, Trigger::Upload(x) if *x == target));
        Ok(())
    }

    async fn wait_visible(&mut self, target: &str, timeout: Duration) -> Result<bool, SessionError> {
        {
            let mut state = self.lock();
            state.calls.push(Call::WaitVisible(target.to_string()));
            if state.visible.contains(target) {
                return Ok(true);
            }
        }
        if !timeout.is_zero() {
            sleep(timeout).await;
        }
        Ok(self.lock().visible.contains(target))
    }

    async fn click(&mut self, target: &str) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Click(target.to_string()));
        state.check_broken(target)?;
        state.fire(|t| matches!(t, Trigger::Click(x) if *x == target));
        Ok(())
    }

    async fn text_of(&mut self, target: &str) -> Result<String, SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::TextOf(target.to_string()));
        state.check_broken(target)?;
        Ok(state.texts.get(target).cloned().unwrap_or_default())
    }

    async fn value_of(&mut self, target: &str) -> Result<String, SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::ValueOf(target.to_string()));
        state.check_broken(target)?;
        Ok(state.values.get(target).cloned().unwrap_or_default())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError> {
        self.lock().calls.push(Call::Screenshot(path.to_path_buf()));
        std::fs::write(path, b"\x89PNG").map_err(|source| SessionError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    async fn reload(&mut self) -> Result<(), SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Reload);
        state.values.clear();
        state.fire(|t| *t == Trigger::Reload);
        Ok(())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        let mut state = self.lock();
        state.calls.push(Call::Content);
        Ok(state.content.clone())
    }
}

// ========== 假邮箱 ==========

/// 内存邮件
#[derive(Debug, Clone)]
pub struct FakeMessage {
    pub id: MessageId,
    pub from: String,
    pub date: NaiveDate,
    pub attachments: Vec<Attachment>,
    /// 第几次搜索起可见（0 表示一开始就在）
    pub visible_from_search: u32,
}

impl FakeMessage {
    pub fn new(id: &str, from: &str, date: NaiveDate, attachment_name: &str) -> Self {
        Self {
            id: id.to_string(),
            from: from.to_string(),
            date,
            attachments: vec![Attachment {
                filename: attachment_name.to_string(),
                bytes: b"%PDF-1.4 radicado".to_vec(),
            }],
            visible_from_search: 0,
        }
    }

    pub fn arriving_on_search(mut self, search: u32) -> Self {
        self.visible_from_search = search;
        self
    }
}

#[derive(Debug, Default)]
struct MailState {
    connected: bool,
    inbox: Vec<FakeMessage>,
    moved: Vec<(MessageId, String)>,
    searches: u32,
    noops: u32,
    connects: u32,
    fail_noops: u32,
}

/// 内存邮箱
#[derive(Debug, Clone, Default)]
pub struct MemoryMailbox {
    state: Arc<Mutex<MailState>>,
}

impl MemoryMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_message(self, message: FakeMessage) -> Self {
        self.lock().inbox.push(message);
        self
    }

    pub fn handle(&self) -> MailboxHandle {
        MailboxHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// 假邮箱的观察句柄
#[derive(Debug, Clone)]
pub struct MailboxHandle {
    state: Arc<Mutex<MailState>>,
}

impl MailboxHandle {
    fn lock(&self) -> MutexGuard<'_, MailState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn searches(&self) -> u32 {
        self.lock().searches
    }

    pub fn noops(&self) -> u32 {
        self.lock().noops
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn moved(&self) -> Vec<(MessageId, String)> {
        self.lock().moved.clone()
    }

    pub fn inbox_len(&self) -> usize {
        self.lock().inbox.len()
    }

    /// 接下来的 `n` 次 NOOP 失败并断开连接
    pub fn fail_noops(&self, n: u32) {
        self.lock().fail_noops = n;
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn connect(&mut self) -> Result<(), MailboxError> {
        let mut state = self.lock();
        state.connects += 1;
        state.connected = true;
        Ok(())
    }

    async fn noop(&mut self) -> Result<(), MailboxError> {
        let mut state = self.lock();
        state.noops += 1;
        if !state.connected {
            return Err(MailboxError::NotConnected);
        }
        if state.fail_noops > 0 {
            state.fail_noops -= 1;
            state.connected = false;
            return Err(MailboxError::ConnectionFailed("连接已断开".to_string()));
        }
        Ok(())
    }

    async fn search_by_sender_and_date(
        &mut self,
        sender: &str,
        date: NaiveDate,
    ) -> Result<Vec<MessageId>, MailboxError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(MailboxError::NotConnected);
        }
        state.searches += 1;
        let searches = state.searches;
        Ok(state
            .inbox
            .iter()
            .rev()
            .filter(|m| m.visible_from_search <= searches)
            .filter(|m| m.from.eq_ignore_ascii_case(sender) && m.date == date)
            .map(|m| m.id.clone())
            .collect())
    }

    async fn fetch_attachment(
        &mut self,
        id: &MessageId,
        predicate: &FilenamePredicate,
    ) -> Result<Option<Attachment>, MailboxError> {
        let state = self.lock();
        if !state.connected {
            return Err(MailboxError::NotConnected);
        }
        let message = state
            .inbox
            .iter()
            .find(|m| &m.id == id)
            .ok_or_else(|| MailboxError::MessageNotFound(id.clone()))?;
        Ok(message
            .attachments
            .iter()
            .find(|a| predicate(&a.filename))
            .cloned())
    }

    async fn move_and_delete(&mut self, id: &MessageId, folder: &str) -> Result<(), MailboxError> {
        let mut state = self.lock();
        if !state.connected {
            return Err(MailboxError::NotConnected);
        }
        let index = state
            .inbox
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| MailboxError::MessageNotFound(id.clone()))?;
        state.inbox.remove(index);
        state.moved.push((id.clone(), folder.to_string()));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MailboxError> {
        self.lock().connected = false;
        Ok(())
    }
}
