//! 保险公司策略 - 流程层
//!
//! 各保险公司之间的差异只体现在策略上，重试控制与状态机是同一份。

use async_trait::async_trait;
use chrono::Local;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use crate::config::PopupPolicy;
use crate::error::{ProfileError, SessionError, StepError};
use crate::infrastructure::session::is_visible;
use crate::infrastructure::wait::Poller;
use crate::infrastructure::SessionAdapter;
use crate::models::claim::ClaimUnit;
use crate::models::profile::{FormAction, PrecheckRules, StrategyProfile};
use crate::services::{ConfirmationExtractor, PopupDismisser};
use crate::utils::truncate_text;
use crate::workflow::{note, warn_note};

/// 表单填写结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Filled,
    /// 页面清空了发票号，视为重复发票
    Duplicate,
}

/// 最终确认结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    /// 成功弹窗的文本
    pub text: String,
    pub receipt_code: Option<String>,
}

/// 保险公司策略
///
/// 会话由调用方独占持有，策略本身不持有任何资源。
#[async_trait]
pub trait InsurerStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn max_attempts(&self) -> u32;

    /// 页面内容中表示连接中断的文本
    fn connectivity_markers(&self) -> &[String];

    /// 表单就绪时可见的关键输入框
    fn form_ready_target(&self) -> &str;

    fn precheck_rules(&self) -> &PrecheckRules;

    async fn login(&self, session: &mut dyn SessionAdapter) -> Result<(), StepError>;

    async fn fill_form(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<FillOutcome, StepError>;

    async fn upload_files(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<(), StepError>;

    async fn confirm_and_extract(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<Confirmation, StepError>;

    /// 关闭成功弹窗，等待表单可以接收下一个案卷
    async fn reset(&self, session: &mut dyn SessionAdapter) -> Result<(), StepError>;
}

/// 由配置档驱动的策略
pub struct ProfileStrategy {
    profile: StrategyProfile,
    precheck: PrecheckRules,
    popups: PopupDismisser,
    extractor: ConfirmationExtractor,
}

impl ProfileStrategy {
    pub fn new(profile: StrategyProfile, popup_policy: PopupPolicy) -> Result<Self, ProfileError> {
        profile.validate()?;

        let popups = PopupDismisser::new(
            &profile.popups,
            &profile.submit.success_marker,
            popup_policy,
        );
        let extractor = ConfirmationExtractor::new(&profile.receipt_pattern)?;

        // 成功截图本身也是"已提交"标记
        let mut precheck = profile.precheck.clone();
        if let Some(name) = &profile.receipt_screenshot {
            if !precheck.marker_files.contains(name) {
                precheck.marker_files.push(name.clone());
            }
        }

        Ok(Self {
            profile,
            precheck,
            popups,
            extractor,
        })
    }

    pub fn profile(&self) -> &StrategyProfile {
        &self.profile
    }

    async fn run_actions(
        &self,
        session: &mut dyn SessionAdapter,
        actions: &[FormAction],
        invoice: &str,
    ) -> Result<(), StepError> {
        for action in actions {
            match action {
                FormAction::Fill { target, value } => {
                    session.fill(target, &render_value(value, invoice)).await?
                }
                FormAction::Select { target, value } => {
                    session
                        .select_option(target, &render_value(value, invoice))
                        .await?
                }
                FormAction::Click { target } => session.click(target).await?,
                FormAction::Wait {
                    target,
                    timeout_secs,
                } => {
                    if !session
                        .wait_visible(target, Duration::from_secs(*timeout_secs))
                        .await?
                    {
                        return Err(SessionError::Timeout {
                            target: target.clone(),
                        }
                        .into());
                    }
                }
                FormAction::DismissPopups => {
                    self.popups.dismiss(session).await;
                }
            }
        }
        Ok(())
    }

    /// 回读发票号输入框，判断是否被页面清空
    async fn invoice_kept(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
        invoice: &str,
    ) -> Result<bool, StepError> {
        let policy = &self.profile.form.duplicate;
        let field = &self.profile.form.invoice_field;

        sleep(Duration::from_millis(policy.settle_ms)).await;

        // 先看提示再清弹窗，提示本身可能就是一个弹窗
        let advisory = match &policy.advisory {
            Some(target) => is_visible(session, target).await.unwrap_or(false),
            None => false,
        };
        self.popups.dismiss(session).await;

        let value = session.value_of(field).await?;
        if !value.trim().is_empty() {
            return Ok(true);
        }

        if advisory {
            warn_note(claim, "⚠️ 发票号被清空，但页面显示非阻断提示，重新填写后继续");
            session.fill(field, invoice).await?;
            return Ok(true);
        }

        warn_note(claim, format!("⚠️ 发票号 {} 被页面清空，判定为重复发票", invoice));
        Ok(false)
    }

    fn is_optional(&self, document: &str) -> bool {
        self.profile
            .documents
            .iter()
            .any(|rule| rule.kind == document && rule.optional)
    }

    async fn page_has_connectivity_marker(
        &self,
        session: &mut dyn SessionAdapter,
    ) -> Result<bool, StepError> {
        if self.profile.connectivity_markers.is_empty() {
            return Ok(false);
        }
        let content = session.content().await?;
        Ok(self
            .profile
            .connectivity_markers
            .iter()
            .any(|marker| content.contains(marker.as_str())))
    }
}

#[async_trait]
impl InsurerStrategy for ProfileStrategy {
    fn name(&self) -> &str {
        &self.profile.name
    }

    fn max_attempts(&self) -> u32 {
        self.profile.max_attempts
    }

    fn connectivity_markers(&self) -> &[String] {
        &self.profile.connectivity_markers
    }

    fn form_ready_target(&self) -> &str {
        &self.profile.form.ready
    }

    fn precheck_rules(&self) -> &PrecheckRules {
        &self.precheck
    }

    async fn login(&self, session: &mut dyn SessionAdapter) -> Result<(), StepError> {
        let login = &self.profile.login;
        session.navigate(&login.url).await?;

        if let Some(marker) = &login.server_down_marker {
            let content = session.content().await?;
            if content.contains(marker.as_str()) {
                return Err(StepError::ServerUnavailable {
                    marker: marker.clone(),
                });
            }
        }

        self.run_actions(session, &login.actions, "").await?;
        self.popups.dismiss(session).await;

        let timeout = Duration::from_secs(login.ready_timeout_secs);
        if !session.wait_visible(&login.ready, timeout).await? {
            return Err(StepError::FormNotReady {
                target: login.ready.clone(),
            });
        }
        Ok(())
    }

    async fn fill_form(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<FillOutcome, StepError> {
        let form = &self.profile.form;
        let invoice = claim.invoice_code.clone().unwrap_or_default();

        self.run_actions(session, &form.before_invoice, &invoice)
            .await?;

        session.fill(&form.invoice_field, &invoice).await?;
        note(claim, format!("✏️ 已填写发票号 {}", invoice));

        if form.duplicate.enabled && !self.invoice_kept(session, claim, &invoice).await? {
            return Ok(FillOutcome::Duplicate);
        }

        self.run_actions(session, &form.after_invoice, &invoice)
            .await?;

        if form.duplicate.enabled
            && form.duplicate.recheck_after_fill
            && !self.invoice_kept(session, claim, &invoice).await?
        {
            return Ok(FillOutcome::Duplicate);
        }

        note(claim, "✓ 表单填写完成");
        Ok(FillOutcome::Filled)
    }

    async fn upload_files(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<(), StepError> {
        for slot in &self.profile.uploads {
            let Some(path) = claim.document(&slot.document).map(PathBuf::from) else {
                if self.is_optional(&slot.document) {
                    continue;
                }
                return Err(StepError::MissingDocument {
                    document: slot.document.clone(),
                });
            };

            session
                .upload_files(&slot.target, std::slice::from_ref(&path))
                .await?;

            let timeout = Duration::from_secs(slot.timeout_secs);
            if !session.wait_visible(&slot.confirmation, timeout).await? {
                return Err(StepError::UploadUnconfirmed {
                    document: slot.document.clone(),
                });
            }
            note(claim, format!("📎 已上传 {}", slot.document));
        }
        Ok(())
    }

    async fn confirm_and_extract(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<Confirmation, StepError> {
        let submit = &self.profile.submit;

        self.popups.dismiss(session).await;
        session.click(&submit.button).await?;
        note(claim, "📤 已点击提交，等待确认...");

        let mut poller = Poller::new(Duration::from_millis(submit.poll_interval_ms), submit.max_polls);
        let mut continued = false;
        loop {
            if self.page_has_connectivity_marker(session).await? {
                return Err(StepError::ConnectivityLost);
            }
            if is_visible(session, &submit.success_marker).await? {
                break;
            }
            if !continued {
                if let Some(control) = &submit.continue_control {
                    if is_visible(session, control).await? {
                        session.click(control).await?;
                        continued = true;
                        poller.extend(submit.extended_polls);
                        note(claim, "▶️ 已点击继续，延长等待");
                    }
                }
            }
            if !poller.tick().await {
                return Err(StepError::ConfirmationTimeout {
                    polls: poller.used(),
                });
            }
        }

        let text = match session.text_of(submit.success_text_target()).await {
            Ok(text) => text,
            Err(e) => {
                warn_note(claim, format!("⚠️ 无法读取确认文本: {}", e));
                String::new()
            }
        };
        debug!("确认文本: {}", truncate_text(&text, 120));
        let receipt_code = self.extractor.extract(&text);

        if let Some(name) = &self.profile.receipt_screenshot {
            let path = claim.folder.join(name);
            if let Err(e) = session.screenshot(&path).await {
                warn_note(claim, format!("⚠️ 保存确认截图失败: {}", e));
            }
        }

        Ok(Confirmation { text, receipt_code })
    }

    async fn reset(&self, session: &mut dyn SessionAdapter) -> Result<(), StepError> {
        let submit = &self.profile.submit;

        if let Some(dismiss) = &submit.dismiss {
            if session.wait_visible(dismiss, Duration::from_secs(2)).await? {
                session.click(dismiss).await?;
            }
        }
        self.popups.dismiss(session).await;

        let timeout = Duration::from_secs(submit.reset_timeout_secs);
        if !session.wait_visible(&self.profile.form.ready, timeout).await? {
            return Err(StepError::FormNotReady {
                target: self.profile.form.ready.clone(),
            });
        }
        Ok(())
    }
}

/// 替换 `{invoice}` 与 `{today}` 占位符
pub fn render_value(template: &str, invoice: &str) -> String {
    let mut value = template.replace("{invoice}", invoice);
    if value.contains("{today}") {
        value = value.replace("{today}", &Local::now().format("%Y-%m-%d").to_string());
    }
    value
}
