//! 重试控制器 - 流程层
//!
//! 每次尝试：
//! 1. 检查页面是否出现连接错误标记，有则刷新恢复（不计入尝试次数）
//! 2. 非首次尝试先刷新页面并等待（刚因连接错误刷新过则跳过）
//! 3. 确认表单就绪后跑一遍状态机
//!
//! 重复发票立即结束；用尽次数后截图留证。

use chrono::Local;
use std::path::PathBuf;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::infrastructure::SessionAdapter;
use crate::models::claim::ClaimUnit;
use crate::workflow::strategy::InsurerStrategy;
use crate::workflow::submission::{AttemptResult, SubmissionMachine};
use crate::workflow::{note, warn_note};

/// 重试结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryVerdict {
    Submitted { receipt_code: Option<String> },
    Duplicate,
    /// 次数用尽
    Exhausted { last_error: String },
}

/// 重试控制器
pub struct RetryController<'a> {
    strategy: &'a dyn InsurerStrategy,
    policy: RetryPolicy,
    diagnostics_dir: PathBuf,
}

impl<'a> RetryController<'a> {
    pub fn new(
        strategy: &'a dyn InsurerStrategy,
        policy: RetryPolicy,
        diagnostics_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            strategy,
            policy,
            diagnostics_dir: diagnostics_dir.into(),
        }
    }

    pub async fn run(&self, session: &mut dyn SessionAdapter, claim: &mut ClaimUnit) -> RetryVerdict {
        let machine = SubmissionMachine::new(self.strategy);
        let max_attempts = self.strategy.max_attempts();
        let mut recoveries = 0;
        let mut reloaded = false;
        let mut attempt = 1;
        let mut last_error = String::new();

        while attempt <= max_attempts {
            claim.attempt_count = attempt;
            note(claim, format!("🔄 第 {}/{} 次尝试", attempt, max_attempts));

            let outcome = self
                .attempt(&machine, session, claim, attempt, reloaded, &mut recoveries)
                .await;
            reloaded = false;

            match outcome {
                Ok(AttemptResult::Submitted { receipt_code }) => {
                    note(claim, format!("✅ 第 {} 次尝试提交成功", attempt));
                    return RetryVerdict::Submitted { receipt_code };
                }
                Ok(AttemptResult::Duplicate) => return RetryVerdict::Duplicate,
                Err(AttemptFailure::Connectivity(message))
                    if recoveries < self.policy.max_connectivity_recoveries =>
                {
                    recoveries += 1;
                    warn_note(
                        claim,
                        format!(
                            "⚠️ {}，刷新后重新执行本次尝试 (恢复 {}/{})",
                            message, recoveries, self.policy.max_connectivity_recoveries
                        ),
                    );
                    self.reload(session, claim).await;
                    sleep(self.policy.connectivity_settle).await;
                    reloaded = true;
                }
                Err(AttemptFailure::Connectivity(message)) | Err(AttemptFailure::Failed(message)) => {
                    warn_note(claim, format!("❌ 第 {} 次尝试失败: {}", attempt, message));
                    if attempt == max_attempts {
                        self.capture_diagnostics(session, claim).await;
                    }
                    last_error = message;
                    attempt += 1;
                }
            }
        }

        RetryVerdict::Exhausted { last_error }
    }

    async fn attempt(
        &self,
        machine: &SubmissionMachine<'_>,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
        attempt: u32,
        reloaded: bool,
        recoveries: &mut u32,
    ) -> Result<AttemptResult, AttemptFailure> {
        self.recover_connectivity(session, claim, recoveries).await?;

        if attempt > 1 && !reloaded {
            self.reload(session, claim).await;
            sleep(self.policy.attempt_settle).await;
            self.recover_connectivity(session, claim, recoveries).await?;
        }

        let ready = self.strategy.form_ready_target();
        let visible = session
            .wait_visible(ready, self.policy.form_ready_timeout)
            .await
            .unwrap_or(false);
        if !visible {
            return Err(AttemptFailure::Failed(format!("表单未就绪: {}", ready)));
        }

        machine.run_attempt(session, claim).await.map_err(|e| {
            if e.source.is_connectivity() {
                AttemptFailure::Connectivity(e.to_string())
            } else {
                AttemptFailure::Failed(e.to_string())
            }
        })
    }

    /// 页面出现连接错误标记时刷新，直到标记消失或恢复次数用完
    async fn recover_connectivity(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
        recoveries: &mut u32,
    ) -> Result<(), AttemptFailure> {
        let markers = self.strategy.connectivity_markers();
        if markers.is_empty() {
            return Ok(());
        }

        loop {
            let content = match session.content().await {
                Ok(content) => content,
                Err(e) => {
                    warn!("[案卷 {}] 无法读取页面内容: {}", claim.id, e);
                    return Ok(());
                }
            };
            let Some(marker) = markers.iter().find(|m| content.contains(m.as_str())) else {
                return Ok(());
            };

            if *recoveries >= self.policy.max_connectivity_recoveries {
                return Err(AttemptFailure::Failed(format!(
                    "连接错误 \"{}\" 在 {} 次恢复后仍存在",
                    marker, recoveries
                )));
            }
            *recoveries += 1;
            warn_note(
                claim,
                format!("⚠️ 检测到连接错误 \"{}\"，刷新页面 (恢复 {})", marker, recoveries),
            );
            self.reload(session, claim).await;
            sleep(self.policy.connectivity_settle).await;
        }
    }

    async fn reload(&self, session: &mut dyn SessionAdapter, claim: &mut ClaimUnit) {
        match tokio::time::timeout(self.policy.reload_timeout, session.reload()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn_note(claim, format!("⚠️ 刷新页面失败: {}", e)),
            Err(_) => warn_note(claim, "⚠️ 刷新页面超时"),
        }
    }

    async fn capture_diagnostics(&self, session: &mut dyn SessionAdapter, claim: &mut ClaimUnit) {
        let path = self.diagnostics_dir.join(format!(
            "error_screenshot_{}_{}.png",
            sanitize(&claim.id),
            Local::now().format("%Y%m%d_%H%M%S")
        ));
        match session.screenshot(&path).await {
            Ok(()) => note(claim, format!("📸 诊断截图: {}", path.display())),
            Err(e) => warn_note(claim, format!("⚠️ 诊断截图失败: {}", e)),
        }
    }
}

/// 单次尝试失败的分类
enum AttemptFailure {
    Connectivity(String),
    Failed(String),
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PopupPolicy;
    use crate::models::profile::StrategyProfile;
    use crate::testing::{Call, Effect, Rule, ScriptedSession, Trigger};
    use crate::workflow::strategy::ProfileStrategy;

    const PROFILE: &str = r##"
        name = "demo"
        max_attempts = 4
        connectivity_markers = ["ERROR DE CONECTIVIDAD"]

        [login]
        url = "https://portal.test/login"
        ready = "#factura"

        [form]
        ready = "#factura"
        invoice_field = "#factura"

        [submit]
        button = "#enviar"
        success_marker = "#exito"
        max_polls = 3
    "##;

    fn strategy() -> ProfileStrategy {
        let profile: StrategyProfile = toml::from_str(PROFILE).unwrap();
        ProfileStrategy::new(profile, PopupPolicy::default()).unwrap()
    }

    fn claim(folder: &std::path::Path) -> ClaimUnit {
        let mut claim = ClaimUnit::new(folder);
        claim.invoice_code = Some("FEV1".to_string());
        claim
    }

    fn attempts_and_reloads(calls: &[Call]) -> Vec<&'static str> {
        calls
            .iter()
            .filter_map(|c| match c {
                Call::Reload => Some("reload"),
                Call::Click(t) if t == "#enviar" => Some("submit"),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_max_attempts_and_reloads_before_retry() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());
        let mut session = ScriptedSession::new().with_visible("#factura");
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert!(matches!(verdict, RetryVerdict::Exhausted { .. }));
        assert_eq!(claim.attempt_count, 4);

        let calls = session.handle().calls();
        assert_eq!(
            attempts_and_reloads(&calls),
            ["submit", "reload", "submit", "reload", "submit", "reload", "submit"]
        );
        // 只在最后一次截图
        assert_eq!(session.handle().screenshots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_short_circuits() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());
        let mut session = ScriptedSession::new()
            .with_visible("#factura")
            .with_rule(Rule::on(Trigger::Fill("#factura")).then(Effect::ClearValue("#factura")));
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert_eq!(verdict, RetryVerdict::Duplicate);
        assert_eq!(claim.attempt_count, 1);
        assert_eq!(session.handle().reloads(), 0);
        assert!(session.handle().uploads().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_recovery_does_not_consume_attempt() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());

        // 页面一开始就是连接错误，刷新一次后恢复；首次提交即成功
        let mut session = ScriptedSession::new()
            .with_visible("#factura")
            .with_content("ERROR DE CONECTIVIDAD")
            .with_rule(Rule::on(Trigger::Reload).then(Effect::SetContent("ok")).once())
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .then(Effect::Show("#exito"))
                    .then(Effect::SetText("#exito", "registrada - 31")),
            );
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert_eq!(
            verdict,
            RetryVerdict::Submitted {
                receipt_code: Some("31".to_string())
            }
        );
        assert_eq!(claim.attempt_count, 1);
        assert_eq!(session.handle().reloads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_second_attempt_after_reload() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());

        // 第一次提交后没有成功弹窗；刷新过的页面才会确认
        let mut session = ScriptedSession::new()
            .with_visible("#factura")
            .with_rule(
                Rule::on(Trigger::Reload)
                    .then(Effect::SetValue("#intento", "2"))
                    .once(),
            )
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .when_value("#intento", "2")
                    .then(Effect::Show("#exito"))
                    .then(Effect::SetText("#exito", "registrada - 88")),
            );
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert_eq!(
            verdict,
            RetryVerdict::Submitted {
                receipt_code: Some("88".to_string())
            }
        );
        assert_eq!(claim.attempt_count, 2);
        assert_eq!(session.handle().reloads(), 1);
        assert!(session.handle().screenshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connectivity_lost_while_confirming_reruns_same_attempt() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());

        // 第一次点击提交后页面变成连接错误，刷新后再提交即成功
        let mut session = ScriptedSession::new()
            .with_visible("#factura")
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .then(Effect::SetContent("<h1>ERROR DE CONECTIVIDAD</h1>"))
                    .once(),
            )
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .then(Effect::Show("#exito"))
                    .then(Effect::SetText("#exito", "registrada - 5")),
            )
            .with_rule(
                Rule::on(Trigger::Reload)
                    .then(Effect::SetContent("ok"))
                    .then(Effect::Hide("#exito")),
            );
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert_eq!(
            verdict,
            RetryVerdict::Submitted {
                receipt_code: Some("5".to_string())
            }
        );
        assert_eq!(claim.attempt_count, 1);
        assert_eq!(
            attempts_and_reloads(&session.handle().calls()),
            ["submit", "reload", "submit"]
        );
        assert!(session.handle().screenshots().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_connectivity_error_exhausts_recoveries() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());

        // 连接错误一直存在，刷新也无法恢复
        let mut session = ScriptedSession::new().with_visible("#factura").with_rule(
            Rule::on(Trigger::Click("#enviar"))
                .then(Effect::SetContent("<h1>ERROR DE CONECTIVIDAD</h1>")),
        );
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        let RetryVerdict::Exhausted { last_error } = verdict else {
            panic!("应当用尽尝试次数: {:?}", verdict);
        };
        assert!(last_error.contains("ERROR DE CONECTIVIDAD"));
        assert_eq!(claim.attempt_count, 4);

        // 恢复次数用完后不再刷新，也不再提交
        let handle = session.handle();
        assert_eq!(handle.reloads(), RetryPolicy::default().max_connectivity_recoveries as usize);
        assert_eq!(
            handle.clicks().iter().filter(|c| *c == "#enviar").count(),
            1
        );
        assert_eq!(handle.screenshots().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_reload_replaces_retry_reload() {
        let strategy = strategy();
        let dir = tempfile::tempdir().unwrap();
        let controller = RetryController::new(&strategy, RetryPolicy::default(), dir.path());

        // 第 1 次：表单未就绪；第 2 次：提交后连接错误；恢复后直接重跑第 2 次
        let mut session = ScriptedSession::new()
            .with_rule(
                Rule::on(Trigger::Reload)
                    .then(Effect::Show("#factura"))
                    .then(Effect::SetContent("ok"))
                    .then(Effect::Hide("#exito")),
            )
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .then(Effect::SetContent("<h1>ERROR DE CONECTIVIDAD</h1>"))
                    .once(),
            )
            .with_rule(
                Rule::on(Trigger::Click("#enviar"))
                    .then(Effect::Show("#exito"))
                    .then(Effect::SetText("#exito", "registrada - 7")),
            );
        let mut claim = claim(dir.path());

        let verdict = controller.run(&mut session, &mut claim).await;
        assert_eq!(
            verdict,
            RetryVerdict::Submitted {
                receipt_code: Some("7".to_string())
            }
        );
        assert_eq!(claim.attempt_count, 2);
        assert_eq!(
            attempts_and_reloads(&session.handle().calls()),
            ["reload", "submit", "reload", "submit"]
        );
    }
}
