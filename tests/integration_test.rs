use chrono::Local;
use claim_submit::browser::launch_browser;
use claim_submit::config::{Config, ReconciliationConfig};
use claim_submit::error::AppError;
use claim_submit::infrastructure::{ChromeSession, Mailbox, SessionAdapter};
use claim_submit::logger;
use claim_submit::models::{OutcomeCounts, StrategyProfile, WorkerStatus};
use claim_submit::orchestrator::{App, ProgressEvent};
use claim_submit::testing::{Call, Effect, FakeMessage, MemoryMailbox, Rule, ScriptedSession, Trigger};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SENDER: &str = "radicacion@aseguradora.test";

fn profile_toml(with_reconciliation: bool) -> String {
    let mut src = r##"
        name = "Aseguradora de prueba"
        max_attempts = 3
        receipt_pattern = 'registrada correctamente\s*-\s*(\d+)'

        [precheck]
        marker_files = ["RAD.pdf"]
        marker_suffixes = ["-recibido.pdf"]
        exclusion_words = ["NO RADICAR", "CARTERA"]

        [login]
        url = "https://portal.test/login"
        server_down_marker = "Servidor no disponible"
        ready = "#factura"

        [form]
        ready = "#factura"
        invoice_field = "#factura"

        [[documents]]
        kind = "factura"
        pattern = '^(?P<invoice>fev\d+)\.pdf$'
        invoice_source = true

        [[uploads]]
        document = "factura"
        target = "#file-factura"
        confirmation = "#ok-factura"

        [submit]
        button = "#enviar"
        success_marker = "#exito"
        dismiss = "#exito-cerrar"
        max_polls = 3
    "##
    .to_string();
    if with_reconciliation {
        src.push_str(&format!("\n[reconciliation]\nsender = \"{}\"\n", SENDER));
    }
    src
}

fn profile(with_reconciliation: bool) -> StrategyProfile {
    toml::from_str(&profile_toml(with_reconciliation)).unwrap()
}

/// 在 `root/claims` 下创建案卷文件夹
fn make_claim(root: &Path, folder: &str, files: &[&str]) {
    let dir = root.join("claims").join(folder);
    std::fs::create_dir_all(&dir).unwrap();
    for file in files {
        std::fs::write(dir.join(file), b"%PDF-1.4").unwrap();
    }
}

fn config(root: &TempDir) -> Config {
    let diagnostics = root.path().join("diagnostics");
    std::fs::create_dir_all(&diagnostics).unwrap();
    Config {
        claims_root: root.path().join("claims"),
        output_log_file: root.path().join("output.txt"),
        results_file: root.path().join("submission_results.json"),
        failures_report: root.path().join("failures.txt"),
        omissions_report: root.path().join("omissions.txt"),
        diagnostics_dir: diagnostics,
        reconciliation: ReconciliationConfig {
            max_retries: 3,
            ..ReconciliationConfig::default()
        },
        ..Config::default()
    }
}

/// FEV1 被页面清空（重复发票），FEV2 提交成功得到 999，FEV3 始终没有确认
fn portal() -> ScriptedSession {
    ScriptedSession::new()
        .with_visible("#factura")
        .with_rule(
            Rule::on(Trigger::Fill("#factura"))
                .when_value("#factura", "FEV1")
                .then(Effect::ClearValue("#factura")),
        )
        .with_rule(Rule::on(Trigger::Upload("#file-factura")).then(Effect::Show("#ok-factura")))
        .with_rule(
            Rule::on(Trigger::Click("#enviar"))
                .when_value("#factura", "FEV2")
                .then(Effect::Show("#exito"))
                .then(Effect::Show("#exito-cerrar"))
                .then(Effect::SetText(
                    "#exito",
                    "Su reclamacion registrada correctamente - 999",
                )),
        )
        .with_rule(
            Rule::on(Trigger::Click("#exito-cerrar"))
                .then(Effect::Hide("#exito"))
                .then(Effect::Hide("#exito-cerrar")),
        )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_duplicate_success_failure() {
    logger::init();
    let root = tempfile::tempdir().unwrap();
    make_claim(root.path(), "1", &["FEV1.pdf"]);
    make_claim(root.path(), "2", &["FEV2.pdf"]);
    make_claim(root.path(), "3", &["FEV3.pdf"]);

    let mailbox = MemoryMailbox::new().with_message(
        FakeMessage::new("m-999", SENDER, Local::now().date_naive(), "Radicado_999.pdf")
            .arriving_on_search(2),
    );
    let mail = mailbox.handle();
    let session = portal();
    let page = session.handle();

    let config = config(&root);
    let mut app = App::new(
        config.clone(),
        profile(true),
        Box::new(session),
        Some(Box::new(mailbox) as Box<dyn Mailbox>),
    )
    .unwrap();
    let mut events = app.subscribe();

    let summary = app.run().await.unwrap();

    assert_eq!(
        summary.counts,
        OutcomeCounts {
            success: 1,
            failure: 1,
            omitted_already_submitted: 0,
            omitted_duplicate: 1,
        }
    );
    assert_eq!(summary.successes[0].receipt_code.as_deref(), Some("999"));
    assert_eq!(summary.failures[0].claim_id, "3");
    assert_eq!(summary.omissions[0].claim_id, "1");

    // 只有 B 的受理号进入队列
    let queued: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            ProgressEvent::JobQueued { receipt_code } => Some(receipt_code),
            _ => None,
        })
        .collect();
    assert_eq!(queued, ["999"]);

    // 回执已下载到 B 的文件夹，邮件已归档
    assert_eq!(summary.worker, WorkerStatus::Completed);
    assert!(summary.unresolved_jobs.is_empty());
    assert!(root.path().join("claims/2/Radicado_999.pdf").exists());
    assert_eq!(mail.moved().len(), 1);

    // C 用尽 3 次尝试，只截图一次
    let submits = page
        .calls()
        .iter()
        .filter(|c| **c == Call::Click("#enviar".to_string()))
        .count();
    assert_eq!(submits, 1 + 3);
    assert_eq!(page.screenshots().len(), 1);

    // 报告
    let results = std::fs::read_to_string(&config.results_file).unwrap();
    assert!(results.contains("999"));
    let failures = std::fs::read_to_string(&config.failures_report).unwrap();
    assert!(failures.contains("案卷 3"));
    let omissions = std::fs::read_to_string(&config.omissions_report).unwrap();
    assert!(omissions.contains("FEV1"));
}

#[tokio::test(start_paused = true)]
async fn test_already_submitted_claim_is_skipped_without_session_calls() {
    let root = tempfile::tempdir().unwrap();
    make_claim(root.path(), "7", &["FEV7.pdf", "RAD.pdf"]);
    make_claim(root.path(), "8 CARTERA", &["FEV8.pdf"]);

    let session = portal();
    let page = session.handle();
    let config = config(&root);
    let mut app = App::new(config.clone(), profile(false), Box::new(session), None).unwrap();

    let summary = app.run().await.unwrap();
    assert_eq!(summary.counts.omitted_already_submitted, 2);
    assert_eq!(summary.worker, WorkerStatus::NotStarted);

    // 除登录外没有任何会话操作
    assert!(!page
        .calls()
        .iter()
        .any(|c| matches!(c, Call::Fill(..) | Call::Upload(..) | Call::Reload)));
    assert!(!config.results_file.exists());
    let omissions = std::fs::read_to_string(&config.omissions_report).unwrap();
    assert!(omissions.contains("RAD.pdf"));
    assert!(omissions.contains("CARTERA"));
}

#[tokio::test(start_paused = true)]
async fn test_login_failure_is_fatal() {
    let root = tempfile::tempdir().unwrap();
    make_claim(root.path(), "1", &["FEV1.pdf"]);

    let session = portal().with_content("<h1>Servidor no disponible</h1>");
    let page = session.handle();
    let mut app = App::new(config(&root), profile(false), Box::new(session), None).unwrap();

    let err = app.run().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<AppError>(),
        Some(AppError::Business(_))
    ));
    assert!(!page.calls().iter().any(|c| matches!(c, Call::Fill(..))));
}

#[tokio::test(start_paused = true)]
async fn test_worker_join_is_bounded() {
    let root = tempfile::tempdir().unwrap();
    make_claim(root.path(), "2", &["FEV2.pdf"]);

    let mut config = config(&root);
    config.reconciliation = ReconciliationConfig {
        max_retries: 60,
        join_timeout: Duration::from_secs(1),
        ..ReconciliationConfig::default()
    };

    let mut app = App::new(
        config,
        profile(true),
        Box::new(portal()),
        Some(Box::new(MemoryMailbox::new()) as Box<dyn Mailbox>),
    )
    .unwrap();

    let summary = app.run().await.unwrap();
    assert_eq!(summary.counts.success, 1);
    assert_eq!(summary.worker, WorkerStatus::TimedOut);
    assert!(summary.unresolved_jobs.is_empty());
}

#[tokio::test]
#[ignore] // 默认忽略，需要手动运行：cargo test -- --ignored
async fn test_real_browser_session_basics() {
    logger::init();

    let (browser, page) = launch_browser("about:blank", true, None)
        .await
        .expect("启动浏览器失败");
    let mut session = ChromeSession::new(browser, page);

    session
        .navigate("data:text/html,<input id='factura'><div id='oculto' style='display:none'></div>")
        .await
        .expect("导航失败");
    session.fill("#factura", "FEV1").await.expect("填写失败");
    assert_eq!(session.value_of("#factura").await.unwrap(), "FEV1");
    assert!(session
        .wait_visible("//input[@id='factura']", Duration::from_secs(2))
        .await
        .unwrap());
    assert!(!session
        .wait_visible("#oculto", Duration::from_millis(500))
        .await
        .unwrap());
}
