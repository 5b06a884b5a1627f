use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// 程序配置
#[derive(Clone, Debug)]
pub struct Config {
    /// 案卷根目录，每个子文件夹是一个案卷
    pub claims_root: PathBuf,
    /// 保险公司配置档
    pub profile_path: PathBuf,
    /// 是否以无头模式启动浏览器
    pub headless: bool,
    /// 浏览器调试端口，设置后连接已有浏览器而不是启动新的
    pub browser_debug_port: Option<u16>,
    /// 浏览器可执行文件
    pub chrome_executable: Option<PathBuf>,
    /// 输出日志文件
    pub output_log_file: PathBuf,
    /// 成功列表（JSON）
    pub results_file: PathBuf,
    /// 失败报告
    pub failures_report: PathBuf,
    /// 跳过报告
    pub omissions_report: PathBuf,
    /// 诊断截图目录
    pub diagnostics_dir: PathBuf,
    /// 邮件落地目录
    pub mailbox_root: PathBuf,
    /// 压缩命令，支持 `{input}` / `{output}` 占位符；为空时超限文件直接失败
    pub compress_command: Option<String>,
    pub retry: RetryPolicy,
    pub popup: PopupPolicy,
    pub reconciliation: ReconciliationConfig,
}

/// 重试控制参数
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// 重试前刷新页面后的等待
    pub attempt_settle: Duration,
    /// 连接中断的免费恢复次数上限
    pub max_connectivity_recoveries: u32,
    /// 尝试开始时等待表单就绪
    pub form_ready_timeout: Duration,
    /// 连接恢复刷新后的等待
    pub connectivity_settle: Duration,
    /// 刷新页面的超时
    pub reload_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_settle: Duration::from_secs(3),
            max_connectivity_recoveries: 3,
            form_ready_timeout: Duration::from_secs(2),
            connectivity_settle: Duration::from_secs(3),
            reload_timeout: Duration::from_secs(45),
        }
    }
}

/// 弹窗清理参数
#[derive(Clone, Debug)]
pub struct PopupPolicy {
    pub max_rounds: u32,
    /// 检查单个弹窗特征是否可见的超时
    pub probe_timeout: Duration,
    /// 点击后等待弹窗消失
    pub settle: Duration,
}

impl Default for PopupPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            probe_timeout: Duration::from_millis(300),
            settle: Duration::from_millis(800),
        }
    }
}

/// 邮件对账参数
#[derive(Clone, Debug)]
pub struct ReconciliationConfig {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub sweep_passes: u32,
    pub sweep_pause: Duration,
    /// 空闲超过此时长发送一次 NOOP
    pub keepalive_after: Duration,
    /// 空闲时检查队列的间隔
    pub idle_poll: Duration,
    /// 等待工作者结束的上限
    pub join_timeout: Duration,
    /// 已处理邮件移入的文件夹
    pub processed_folder: String,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_retries: 60,
            retry_delay: Duration::from_secs(15),
            sweep_passes: 3,
            sweep_pause: Duration::from_secs(30),
            keepalive_after: Duration::from_secs(240),
            idle_poll: Duration::from_secs(1),
            join_timeout: Duration::from_secs(600),
            processed_folder: "Procesados".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claims_root: PathBuf::from("cuentas"),
            profile_path: PathBuf::from("profiles/axa_soat.toml"),
            headless: true,
            browser_debug_port: None,
            chrome_executable: None,
            output_log_file: PathBuf::from("output.txt"),
            results_file: PathBuf::from("submission_results.json"),
            failures_report: PathBuf::from("failures.txt"),
            omissions_report: PathBuf::from("omissions.txt"),
            diagnostics_dir: std::env::temp_dir(),
            mailbox_root: PathBuf::from("mailbox"),
            compress_command: None,
            retry: RetryPolicy::default(),
            popup: PopupPolicy::default(),
            reconciliation: ReconciliationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            claims_root: env_path("CLAIMS_ROOT").unwrap_or(default.claims_root),
            profile_path: env_path("PROFILE_PATH").unwrap_or(default.profile_path),
            headless: env_parse("HEADLESS").unwrap_or(default.headless),
            browser_debug_port: env_parse("BROWSER_DEBUG_PORT").or(default.browser_debug_port),
            chrome_executable: env_path("CHROME_EXECUTABLE").or(default.chrome_executable),
            output_log_file: env_path("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            results_file: env_path("RESULTS_FILE").unwrap_or(default.results_file),
            failures_report: env_path("FAILURES_REPORT").unwrap_or(default.failures_report),
            omissions_report: env_path("OMISSIONS_REPORT").unwrap_or(default.omissions_report),
            diagnostics_dir: env_path("DIAGNOSTICS_DIR").unwrap_or(default.diagnostics_dir),
            mailbox_root: env_path("MAILBOX_ROOT").unwrap_or(default.mailbox_root),
            compress_command: std::env::var("COMPRESS_COMMAND")
                .ok()
                .filter(|c| !c.trim().is_empty())
                .or(default.compress_command),
            retry: RetryPolicy {
                max_connectivity_recoveries: env_parse("MAX_CONNECTIVITY_RECOVERIES")
                    .unwrap_or(default.retry.max_connectivity_recoveries),
                ..default.retry
            },
            popup: default.popup,
            reconciliation: ReconciliationConfig {
                max_retries: env_parse("MAIL_MAX_RETRIES")
                    .unwrap_or(default.reconciliation.max_retries),
                retry_delay: env_parse("MAIL_RETRY_DELAY_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(default.reconciliation.retry_delay),
                join_timeout: env_parse("MAIL_JOIN_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(default.reconciliation.join_timeout),
                processed_folder: std::env::var("MAIL_PROCESSED_FOLDER")
                    .unwrap_or(default.reconciliation.processed_folder),
                ..default.reconciliation
            },
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key).ok().map(PathBuf::from)
}
