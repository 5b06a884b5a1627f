//! 保险公司配置档
//!
//! 每家保险公司的差异（选择器、URL、表单取值、尝试次数、弹窗特征……）
//! 全部以数据形式放在一份 TOML 配置档里，由 `ProfileStrategy` 解释执行。

use regex::Regex;
use serde::Deserialize;

use crate::error::ProfileError;

/// 保险公司配置档
#[derive(Debug, Clone, Deserialize)]
pub struct StrategyProfile {
    /// 保险公司名称（日志显示用）
    pub name: String,
    /// 单个案卷的最大尝试次数，范围 3..=5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub login: LoginProfile,
    pub form: FormProfile,
    #[serde(default)]
    pub uploads: Vec<UploadSlot>,
    pub submit: SubmitProfile,
    /// 临时弹窗按钮特征，按顺序扫描
    #[serde(default)]
    pub popups: Vec<String>,
    /// 页面内容中表示连接中断的文本
    #[serde(default)]
    pub connectivity_markers: Vec<String>,
    /// 受理号提取正则，取第一个捕获组
    #[serde(default = "default_receipt_pattern")]
    pub receipt_pattern: String,
    /// 成功后在案卷文件夹内保存的截图文件名
    #[serde(default)]
    pub receipt_screenshot: Option<String>,
    #[serde(default)]
    pub precheck: PrecheckRules,
    #[serde(default)]
    pub documents: Vec<DocumentRule>,
    #[serde(default)]
    pub size_limit: Option<SizeLimit>,
    /// 为空表示该保险公司不做邮件对账
    #[serde(default)]
    pub reconciliation: Option<ReconciliationProfile>,
}

/// 登录步骤
#[derive(Debug, Clone, Deserialize)]
pub struct LoginProfile {
    pub url: String,
    /// 页面包含此文本说明服务器不可用
    #[serde(default)]
    pub server_down_marker: Option<String>,
    #[serde(default)]
    pub actions: Vec<FormAction>,
    /// 登录完成后应出现的元素
    pub ready: String,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

/// 单个表单动作
///
/// `value` 支持 `{invoice}` 与 `{today}` 占位符。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FormAction {
    Fill { target: String, value: String },
    Select { target: String, value: String },
    Click { target: String },
    /// 等待元素出现，超时即本次尝试失败
    Wait { target: String, timeout_secs: u64 },
    DismissPopups,
}

/// 表单填写
#[derive(Debug, Clone, Deserialize)]
pub struct FormProfile {
    /// 表单就绪时可见的关键输入框
    pub ready: String,
    #[serde(default)]
    pub before_invoice: Vec<FormAction>,
    /// 发票号输入框
    pub invoice_field: String,
    #[serde(default)]
    pub after_invoice: Vec<FormAction>,
    #[serde(default)]
    pub duplicate: DuplicatePolicy,
}

/// 重复发票判定策略
///
/// 判定依据是"填入的发票号被页面清空"，属于经验信号，因此全部可配置。
#[derive(Debug, Clone, Deserialize)]
pub struct DuplicatePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 填入发票号后等待多久再回读
    #[serde(default = "default_duplicate_settle")]
    pub settle_ms: u64,
    /// 非阻断提示：可见时说明清空不是重复导致
    #[serde(default)]
    pub advisory: Option<String>,
    /// 其余字段填完后再检查一次
    #[serde(default = "default_true")]
    pub recheck_after_fill: bool,
}

impl Default for DuplicatePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_ms: default_duplicate_settle(),
            advisory: None,
            recheck_after_fill: true,
        }
    }
}

/// 上传槽位
#[derive(Debug, Clone, Deserialize)]
pub struct UploadSlot {
    /// 对应 `DocumentRule::kind`
    pub document: String,
    /// 文件选择框
    pub target: String,
    /// 上传成功标识
    pub confirmation: String,
    #[serde(default = "default_upload_timeout")]
    pub timeout_secs: u64,
}

/// 提交与确认
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitProfile {
    pub button: String,
    /// 中间的"继续"按钮
    #[serde(default)]
    pub continue_control: Option<String>,
    /// 最终成功弹窗
    pub success_marker: String,
    /// 读取受理号文本的元素，缺省为 `success_marker`
    #[serde(default)]
    pub success_text: Option<String>,
    /// 关闭成功弹窗的按钮
    #[serde(default)]
    pub dismiss: Option<String>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    /// 点击"继续"后追加的轮询次数
    #[serde(default = "default_extended_polls")]
    pub extended_polls: u32,
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_secs: u64,
}

impl SubmitProfile {
    pub fn success_text_target(&self) -> &str {
        self.success_text.as_deref().unwrap_or(&self.success_marker)
    }
}

/// 预检规则
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecheckRules {
    /// 存在即视为已提交的文件名
    #[serde(default)]
    pub marker_files: Vec<String>,
    /// 文件名以此结尾即视为已提交
    #[serde(default)]
    pub marker_suffixes: Vec<String>,
    /// 文件夹名包含这些词时不提交
    #[serde(default)]
    pub exclusion_words: Vec<String>,
}

/// 文件识别规则
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRule {
    pub kind: String,
    /// 匹配文件名的正则（忽略大小写）
    pub pattern: String,
    /// 发票号取自此文件名中的 `invoice` 命名分组
    #[serde(default)]
    pub invoice_source: bool,
    #[serde(default)]
    pub optional: bool,
}

/// 文件大小限制
#[derive(Debug, Clone, Deserialize)]
pub struct SizeLimit {
    pub document: String,
    pub max_bytes: u64,
}

/// 邮件对账
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationProfile {
    pub sender: String,
    #[serde(default = "default_attachment_extension")]
    pub attachment_extension: String,
}

impl StrategyProfile {
    /// 检查配置档是否自洽
    pub fn validate(&self) -> Result<(), ProfileError> {
        if !(3..=5).contains(&self.max_attempts) {
            return Err(ProfileError::AttemptsOutOfRange(self.max_attempts));
        }

        compile("receipt_pattern", &self.receipt_pattern)?;
        for rule in &self.documents {
            compile(&format!("documents.{}", rule.kind), &rule.pattern)?;
        }

        if !self.documents.is_empty() {
            let known = |kind: &str| self.documents.iter().any(|d| d.kind == kind);
            for slot in &self.uploads {
                if !known(&slot.document) {
                    return Err(ProfileError::UnknownDocument(slot.document.clone()));
                }
            }
            if let Some(limit) = &self.size_limit {
                if !known(&limit.document) {
                    return Err(ProfileError::UnknownDocument(limit.document.clone()));
                }
            }
        }

        Ok(())
    }
}

fn compile(field: &str, pattern: &str) -> Result<Regex, ProfileError> {
    Regex::new(pattern).map_err(|source| ProfileError::InvalidPattern {
        field: field.to_string(),
        source,
    })
}

// ========== serde 默认值 ==========

fn default_max_attempts() -> u32 {
    3
}

fn default_receipt_pattern() -> String {
    r"-\s*(\d+)".to_string()
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

fn default_duplicate_settle() -> u64 {
    1500
}

fn default_upload_timeout() -> u64 {
    120
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_polls() -> u32 {
    180
}

fn default_extended_polls() -> u32 {
    120
}

fn default_reset_timeout() -> u64 {
    20
}

fn default_attachment_extension() -> String {
    ".pdf".to_string()
}
