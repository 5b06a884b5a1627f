use thiserror::Error;

use crate::models::claim::ClaimStatus;

/// 会话适配器错误
///
/// 所有页面操作都可能返回此错误，由重试控制器统一捕获。
#[derive(Debug, Error)]
pub enum SessionError {
    /// 目标元素不存在
    #[error("元素不存在: {target}")]
    ElementNotFound { target: String },
    /// 等待元素超时
    #[error("等待元素超时: {target}")]
    Timeout { target: String },
    /// 浏览器协议错误
    #[error("浏览器协议错误: {0}")]
    Protocol(String),
    /// 本地文件操作失败（截图、上传文件路径等）
    #[error("文件操作失败 ({path}): {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<chromiumoxide::error::CdpError> for SessionError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        SessionError::Protocol(err.to_string())
    }
}

/// 邮箱错误
#[derive(Debug, Error)]
pub enum MailboxError {
    /// 尚未连接
    #[error("邮箱未连接")]
    NotConnected,
    /// 连接失败
    #[error("邮箱连接失败: {0}")]
    ConnectionFailed(String),
    /// 邮件不存在
    #[error("邮件不存在: {0}")]
    MessageNotFound(String),
    /// 邮件元数据无法解析
    #[error("邮件元数据解析失败 ({id}): {message}")]
    Metadata { id: String, message: String },
    /// 读写失败
    #[error("邮箱读写失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 状态机单步失败
///
/// 任何一个步骤返回此错误只会中止当前这一次尝试。
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Session(#[from] SessionError),
    /// 页面出现连接错误标记，需要刷新恢复
    #[error("检测到连接错误标记")]
    ConnectivityLost,
    /// 文件选择后没有出现成功标识
    #[error("文件上传未确认: {document}")]
    UploadUnconfirmed { document: String },
    /// 案卷缺少上传所需的文件
    #[error("缺少文件: {document}")]
    MissingDocument { document: String },
    /// 尝试开始时表单关键输入框不可见
    #[error("表单未就绪: {target}")]
    FormNotReady { target: String },
    /// 自适应确认等待耗尽
    #[error("等待最终确认超时 (已轮询 {polls} 次)")]
    ConfirmationTimeout { polls: u32 },
    /// 登录页显示服务器不可用
    #[error("服务器不可用: 页面包含 \"{marker}\"")]
    ServerUnavailable { marker: String },
}

impl StepError {
    /// 可通过刷新页面恢复、不计入尝试次数的错误
    pub fn is_connectivity(&self) -> bool {
        matches!(self, StepError::ConnectivityLost)
    }
}

/// 保险公司配置档错误
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("最大尝试次数 {0} 超出范围 [3, 5]")]
    AttemptsOutOfRange(u32),
    #[error("正则表达式无效 ({field}): {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: regex::Error,
    },
    #[error("上传槽位引用了未定义的文件类型: {0}")]
    UnknownDocument(String),
}

/// 案卷状态错误
#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("案卷 {claim_id} 的状态不能从 {from:?} 变更为 {to:?}")]
    InvalidTransition {
        claim_id: String,
        from: ClaimStatus,
        to: ClaimStatus,
    },
}

/// 文件操作错误
#[derive(Debug, Error)]
pub enum FileError {
    #[error("写入文件失败 ({path}): {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("目录不存在: {path}")]
    DirectoryNotFound { path: String },
}

/// 业务逻辑错误
#[derive(Debug, Error)]
pub enum BusinessError {
    /// 登录失败，整个运行中止
    #[error("登录 {insurer} 失败: {reason}")]
    LoginFailed { insurer: String, reason: String },
}

/// 应用程序错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("浏览器错误: {0}")]
    Browser(#[from] SessionError),
    #[error("邮箱错误: {0}")]
    Mailbox(#[from] MailboxError),
    #[error("文件错误: {0}")]
    File(#[from] FileError),
    #[error("业务错误: {0}")]
    Business(#[from] BusinessError),
    #[error("配置错误: {0}")]
    Config(#[from] ProfileError),
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建登录失败错误
    pub fn login_failed(insurer: impl Into<String>, reason: impl ToString) -> Self {
        AppError::Business(BusinessError::LoginFailed {
            insurer: insurer.into(),
            reason: reason.to_string(),
        })
    }

    /// 创建文件写入错误
    pub fn file_write_failed(path: impl Into<String>, source: std::io::Error) -> Self {
        AppError::File(FileError::WriteFailed {
            path: path.into(),
            source,
        })
    }

    /// 创建目录不存在错误
    pub fn directory_not_found(path: impl Into<String>) -> Self {
        AppError::File(FileError::DirectoryNotFound { path: path.into() })
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;
