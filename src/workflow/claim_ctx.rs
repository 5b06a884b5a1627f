//! 案卷处理上下文
//!
//! 封装"我正在处理第几个案卷"这一信息

use std::fmt::Display;

/// 案卷处理上下文
#[derive(Debug, Clone)]
pub struct ClaimCtx {
    /// 案卷文件夹名
    pub claim_id: String,

    /// 案卷序号（从1开始，仅用于日志显示）
    pub index: usize,

    /// 本次运行的案卷总数
    pub total: usize,
}

impl ClaimCtx {
    /// 创建新的案卷上下文
    pub fn new(claim_id: impl Into<String>, index: usize, total: usize) -> Self {
        Self {
            claim_id: claim_id.into(),
            index,
            total,
        }
    }
}

impl Display for ClaimCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[案卷 {}/{} #{}]", self.index, self.total, self.claim_id)
    }
}
