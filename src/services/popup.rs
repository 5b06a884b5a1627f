//! 弹窗清理 - 业务能力层

use tokio::time::sleep;
use tracing::debug;

use crate::config::PopupPolicy;
use crate::infrastructure::SessionAdapter;

/// 临时弹窗清理循环
///
/// 按顺序扫描已知的弹窗按钮，点击第一个可见的，等待片刻后从头重新扫描；
/// 没有可见弹窗或达到轮数上限时结束。成功弹窗不在扫描列表内。
#[derive(Debug, Clone)]
pub struct PopupDismisser {
    signatures: Vec<String>,
    policy: PopupPolicy,
}

impl PopupDismisser {
    /// `success_marker` 会从 `signatures` 中剔除
    pub fn new(signatures: &[String], success_marker: &str, policy: PopupPolicy) -> Self {
        let signatures = signatures
            .iter()
            .filter(|s| s.as_str() != success_marker)
            .cloned()
            .collect();
        Self { signatures, policy }
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }

    /// 清理弹窗，返回点击的次数
    ///
    /// 探测或点击失败都只记录调试日志，不中断调用方。
    pub async fn dismiss<S: SessionAdapter + ?Sized>(&self, session: &mut S) -> u32 {
        let mut dismissed = 0;

        for _ in 0..self.policy.max_rounds {
            let Some(signature) = self.first_visible(session).await else {
                break;
            };

            match session.click(signature).await {
                Ok(()) => {
                    debug!("已关闭弹窗: {}", signature);
                    dismissed += 1;
                }
                Err(e) => debug!("关闭弹窗失败 {}: {}", signature, e),
            }
            sleep(self.policy.settle).await;
        }

        dismissed
    }

    async fn first_visible<S: SessionAdapter + ?Sized>(&self, session: &mut S) -> Option<&str> {
        for signature in &self.signatures {
            if let Ok(true) = session
                .wait_visible(signature, self.policy.probe_timeout)
                .await
            {
                return Some(signature);
            }
        }
        None
    }
}
