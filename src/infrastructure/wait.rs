//! 有界轮询
//!
//! 所有"每隔 N 毫秒看一次页面"的等待都走这里。时间来自 tokio 时钟，
//! 测试中用 `start_paused` 即可瞬间跑完。

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// 固定间隔、有上限的轮询计数器
#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    remaining: u32,
    used: u32,
}

impl Poller {
    pub fn new(interval: Duration, bound: u32) -> Self {
        Self {
            interval,
            remaining: bound,
            used: 0,
        }
    }

    /// 追加轮询次数
    pub fn extend(&mut self, extra: u32) {
        self.remaining = self.remaining.saturating_add(extra);
    }

    /// 等待一个间隔；次数用完时立即返回 `false`
    pub async fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        self.used += 1;
        sleep(self.interval).await;
        true
    }

    pub fn used(&self) -> u32 {
        self.used
    }
}

/// 反复检查 `predicate`，直到为真或轮询次数耗尽
///
/// 第一次检查不等待。返回是否在上限内成立。
pub async fn wait_until<F, Fut, E>(interval: Duration, bound: u32, mut predicate: F) -> Result<bool, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
{
    let mut poller = Poller::new(interval, bound);
    loop {
        if predicate().await? {
            return Ok(true);
        }
        if !poller.tick().await {
            return Ok(false);
        }
    }
}

/// 由总超时换算轮询次数（至少一次）
pub fn polls_for(timeout: Duration, interval: Duration) -> u32 {
    if interval.is_zero() {
        return 1;
    }
    let polls = timeout.as_millis() / interval.as_millis().max(1);
    polls.clamp(1, u32::MAX as u128) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_true_on_third_check() {
        let start = Instant::now();
        let mut checks = 0;
        let ok = wait_until(Duration::from_secs(1), 10, || {
            checks += 1;
            let done = checks == 3;
            async move { Ok::<_, Infallible>(done) }
        })
        .await
        .unwrap();

        assert!(ok);
        assert_eq!(checks, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_exhausts_bound() {
        let mut checks = 0;
        let ok = wait_until(Duration::from_millis(500), 4, || {
            checks += 1;
            async { Ok::<_, Infallible>(false) }
        })
        .await
        .unwrap();

        assert!(!ok);
        assert_eq!(checks, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_extend() {
        let mut poller = Poller::new(Duration::from_secs(1), 1);
        assert!(poller.tick().await);
        assert!(!poller.tick().await);
        poller.extend(2);
        assert!(poller.tick().await);
        assert!(poller.tick().await);
        assert!(!poller.tick().await);
        assert_eq!(poller.used(), 3);
    }

    #[test]
    fn test_polls_for() {
        assert_eq!(polls_for(Duration::from_secs(2), Duration::from_millis(200)), 10);
        assert_eq!(polls_for(Duration::from_millis(50), Duration::from_millis(200)), 1);
    }
}
