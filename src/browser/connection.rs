use anyhow::Result;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::time::sleep;
use tracing::{debug, error, info};

/// 连接到已打开调试端口的浏览器
///
/// 优先复用 URL 以 `login_url` 所在站点开头的已有标签页（操作员可能已手动登录），
/// 否则新建标签页并导航过去。
pub async fn connect_to_browser(port: u16, login_url: &str) -> Result<(Browser, Page)> {
    let browser_url = format!("http://localhost:{}", port);
    info!("正在连接到浏览器: {}", browser_url);

    let (browser, mut handler) = Browser::connect(&browser_url).await.map_err(|e| {
        error!("连接浏览器失败: {}", e);
        e
    })?;
    debug!("浏览器连接成功");

    // 在后台处理浏览器事件
    tokio::spawn(async move {
        while let Some(h) = handler.next().await {
            if h.is_err() {
                break;
            }
        }
    });

    // 添加短暂延迟以等待浏览器状态同步
    sleep(tokio::time::Duration::from_millis(300)).await;

    let pages = browser.pages().await?;
    debug!("获取到 {} 个页面", pages.len());

    let site = site_of(login_url);
    for page in pages.iter() {
        if let Ok(Some(url)) = page.url().await {
            debug!("检查页面: {}", url);
            if url.starts_with(site) {
                info!("✓ 复用已打开的页面: {}", url);
                return Ok((browser, page.clone()));
            }
        }
    }

    debug!("未找到匹配的页面，创建新页面");
    let page = browser.new_page(login_url).await.map_err(|e| {
        error!("导航到 {} 失败: {}", login_url, e);
        e
    })?;
    info!("已导航到: {}", login_url);

    Ok((browser, page))
}

/// 截取 `scheme://host` 部分
fn site_of(url: &str) -> &str {
    let after_scheme = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[after_scheme..].find('/') {
        Some(i) => &url[..after_scheme + i],
        None => url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_of() {
        assert_eq!(
            site_of("https://portal.test/claims/login?x=1"),
            "https://portal.test"
        );
        assert_eq!(site_of("https://portal.test"), "https://portal.test");
    }

    #[tokio::test]
    #[ignore] // 需要手动启动带调试端口的浏览器：cargo test -- --ignored
    async fn test_browser_connection() {
        let result = connect_to_browser(9222, "about:blank").await;
        assert!(result.is_ok(), "应该能够成功连接浏览器");
    }
}
