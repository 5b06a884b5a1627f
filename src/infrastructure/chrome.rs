//! Chromium 会话 - 基础设施层
//!
//! 持有唯一的 page 资源，通过执行 JS 实现会话适配器的各项操作

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::SessionError;
use crate::infrastructure::session::SessionAdapter;
use crate::infrastructure::wait::{polls_for, wait_until};

/// 页面中查找元素的辅助函数，XPath 与 CSS 通用
const FIND_HELPER: &str = r#"
const __find = (t) => (t.startsWith('/') || t.startsWith('('))
    ? document.evaluate(t, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue
    : document.querySelector(t);
const __visible = (el) => {
    if (!el) return false;
    const style = window.getComputedStyle(el);
    if (style.visibility === 'hidden' || style.display === 'none') return false;
    return el.getClientRects().length > 0;
};
"#;

/// 可见性轮询间隔
const VISIBILITY_POLL: Duration = Duration::from_millis(200);

/// Chromium 会话
///
/// 职责：
/// - 持有唯一的 Page 资源（以及启动时创建的 Browser）
/// - 把会话适配器的每个操作翻译成一段 JS 或一条 CDP 命令
/// - 不认识案卷和保险公司
pub struct ChromeSession {
    _browser: Browser,
    page: Page,
}

impl ChromeSession {
    /// 创建新的会话
    pub fn new(browser: Browser, page: Page) -> Self {
        Self {
            _browser: browser,
            page,
        }
    }

    /// 执行 JS 代码并返回 JSON 结果
    async fn eval(&self, js_code: String) -> Result<JsonValue, SessionError> {
        let result = self.page.evaluate(js_code).await?;
        result
            .into_value()
            .map_err(|e| SessionError::Protocol(format!("JS 返回值解析失败: {}", e)))
    }

    /// 执行 JS 代码并反序列化为指定类型
    async fn eval_as<T: DeserializeOwned>(&self, js_code: String) -> Result<T, SessionError> {
        let json_value = self.eval(js_code).await?;
        serde_json::from_value(json_value)
            .map_err(|e| SessionError::Protocol(format!("JS 返回值类型不符: {}", e)))
    }

    /// 对目标元素执行一段 JS；元素不存在时返回 `ElementNotFound`
    ///
    /// `body` 中可以使用变量 `el`，返回值须为 JSON。
    async fn with_element(&self, target: &str, body: &str) -> Result<JsonValue, SessionError> {
        let js = format!(
            "(() => {{ {helper} const el = __find({target}); if (!el) return {{ found: false }}; \
             const value = (() => {{ {body} }})(); return {{ found: true, value: value ?? null }}; }})()",
            helper = FIND_HELPER,
            target = js_string(target),
            body = body,
        );

        let mut result: JsonValue = self.eval(js).await?;
        if result.get("found").and_then(JsonValue::as_bool) != Some(true) {
            return Err(SessionError::ElementNotFound {
                target: target.to_string(),
            });
        }
        Ok(result["value"].take())
    }

    async fn visible_now(&self, target: &str) -> Result<bool, SessionError> {
        let js = format!(
            "(() => {{ {helper} return __visible(__find({target})); }})()",
            helper = FIND_HELPER,
            target = js_string(target),
        );
        self.eval_as(js).await
    }
}

#[async_trait]
impl SessionAdapter for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        debug!("导航到: {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn fill(&mut self, target: &str, value: &str) -> Result<(), SessionError> {
        let body = format!(
            "el.focus(); el.value = {value}; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             el.blur(); return true;",
            value = js_string(value),
        );
        self.with_element(target, &body).await?;
        Ok(())
    }

    async fn select_option(&mut self, target: &str, value: &str) -> Result<(), SessionError> {
        // 先按 value 匹配，再按显示文本匹配
        let body = format!(
            "const wanted = {value}; \
             const opt = Array.from(el.options || []).find(o => o.value === wanted || o.text.trim() === wanted); \
             if (!opt) return false; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;",
            value = js_string(value),
        );
        let selected = self.with_element(target, &body).await?;
        if selected.as_bool() != Some(true) {
            return Err(SessionError::ElementNotFound {
                target: format!("{} 的选项 {}", target, value),
            });
        }
        Ok(())
    }

    async fn upload_files(&mut self, target: &str, paths: &[PathBuf]) -> Result<(), SessionError> {
        let element = if is_xpath(target) {
            self.page.find_xpath(target).await
        } else {
            self.page.find_element(target).await
        }
        .map_err(|_| SessionError::ElementNotFound {
            target: target.to_string(),
        })?;

        let files = paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect::<Vec<_>>();
        debug!("上传文件: {:?}", files);

        let mut params = SetFileInputFilesParams::new(files);
        params.backend_node_id = Some(element.backend_node_id);
        self.page.execute(params).await?;
        Ok(())
    }

    async fn wait_visible(&mut self, target: &str, timeout: Duration) -> Result<bool, SessionError> {
        let this = &*self;
        wait_until(VISIBILITY_POLL, polls_for(timeout, VISIBILITY_POLL), move || {
            this.visible_now(target)
        })
        .await
    }

    async fn click(&mut self, target: &str) -> Result<(), SessionError> {
        self.with_element(target, "el.scrollIntoView({ block: 'center' }); el.click(); return true;")
            .await?;
        Ok(())
    }

    async fn text_of(&mut self, target: &str) -> Result<String, SessionError> {
        let value = self
            .with_element(target, "return (el.innerText || el.textContent || '').trim();")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn value_of(&mut self, target: &str) -> Result<String, SessionError> {
        let value = self
            .with_element(target, "return (el.value ?? '').toString();")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<(), SessionError> {
        self.page
            .save_screenshot(ScreenshotParams::builder().build(), path)
            .await?;
        Ok(())
    }

    async fn reload(&mut self) -> Result<(), SessionError> {
        self.page.reload().await?;
        Ok(())
    }

    async fn content(&mut self) -> Result<String, SessionError> {
        Ok(self.page.content().await?)
    }
}

fn is_xpath(target: &str) -> bool {
    target.starts_with('/') || target.starts_with('(')
}

/// 转成 JS 字符串字面量
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"//a[@id="x"]"#), r#""//a[@id=\"x\"]""#);
    }

    #[test]
    fn test_is_xpath() {
        assert!(is_xpath("//button[text()='Aceptar']"));
        assert!(is_xpath("(//input)[2]"));
        assert!(!is_xpath("#factura"));
    }
}
