//! 受理号提取 - 业务能力层

use regex::{Regex, RegexBuilder};

use crate::error::ProfileError;

/// 受理号提取器
///
/// 在确认文本中查找"分隔符 + 数字"，返回第一个捕获组。
/// 找不到时返回 `None`，从不报错。
#[derive(Debug, Clone)]
pub struct ConfirmationExtractor {
    pattern: Regex,
}

impl ConfirmationExtractor {
    pub const DEFAULT_PATTERN: &'static str = r"-\s*(\d+)";

    pub fn new(pattern: &str) -> Result<Self, ProfileError> {
        let pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ProfileError::InvalidPattern {
                field: "receipt_pattern".to_string(),
                source,
            })?;
        Ok(Self { pattern })
    }

    pub fn extract(&self, text: &str) -> Option<String> {
        let caps = self.pattern.captures(text)?;
        caps.get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().trim().to_string())
            .filter(|code| !code.is_empty())
    }
}
