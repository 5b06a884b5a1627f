//! 文件识别 - 业务能力层
//!
//! 根据配置档里的正则规则在案卷文件夹中找到各类文件和发票号

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::ProfileError;
use crate::models::profile::DocumentRule;

/// 识别结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClaim {
    pub invoice_code: String,
    pub documents: BTreeMap<String, PathBuf>,
}

/// 文件识别器
///
/// 失败时返回给操作员看的原因文本。
#[async_trait]
pub trait DocumentResolver: Send + Sync {
    async fn resolve(&self, claim_folder: &Path) -> Result<ResolvedClaim, String>;
}

struct CompiledRule {
    rule: DocumentRule,
    regex: Regex,
}

/// 基于文件名正则的识别器
///
/// 作为发票来源的规则须带 `invoice` 命名分组；没有这样的规则时以文件夹名为发票号。
pub struct PatternResolver {
    rules: Vec<CompiledRule>,
}

impl PatternResolver {
    pub fn new(rules: &[DocumentRule]) -> Result<Self, ProfileError> {
        let rules = rules
            .iter()
            .map(|rule| {
                let regex = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|source| ProfileError::InvalidPattern {
                        field: format!("documents.{}", rule.kind),
                        source,
                    })?;
                Ok(CompiledRule {
                    rule: rule.clone(),
                    regex,
                })
            })
            .collect::<Result<Vec<_>, ProfileError>>()?;
        Ok(Self { rules })
    }

    async fn file_names(folder: &Path) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl DocumentResolver for PatternResolver {
    async fn resolve(&self, claim_folder: &Path) -> Result<ResolvedClaim, String> {
        let names = Self::file_names(claim_folder)
            .await
            .map_err(|e| format!("无法读取文件夹 {}: {}", claim_folder.display(), e))?;

        let mut documents = BTreeMap::new();
        let mut invoice_code = None;
        let mut missing = Vec::new();

        for compiled in &self.rules {
            let found = names
                .iter()
                .find_map(|name| compiled.regex.captures(name).map(|caps| (name, caps)));

            match found {
                Some((name, caps)) => {
                    if compiled.rule.invoice_source {
                        invoice_code = caps
                            .name("invoice")
                            .map(|m| m.as_str().trim().to_uppercase())
                            .filter(|code| !code.is_empty());
                        if invoice_code.is_none() {
                            return Err(format!("无法从文件名提取发票号: {}", name));
                        }
                    }
                    documents.insert(compiled.rule.kind.clone(), claim_folder.join(name));
                }
                None if compiled.rule.optional => {}
                None => missing.push(compiled.rule.kind.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(format!("缺少文件: {}", missing.join(", ")));
        }

        let invoice_code = match invoice_code {
            Some(code) => code,
            None => claim_folder
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| "无法确定发票号".to_string())?,
        };

        Ok(ResolvedClaim {
            invoice_code,
            documents,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<DocumentRule> {
        vec![
            DocumentRule {
                kind: "factura".to_string(),
                pattern: r"^(?P<invoice>[a-z]+\d+)\.pdf$".to_string(),
                invoice_source: true,
                optional: false,
            },
            DocumentRule {
                kind: "soporte".to_string(),
                pattern: r"^soporte.*\.pdf$".to_string(),
                invoice_source: false,
                optional: false,
            },
            DocumentRule {
                kind: "anexo".to_string(),
                pattern: r"^anexo.*\.pdf$".to_string(),
                invoice_source: false,
                optional: true,
            },
        ]
    }

    #[tokio::test]
    async fn test_resolve_finds_documents_and_invoice() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("fev1234.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("SOPORTE_1.pdf"), b"%PDF").unwrap();

        let resolver = PatternResolver::new(&rules()).unwrap();
        let resolved = resolver.resolve(dir.path()).await.unwrap();

        assert_eq!(resolved.invoice_code, "FEV1234");
        assert_eq!(
            resolved.documents.get("factura"),
            Some(&dir.path().join("fev1234.PDF"))
        );
        assert!(!resolved.documents.contains_key("anexo"));
    }

    #[tokio::test]
    async fn test_resolve_reports_missing_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("FEV1.pdf"), b"%PDF").unwrap();

        let resolver = PatternResolver::new(&rules()).unwrap();
        let reason = resolver.resolve(dir.path()).await.unwrap_err();
        assert_eq!(reason, "缺少文件: soporte");
    }
}
