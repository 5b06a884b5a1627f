//! 案卷处理流程 - 流程层
//!
//! 核心职责：定义"一个案卷"的完整处理流程
//!
//! 流程顺序：
//! 1. 预检（已提交 / 排除词）
//! 2. 识别文件与发票号
//! 3. 扩展名规范化、主文件大小检查
//! 4. 交给重试控制器提交
//!
//! 不持有会话，会话由编排层传入。

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{info, warn};

use crate::config::RetryPolicy;
use crate::infrastructure::SessionAdapter;
use crate::models::claim::{ClaimUnit, OutcomeStatus, SubmissionOutcome};
use crate::services::{DocumentResolver, SizeGuard, SizeVerdict};
use crate::workflow::claim_ctx::ClaimCtx;
use crate::workflow::retry::{RetryController, RetryVerdict};
use crate::workflow::strategy::InsurerStrategy;
use crate::workflow::submission::SubmissionMachine;
use crate::workflow::{note, warn_note};

/// 案卷处理流程
pub struct ClaimFlow<'a> {
    strategy: &'a dyn InsurerStrategy,
    resolver: &'a dyn DocumentResolver,
    size_check: Option<(String, SizeGuard)>,
    retry: RetryController<'a>,
}

impl<'a> ClaimFlow<'a> {
    pub fn new(
        strategy: &'a dyn InsurerStrategy,
        resolver: &'a dyn DocumentResolver,
        policy: RetryPolicy,
        diagnostics_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            strategy,
            resolver,
            size_check: None,
            retry: RetryController::new(strategy, policy, diagnostics_dir),
        }
    }

    /// 对某类文件启用大小检查
    pub fn with_size_guard(mut self, document: impl Into<String>, guard: SizeGuard) -> Self {
        self.size_check = Some((document.into(), guard));
        self
    }

    pub async fn run(
        &self,
        session: &mut dyn SessionAdapter,
        folder: &Path,
        ctx: &ClaimCtx,
    ) -> SubmissionOutcome {
        let mut claim = ClaimUnit::new(folder);
        info!("{} 📂 开始处理", ctx);

        if let Err(e) = claim.begin() {
            warn!("{} {}", ctx, e);
        }

        let status = self.process(session, &mut claim).await;
        if let Err(e) = claim.conclude(status) {
            warn!("{} {}", ctx, e);
        }

        info!("{} 🏁 结果: {}", ctx, status.label());
        claim.into_outcome()
    }

    async fn process(&self, session: &mut dyn SessionAdapter, claim: &mut ClaimUnit) -> OutcomeStatus {
        // ========== 预检 ==========
        let machine = SubmissionMachine::new(self.strategy);
        if let Some(reason) = machine.precheck(claim).await {
            note(claim, format!("⏭️ 跳过: {}", reason));
            claim.set_reason(reason);
            return OutcomeStatus::OmittedAlreadySubmitted;
        }

        // ========== 识别文件 ==========
        let resolved = match self.resolver.resolve(&claim.folder).await {
            Ok(resolved) => resolved,
            Err(reason) => {
                warn_note(claim, format!("❌ {}", reason));
                claim.set_reason(reason);
                return OutcomeStatus::Failure;
            }
        };
        claim.invoice_code = Some(resolved.invoice_code);
        claim.documents = resolved.documents;
        note(
            claim,
            format!(
                "📄 发票号 {}，识别到 {} 个文件",
                claim.invoice_code.as_deref().unwrap_or_default(),
                claim.documents.len()
            ),
        );

        self.normalize_extensions(claim).await;

        // ========== 大小检查 ==========
        if let Some((document, guard)) = &self.size_check {
            if let Some(path) = claim.document(document).map(Path::to_path_buf) {
                match guard.check(&path).await {
                    SizeVerdict::WithinLimit => {}
                    SizeVerdict::Recompressed { before, after } => {
                        note(claim, format!("📦 {} 已压缩: {} → {} 字节", document, before, after))
                    }
                    SizeVerdict::Oversized { reason } => {
                        warn_note(claim, format!("❌ {}", reason));
                        claim.set_reason(reason);
                        return OutcomeStatus::Failure;
                    }
                }
            }
        }

        // ========== 提交 ==========
        match self.retry.run(session, claim).await {
            RetryVerdict::Submitted { receipt_code } => {
                claim.receipt_code = receipt_code;
                OutcomeStatus::Success
            }
            RetryVerdict::Duplicate => {
                let reason = format!(
                    "发票 {} 已在平台登记",
                    claim.invoice_code.as_deref().unwrap_or_default()
                );
                claim.set_reason(reason);
                OutcomeStatus::OmittedDuplicateInvoice
            }
            RetryVerdict::Exhausted { last_error } => {
                claim.set_reason(format!(
                    "已用尽 {} 次尝试，最后错误: {}",
                    claim.attempt_count, last_error
                ));
                OutcomeStatus::Failure
            }
        }
    }

    /// 把 `.PDF` 等大写扩展名改成小写，部分平台拒收大写扩展名
    async fn normalize_extensions(&self, claim: &mut ClaimUnit) {
        let kinds: Vec<String> = claim.documents.keys().cloned().collect();
        for kind in kinds {
            let Some(path) = claim.documents.get(&kind).cloned() else {
                continue;
            };
            let Some(lower) = lowercase_extension(&path) else {
                continue;
            };
            match fs::rename(&path, &lower).await {
                Ok(()) => {
                    note(claim, format!("✏️ 扩展名改为小写: {}", lower.display()));
                    claim.documents.insert(kind, lower);
                }
                Err(e) => warn_note(claim, format!("⚠️ 无法重命名 {}: {}", path.display(), e)),
            }
        }
    }
}

/// 扩展名不是全小写时返回改名后的路径
fn lowercase_extension(path: &Path) -> Option<PathBuf> {
    let ext = path.extension()?.to_str()?;
    let lower = ext.to_lowercase();
    if lower == ext {
        return None;
    }
    Some(path.with_extension(lower))
}
