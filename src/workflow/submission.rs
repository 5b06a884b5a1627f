//! 提交状态机 - 流程层
//!
//! 单次尝试的线性流程：
//! PRECHECK → FORM_FILL → FILE_UPLOAD → SUBMIT_CONFIRM → EXTRACT_RECEIPT → RESET
//!
//! 失败不在状态机内建模，带着失败所在的阶段交给重试控制器。

use std::fmt;
use std::path::Path;
use thiserror::Error;
use tokio::fs;

use crate::error::StepError;
use crate::infrastructure::SessionAdapter;
use crate::models::claim::ClaimUnit;
use crate::workflow::strategy::{FillOutcome, InsurerStrategy};
use crate::workflow::{note, warn_note};

/// 状态机阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionState {
    Precheck,
    FormFill,
    FileUpload,
    SubmitConfirm,
    ExtractReceipt,
    Reset,
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubmissionState::Precheck => "预检",
            SubmissionState::FormFill => "填写表单",
            SubmissionState::FileUpload => "上传文件",
            SubmissionState::SubmitConfirm => "提交确认",
            SubmissionState::ExtractReceipt => "提取受理号",
            SubmissionState::Reset => "重置表单",
        };
        f.write_str(name)
    }
}

/// 单次尝试的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Submitted { receipt_code: Option<String> },
    Duplicate,
}

/// 单次尝试失败
#[derive(Debug, Error)]
#[error("{state}阶段失败: {source}")]
pub struct AttemptError {
    pub state: SubmissionState,
    #[source]
    pub source: StepError,
}

impl AttemptError {
    fn at(state: SubmissionState) -> impl FnOnce(StepError) -> Self {
        move |source| Self { state, source }
    }
}

/// 提交状态机
pub struct SubmissionMachine<'a> {
    strategy: &'a dyn InsurerStrategy,
}

impl<'a> SubmissionMachine<'a> {
    pub fn new(strategy: &'a dyn InsurerStrategy) -> Self {
        Self { strategy }
    }

    /// 预检：不接触会话
    ///
    /// 返回跳过原因；`None` 表示可以提交。
    pub async fn precheck(&self, claim: &ClaimUnit) -> Option<String> {
        let rules = self.strategy.precheck_rules();

        let folder_name = claim.id.to_uppercase();
        if let Some(word) = rules
            .exclusion_words
            .iter()
            .find(|w| folder_name.contains(&w.to_uppercase()))
        {
            return Some(format!("文件夹名包含排除词 \"{}\"", word));
        }

        if let Some(marker) = rules
            .marker_files
            .iter()
            .find(|name| claim.folder.join(name).exists())
        {
            return Some(format!("已存在提交标记 {}", marker));
        }

        if !rules.marker_suffixes.is_empty() {
            let names = list_file_names(&claim.folder).await;
            for name in names {
                let lower = name.to_lowercase();
                if rules
                    .marker_suffixes
                    .iter()
                    .any(|suffix| lower.ends_with(&suffix.to_lowercase()))
                {
                    return Some(format!("已存在提交标记 {}", name));
                }
            }
        }

        None
    }

    /// 从 FORM_FILL 开始跑完一次尝试
    pub async fn run_attempt(
        &self,
        session: &mut dyn SessionAdapter,
        claim: &mut ClaimUnit,
    ) -> Result<AttemptResult, AttemptError> {
        // FORM_FILL
        let filled = self
            .strategy
            .fill_form(session, claim)
            .await
            .map_err(AttemptError::at(SubmissionState::FormFill))?;
        if filled == FillOutcome::Duplicate {
            return Ok(AttemptResult::Duplicate);
        }

        // FILE_UPLOAD
        self.strategy
            .upload_files(session, claim)
            .await
            .map_err(AttemptError::at(SubmissionState::FileUpload))?;

        // SUBMIT_CONFIRM
        let confirmation = self
            .strategy
            .confirm_and_extract(session, claim)
            .await
            .map_err(AttemptError::at(SubmissionState::SubmitConfirm))?;

        // EXTRACT_RECEIPT：没有受理号只是警告
        match &confirmation.receipt_code {
            Some(code) => note(claim, format!("🎫 受理号: {}", code)),
            None => warn_note(
                claim,
                format!("⚠️ 确认文本中没有受理号: {:?}", confirmation.text),
            ),
        }

        // RESET：已经提交成功，失败只记录警告，避免重复提交
        if let Err(e) = self.strategy.reset(session).await {
            warn_note(
                claim,
                format!("⚠️ {}阶段失败（不影响提交结果）: {}", SubmissionState::Reset, e),
            );
        }

        Ok(AttemptResult::Submitted {
            receipt_code: confirmation.receipt_code,
        })
    }
}

async fn list_file_names(folder: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = fs::read_dir(folder).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    names.sort();
    names
}
