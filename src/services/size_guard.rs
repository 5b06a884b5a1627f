//! 文件大小检查 - 业务能力层

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::infrastructure::Compressor;

/// 压缩前备份文件名后缀，存在即说明已经压缩过一次
const BACKUP_SUFFIX: &str = "-original";

/// 检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SizeVerdict {
    WithinLimit,
    Recompressed { before: u64, after: u64 },
    /// 终态失败，不再尝试提交
    Oversized { reason: String },
}

/// 主文件大小检查
///
/// 超限时只做一次无损压缩：原文件改名为 `<名称>-original.<扩展名>` 作为备份，
/// 压缩结果写回原路径。备份已存在说明压缩过，不会再压。
pub struct SizeGuard {
    max_bytes: u64,
    compressor: Option<Arc<dyn Compressor>>,
}

impl SizeGuard {
    pub fn new(max_bytes: u64, compressor: Option<Arc<dyn Compressor>>) -> Self {
        Self {
            max_bytes,
            compressor,
        }
    }

    pub async fn check(&self, path: &Path) -> SizeVerdict {
        let before = match fs::metadata(path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return SizeVerdict::Oversized {
                    reason: format!("无法读取文件大小 {}: {}", path.display(), e),
                }
            }
        };
        if before <= self.max_bytes {
            return SizeVerdict::WithinLimit;
        }

        let backup = backup_path(path);
        if backup.exists() {
            return SizeVerdict::Oversized {
                reason: format!(
                    "文件已压缩过一次仍超过限制 ({} > {} 字节)",
                    before, self.max_bytes
                ),
            };
        }

        let Some(compressor) = &self.compressor else {
            return SizeVerdict::Oversized {
                reason: format!("文件超过限制且未配置压缩程序 ({} 字节)", before),
            };
        };

        info!("📦 文件超过限制，尝试压缩: {}", path.display());
        if let Err(e) = fs::rename(path, &backup).await {
            return SizeVerdict::Oversized {
                reason: format!("无法备份原文件: {}", e),
            };
        }

        if let Err(e) = compressor.compress(&backup, path).await {
            warn!("⚠️ 压缩失败，恢复原文件: {}", e);
            let _ = fs::remove_file(path).await;
            if let Err(restore) = fs::rename(&backup, path).await {
                warn!("⚠️ 恢复原文件失败: {}", restore);
            }
            return SizeVerdict::Oversized {
                reason: format!("压缩失败: {}", e),
            };
        }

        let after = fs::metadata(path).await.map(|m| m.len()).unwrap_or(u64::MAX);
        if after > self.max_bytes {
            return SizeVerdict::Oversized {
                reason: format!(
                    "压缩后仍超过限制 ({} → {} 字节，上限 {})",
                    before, after, self.max_bytes
                ),
            };
        }

        info!("✓ 压缩完成: {} → {} 字节", before, after);
        SizeVerdict::Recompressed { before, after }
    }
}

/// `dir/name.pdf` → `dir/name-original.pdf`
pub fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, BACKUP_SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, BACKUP_SUFFIX),
    };
    path.with_file_name(name)
}
