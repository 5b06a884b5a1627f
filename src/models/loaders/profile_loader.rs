use crate::models::profile::StrategyProfile;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 从 TOML 文件加载保险公司配置档并校验
pub async fn load_profile(profile_path: &Path) -> Result<StrategyProfile> {
    let content = fs::read_to_string(profile_path)
        .await
        .with_context(|| format!("无法读取配置档: {}", profile_path.display()))?;

    let profile: StrategyProfile = toml::from_str(&content)
        .with_context(|| format!("无法解析配置档: {}", profile_path.display()))?;

    profile
        .validate()
        .with_context(|| format!("配置档校验失败: {}", profile_path.display()))?;

    tracing::info!(
        "✓ 已加载配置档: {} (最大尝试 {} 次, 上传槽位 {} 个)",
        profile.name,
        profile.max_attempts,
        profile.uploads.len()
    );

    Ok(profile)
}

/// 列出文件夹中的全部配置档（按文件名排序）
pub async fn list_profiles(folder_path: &Path) -> Result<Vec<PathBuf>> {
    if !folder_path.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path.display());
    }

    let mut profiles = Vec::new();
    let mut entries = fs::read_dir(folder_path)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            profiles.push(path);
        }
    }

    profiles.sort();
    Ok(profiles)
}
