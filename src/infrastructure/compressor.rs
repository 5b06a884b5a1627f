//! PDF 重新压缩

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

/// 无损重新压缩
#[async_trait]
pub trait Compressor: Send + Sync {
    /// 读取 `input`，压缩结果写到 `output`
    async fn compress(&self, input: &Path, output: &Path) -> Result<()>;
}

/// 调用外部命令完成压缩
///
/// 参数中的 `{input}` 与 `{output}` 会被替换为实际路径，例如：
/// `gs -sDEVICE=pdfwrite -dPDFSETTINGS=/ebook -o {output} {input}`
#[derive(Debug, Clone)]
pub struct CommandCompressor {
    program: String,
    args: Vec<String>,
}

impl CommandCompressor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 从一行命令解析（按空白切分）
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{input}", &input).replace("{output}", &output))
            .collect()
    }
}

#[async_trait]
impl Compressor for CommandCompressor {
    async fn compress(&self, input: &Path, output: &Path) -> Result<()> {
        let args = self.render_args(input, output);
        debug!("执行压缩命令: {} {:?}", self.program, args);

        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("无法启动压缩程序: {}", self.program))?;

        if !result.status.success() {
            anyhow::bail!(
                "压缩程序退出码 {:?}: {}",
                result.status.code(),
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        if !output.exists() {
            anyhow::bail!("压缩程序未生成输出文件: {}", output.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let compressor = CommandCompressor::parse("gs -o {output} {input}").unwrap();
        let args = compressor.render_args(Path::new("/a/in.pdf"), Path::new("/a/out.pdf"));
        assert_eq!(args, ["-o", "/a/out.pdf", "/a/in.pdf"]);
        assert!(CommandCompressor::parse("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_compressor_runs_program() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        std::fs::write(&input, b"%PDF").unwrap();

        let compressor = CommandCompressor::parse("cp {input} {output}").unwrap();
        compressor.compress(&input, &output).await.unwrap();
        assert!(output.exists());

        let failing = CommandCompressor::parse("false").unwrap();
        assert!(failing.compress(&input, &dir.path().join("x.pdf")).await.is_err());
    }
}
