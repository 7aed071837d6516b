// gemflows — Local filesystem sink for `save` steps

use super::FileSink;
use anyhow::Context;
use async_trait::async_trait;
use std::path::Path;

/// Writes files relative to the process working directory, creating parent
/// directories as needed.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSink;

#[async_trait]
impl FileSink for LocalFileSink {
    async fn write(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        tracing::debug!(path = %path.display(), bytes = bytes.len(), "File written");
        Ok(())
    }
}
