use crate::models::{FileSource, LocalFile};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Destination for downloaded files
#[async_trait]
pub trait DownloadSink: Send + Sync {
    /// Persists `data` as `file_name` and returns where it landed
    async fn save(&self, file_name: &str, data: Bytes) -> Result<PathBuf>;

    /// Persists a file an engine already holds, streaming on-disk content
    async fn store(&self, file_name: &str, file: &LocalFile) -> Result<PathBuf>;
}

/// Writes downloads into one directory
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

pub(super) fn check_file_name(file_name: &str) -> Result<()> {
    if file_name.is_empty()
        || file_name == "."
        || file_name == ".."
        || file_name.contains(['/', '\\', '\0'])
    {
        bail!("refusing to write download as {:?}", file_name);
    }
    Ok(())
}

#[async_trait]
impl DownloadSink for DirectorySink {
    async fn save(&self, file_name: &str, data: Bytes) -> Result<PathBuf> {
        check_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let target = self.dir.join(file_name);
        let partial = self.dir.join(format!(".{}.part", file_name));
        tokio::fs::write(&partial, &data)
            .await
            .with_context(|| format!("writing {}", partial.display()))?;
        tokio::fs::rename(&partial, &target).await?;

        tracing::debug!("Saved {} bytes to {}", data.len(), target.display());
        Ok(target)
    }

    async fn store(&self, file_name: &str, file: &LocalFile) -> Result<PathBuf> {
        let source = match file.source() {
            FileSource::Memory(data) => return self.save(file_name, data.clone()).await,
            FileSource::Path(source) => source,
        };
        check_file_name(file_name)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let target = self.dir.join(file_name);
        if tokio::fs::try_exists(&target).await?
            && tokio::fs::canonicalize(&target).await? == tokio::fs::canonicalize(source).await?
        {
            return Ok(target);
        }

        let partial = self.dir.join(format!(".{}.part", file_name));
        let copied = tokio::fs::copy(source, &partial)
            .await
            .with_context(|| format!("copying {} to {}", source.display(), partial.display()))?;
        tokio::fs::rename(&partial, &target).await?;

        tracing::debug!("Stored {} bytes at {}", copied, target.display());
        Ok(target)
    }
}
