use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::models::{ContentFingerprint, FileSource, LocalFile};
use crate::utils::hash::{calculate_hash, digest_windows, percent};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Computes [`ContentFingerprint`]s on a blocking thread so the caller's task
/// only ever awaits.
#[derive(Debug, Clone)]
pub struct ChunkedHasher {
    window_size: usize,
}

impl ChunkedHasher {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
        }
    }

    pub fn from_config(config: &TransferConfig) -> Self {
        Self::new(config.hash_window_size)
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub async fn hash_file(&self, file: &LocalFile) -> TransferResult<ContentFingerprint> {
        self.hash_file_with_progress(file, |_| {}).await
    }

    /// `progress` receives 0..=100 after every window, on the calling task
    pub async fn hash_file_with_progress(
        &self,
        file: &LocalFile,
        progress: impl Fn(u8) + Send + Sync,
    ) -> TransferResult<ContentFingerprint> {
        // a single in-memory window is hashed inline
        if let FileSource::Memory(data) = file.source() {
            if data.len() <= self.window_size {
                let digest = calculate_hash(data);
                progress(100);
                debug!("Fingerprint for {}: {}", file.name(), digest);
                return Ok(ContentFingerprint::new(digest));
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();
        let source = file.clone();
        let window_size = self.window_size;

        info!(
            "🔐 Hashing {} ({} bytes, {} byte windows)",
            file.name(),
            file.size(),
            window_size
        );

        let worker = tokio::task::spawn_blocking(move || {
            let reader = source.blocking_reader()?;
            digest_windows(reader, source.size(), window_size, |done, total| {
                let _ = tx.send(percent(done, total));
            })
        });

        while let Some(p) = rx.recv().await {
            debug!("Hashing {}: {}%", file.name(), p);
            progress(p);
        }

        let digest = worker
            .await
            .map_err(|e| TransferError::Hashing(e.to_string()))??;

        info!("✅ Fingerprint for {}: {}", file.name(), digest);
        Ok(ContentFingerprint::new(digest))
    }
}

impl Default for ChunkedHasher {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HASH_WINDOW)
    }
}
