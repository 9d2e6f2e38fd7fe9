use crate::error::{TransferError, TransferResult, describe};
use crate::models::{ContentFingerprint, LocalFile, TorrentDescriptor, TorrentOptions};
use crate::services::distribution::DistributionManager;
use crate::services::hasher::ChunkedHasher;
use crate::services::marketplace::{CatalogApi, FileReference};
use crate::services::uploader::{MultipartUploader, transfer_id_for};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishProgress {
    Hashing(u8),
    Uploading(u8),
}

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    /// Marketplace record the file gets attached to
    pub record_id: String,
    /// Resume this transfer instead of starting a new one
    pub transfer_id: Option<String>,
    /// Seed the uploaded file with these options
    pub seed: Option<TorrentOptions>,
}

impl PublishRequest {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishedFile {
    pub fingerprint: ContentFingerprint,
    pub url: String,
    pub size: u64,
    pub torrent: Option<TorrentDescriptor>,
}

#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// Same content already lives under `record_id`; nothing was uploaded
    Duplicate {
        fingerprint: ContentFingerprint,
        record_id: Option<String>,
    },
    Uploaded(PublishedFile),
}

/// Hash, dedup check, multipart upload, record attach and optional seeding.
pub struct PublishPipeline {
    hasher: ChunkedHasher,
    catalog: Arc<dyn CatalogApi>,
    uploader: Arc<MultipartUploader>,
    distribution: Option<Arc<DistributionManager>>,
}

impl PublishPipeline {
    pub fn new(
        hasher: ChunkedHasher,
        catalog: Arc<dyn CatalogApi>,
        uploader: Arc<MultipartUploader>,
        distribution: Option<Arc<DistributionManager>>,
    ) -> Self {
        Self {
            hasher,
            catalog,
            uploader,
            distribution,
        }
    }

    pub async fn publish(
        &self,
        file: &LocalFile,
        request: PublishRequest,
        progress: impl Fn(PublishProgress) + Send + Sync,
    ) -> TransferResult<PublishOutcome> {
        let fingerprint = self
            .hasher
            .hash_file_with_progress(file, |p| progress(PublishProgress::Hashing(p)))
            .await?;

        let duplicate = self
            .catalog
            .find_duplicate(&fingerprint, file.size())
            .await
            .map_err(|e| TransferError::Catalog(describe(&e)))?;
        if duplicate.exists {
            info!(
                "♻️ {} is already published (record {:?}), skipping upload",
                file.name(),
                duplicate.record_id
            );
            return Ok(PublishOutcome::Duplicate {
                fingerprint,
                record_id: duplicate.record_id,
            });
        }

        let transfer_id = request
            .transfer_id
            .unwrap_or_else(|| transfer_id_for(file.name()));
        let url = self
            .uploader
            .upload_with_progress(&transfer_id, file, |p| {
                progress(PublishProgress::Uploading(p))
            })
            .await?;

        let reference = FileReference {
            url: url.clone(),
            size: file.size(),
            fingerprint: fingerprint.clone(),
        };
        self.catalog
            .attach_upload(&request.record_id, &reference)
            .await
            .map_err(|e| TransferError::Catalog(describe(&e)))?;
        info!("📎 Attached {} to record {}", file.name(), request.record_id);

        let torrent = match (&self.distribution, request.seed) {
            (Some(distribution), Some(options)) => {
                match distribution.create_torrent(file, options).await {
                    Ok(descriptor) => Some(descriptor),
                    Err(e) => {
                        warn!("⚠️ Uploaded {} but could not seed it: {}", file.name(), e);
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(PublishOutcome::Uploaded(PublishedFile {
            fingerprint,
            url,
            size: file.size(),
            torrent,
        }))
    }
}
