use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult, describe};
use crate::models::{
    CompletedPart, IncompleteUpload, LocalFile, UploadSession, part_range,
};
use crate::services::marketplace::MultipartApi;
use crate::services::transport::ObjectTransport;
use crate::services::upload_state::UploadStateStore;
use crate::utils::keyed_mutex::KeyedMutex;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Transfer id for a new upload: sanitized file name plus a random suffix,
/// so two uploads of same-named files never share state.
pub fn transfer_id_for(file_name: &str) -> String {
    let stem: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}-{}", stem, &suffix[..8])
}

/// Resumable multipart upload orchestrator.
pub struct MultipartUploader {
    api: Arc<dyn MultipartApi>,
    transport: Arc<dyn ObjectTransport>,
    state: UploadStateStore,
    config: TransferConfig,
    in_flight: KeyedMutex,
}

impl MultipartUploader {
    pub fn new(
        api: Arc<dyn MultipartApi>,
        transport: Arc<dyn ObjectTransport>,
        state: UploadStateStore,
        config: TransferConfig,
    ) -> Self {
        Self {
            api,
            transport,
            state,
            config,
            in_flight: KeyedMutex::new(),
        }
    }

    pub fn state(&self) -> &UploadStateStore {
        &self.state
    }

    pub fn part_size(&self) -> u64 {
        self.config.part_size.max(1)
    }

    pub async fn upload(&self, transfer_id: &str, file: &LocalFile) -> TransferResult<String> {
        self.upload_with_progress(transfer_id, file, |_| {}).await
    }

    /// Uploads (or resumes) `file` under `transfer_id` and returns the final object URL.
    ///
    /// `progress` receives the completed share of parts (0..=100). On failure
    /// the session is kept whenever at least one part was acknowledged, so a
    /// later call with the same id resumes.
    pub async fn upload_with_progress(
        &self,
        transfer_id: &str,
        file: &LocalFile,
        progress: impl Fn(u8) + Send + Sync,
    ) -> TransferResult<String> {
        self.in_flight.cleanup();
        let _guard = self
            .in_flight
            .try_lock(transfer_id)
            .ok_or_else(|| TransferError::Busy(transfer_id.to_string()))?;

        let mut session = self.open_session(transfer_id, file).await?;
        let part_size = self.part_size();
        progress(session.progress(part_size));

        if let Err(err) = self.upload_parts(&mut session, file, &progress).await {
            if session.completed_count() == 0 {
                self.discard(&session).await;
            } else {
                warn!(
                    "⏸️ Upload {} stopped with {}/{} parts done; state kept for resume",
                    transfer_id,
                    session.completed_count(),
                    session.total_parts(part_size)
                );
            }
            return Err(err);
        }

        let location = self.finalize(&session).await?;
        // the remote transaction is closed; a stale session could never finish
        if let Err(e) = self.state.clear(transfer_id).await {
            warn!(
                "⚠️ Upload {} finished but its local state could not be cleared: {}",
                transfer_id, e
            );
        }
        progress(100);

        info!("✅ Upload {} complete: {}", transfer_id, location);
        Ok(location)
    }

    /// Aborts the remote transaction and forgets the session.
    ///
    /// Returns `false` when no session exists for `transfer_id`.
    pub async fn abandon(&self, transfer_id: &str) -> TransferResult<bool> {
        self.in_flight.cleanup();
        let _guard = self
            .in_flight
            .try_lock(transfer_id)
            .ok_or_else(|| TransferError::Busy(transfer_id.to_string()))?;

        let Some(session) = self.state.load(transfer_id).await? else {
            return Ok(false);
        };

        self.api
            .abort_multipart(&session.key, &session.upload_id)
            .await
            .map_err(|e| TransferError::Abort(describe(&e)))?;
        self.state.clear(transfer_id).await?;

        info!("🗑️ Abandoned upload {}", transfer_id);
        Ok(true)
    }

    pub async fn list_incomplete(&self) -> TransferResult<Vec<IncompleteUpload>> {
        self.state.list_incomplete().await
    }

    async fn open_session(
        &self,
        transfer_id: &str,
        file: &LocalFile,
    ) -> TransferResult<UploadSession> {
        if let Some(session) = self.state.load(transfer_id).await? {
            if session.file_name != file.name() || session.file_size != file.size() {
                return Err(TransferError::SessionMismatch {
                    id: transfer_id.to_string(),
                    reason: format!(
                        "session is for {} ({} bytes), got {} ({} bytes)",
                        session.file_name,
                        session.file_size,
                        file.name(),
                        file.size()
                    ),
                });
            }
            info!(
                "🔁 Resuming upload {} ({}/{} parts already stored)",
                transfer_id,
                session.completed_count(),
                session.total_parts(self.part_size())
            );
            return Ok(session);
        }

        let init = self
            .api
            .initiate_multipart(file.name(), file.content_type())
            .await
            .map_err(|e| {
                error!("❌ Could not open multipart upload for {}: {:#}", file.name(), e);
                TransferError::Initialization(describe(&e))
            })?;

        let session = UploadSession::new(transfer_id, init, file.name(), file.size());
        if let Err(err) = self.state.save(&session).await {
            self.discard(&session).await;
            return Err(err);
        }

        info!(
            "🚀 Started upload {} for {} ({} bytes, {} parts)",
            transfer_id,
            file.name(),
            file.size(),
            session.total_parts(self.part_size())
        );
        Ok(session)
    }

    async fn upload_parts(
        &self,
        session: &mut UploadSession,
        file: &LocalFile,
        progress: &(impl Fn(u8) + Send + Sync),
    ) -> TransferResult<()> {
        let part_size = self.part_size();
        let pending = session.missing_parts(part_size);
        if pending.is_empty() {
            return Ok(());
        }

        let key = session.key.clone();
        let upload_id = session.upload_id.clone();
        let (key, upload_id) = (key.as_str(), upload_id.as_str());

        let mut uploads = stream::iter(pending)
            .map(|part_number| self.upload_part(key, upload_id, file, part_number))
            .buffer_unordered(self.config.max_concurrent_parts.max(1));

        while let Some(result) = uploads.next().await {
            let part = result?;
            session.record_part(part);
            self.state.save(session).await?;
            progress(session.progress(part_size));
        }

        Ok(())
    }

    /// One part with its retry budget
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        file: &LocalFile,
        part_number: u32,
    ) -> TransferResult<CompletedPart> {
        let (start, end) = part_range(part_number, self.part_size(), file.size());
        let body = file.read_range(start, end).await?;
        let deadline = self.config.part_timeout(end - start);
        let mut retries = 0;

        loop {
            match self
                .attempt_part(key, upload_id, part_number, body.clone(), deadline)
                .await
            {
                Ok(etag) => {
                    debug!(
                        "Part {} ({} bytes) stored after {} retries",
                        part_number,
                        end - start,
                        retries
                    );
                    return Ok(CompletedPart { part_number, etag });
                }
                Err(err) if err.is_retryable() && retries < self.config.max_part_retries => {
                    retries += 1;
                    let delay = self.config.retry_delay(retries);
                    warn!(
                        "⚠️ {} (retry {}/{} in {:?})",
                        err, retries, self.config.max_part_retries, delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    error!("❌ Giving up on part {}: {}", part_number, err);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
        body: Bytes,
        deadline: Duration,
    ) -> TransferResult<String> {
        let url = self
            .api
            .authorize_part(key, upload_id, part_number)
            .await
            .map_err(|e| TransferError::Authorization {
                part_number,
                reason: describe(&e),
            })?;

        match timeout(deadline, self.transport.put_part(&url, body)).await {
            Ok(Ok(etag)) if !etag.is_empty() => Ok(etag),
            Ok(Ok(_)) => Err(TransferError::Transport {
                part_number,
                reason: "storage acknowledged the part without an ETag".to_string(),
            }),
            Ok(Err(e)) => Err(TransferError::Transport {
                part_number,
                reason: describe(&e),
            }),
            Err(_) => Err(TransferError::Timeout {
                part_number,
                after: deadline,
            }),
        }
    }

    async fn finalize(&self, session: &UploadSession) -> TransferResult<String> {
        let missing = session.missing_parts(self.part_size());
        if !missing.is_empty() {
            return Err(TransferError::Finalization(format!(
                "parts {:?} have not been uploaded",
                missing
            )));
        }

        self.api
            .complete_multipart(&session.key, &session.upload_id, &session.ordered_parts())
            .await
            .map_err(|e| {
                error!(
                    "❌ Completing upload {} failed, state kept: {:#}",
                    session.transfer_id, e
                );
                TransferError::Finalization(describe(&e))
            })
    }

    /// Nothing resumable: release the remote transaction and the local record
    async fn discard(&self, session: &UploadSession) {
        if let Err(e) = self
            .api
            .abort_multipart(&session.key, &session.upload_id)
            .await
        {
            warn!(
                "⚠️ Could not abort remote upload {}: {:#}",
                session.upload_id, e
            );
        }
        if let Err(e) = self.state.clear(&session.transfer_id).await {
            warn!(
                "⚠️ Could not clear state for {}: {}",
                session.transfer_id, e
            );
        }
        info!(
            "🧹 Discarded upload {} (no parts completed)",
            session.transfer_id
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_id_for_sanitizes_and_suffixes() {
        let a = transfer_id_for("my model (v2).safetensors");
        let b = transfer_id_for("my model (v2).safetensors");
        assert!(a.starts_with("my_model__v2_.safetensors-"));
        assert_eq!(a.len(), "my_model__v2_.safetensors-".len() + 8);
        assert_ne!(a, b);
    }
}
