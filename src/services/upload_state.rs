use crate::error::{TransferError, TransferResult, describe};
use crate::infrastructure::kv::KeyValueStore;
use crate::models::{IncompleteUpload, UploadSession};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Registry of transfer ids that still have a session record
pub const ACTIVE_UPLOADS_KEY: &str = "active-uploads";

pub fn session_key(transfer_id: &str) -> String {
    format!("upload-state-{}", transfer_id)
}

/// Durable bookkeeping of in-progress multipart uploads.
///
/// Every id in the registry has a record: `save` writes the record before
/// registering the id, `clear` unregisters before deleting.
#[derive(Clone)]
pub struct UploadStateStore {
    kv: Arc<dyn KeyValueStore>,
    part_size: u64,
    registry_lock: Arc<Mutex<()>>,
}

impl UploadStateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, part_size: u64) -> Self {
        Self {
            kv,
            part_size,
            registry_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn save(&self, session: &UploadSession) -> TransferResult<()> {
        let record = serde_json::to_string(session)?;
        self.kv
            .set(&session_key(&session.transfer_id), &record)
            .await
            .map_err(|e| TransferError::State(describe(&e)))?;

        let _guard = self.registry_lock.lock().await;
        let mut ids = self.read_registry().await?;
        if !ids.iter().any(|id| id == &session.transfer_id) {
            ids.push(session.transfer_id.clone());
            self.write_registry(&ids).await?;
        }
        Ok(())
    }

    pub async fn load(&self, transfer_id: &str) -> TransferResult<Option<UploadSession>> {
        let record = self
            .kv
            .get(&session_key(transfer_id))
            .await
            .map_err(|e| TransferError::State(describe(&e)))?;

        match record {
            Some(json) => {
                let mut session: UploadSession = serde_json::from_str(&json)?;
                session.transfer_id = transfer_id.to_string();
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    pub async fn clear(&self, transfer_id: &str) -> TransferResult<()> {
        {
            let _guard = self.registry_lock.lock().await;
            let mut ids = self.read_registry().await?;
            let before = ids.len();
            ids.retain(|id| id != transfer_id);
            if ids.len() != before {
                self.write_registry(&ids).await?;
            }
        }

        self.kv
            .remove(&session_key(transfer_id))
            .await
            .map_err(|e| TransferError::State(describe(&e)))
    }

    /// Every registered session with its completed share of parts
    pub async fn list_incomplete(&self) -> TransferResult<Vec<IncompleteUpload>> {
        let _guard = self.registry_lock.lock().await;
        let ids = self.read_registry().await?;
        let mut result = Vec::with_capacity(ids.len());
        let mut orphaned = Vec::new();

        for id in &ids {
            match self.load(id).await? {
                Some(session) => result.push(IncompleteUpload {
                    id: id.clone(),
                    file_name: session.file_name.clone(),
                    progress: session.progress(self.part_size),
                    created_at: session.created_at,
                }),
                None => orphaned.push(id.clone()),
            }
        }

        if !orphaned.is_empty() {
            tracing::warn!(
                "⚠️ Dropping {} registry entries without a session record: {:?}",
                orphaned.len(),
                orphaned
            );
            let kept: Vec<String> = ids
                .into_iter()
                .filter(|id| !orphaned.contains(id))
                .collect();
            self.write_registry(&kept).await?;
        }

        Ok(result)
    }

    async fn read_registry(&self) -> TransferResult<Vec<String>> {
        let raw = self
            .kv
            .get(ACTIVE_UPLOADS_KEY)
            .await
            .map_err(|e| TransferError::State(describe(&e)))?;
        match raw {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    async fn write_registry(&self, ids: &[String]) -> TransferResult<()> {
        let json = serde_json::to_string(ids)?;
        self.kv
            .set(ACTIVE_UPLOADS_KEY, &json)
            .await
            .map_err(|e| TransferError::State(describe(&e)))
    }
}
