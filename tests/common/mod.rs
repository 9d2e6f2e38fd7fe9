#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use model_transfer::config::TransferConfig;
use model_transfer::infrastructure::kv::{KeyValueStore, MemoryKeyValueStore};
use model_transfer::models::{CompletedPart, ContentFingerprint, LocalFile, MultipartInit};
use model_transfer::services::distribution::DownloadSink;
use model_transfer::services::marketplace::{
    CatalogApi, DuplicateCheck, FileReference, MultipartApi,
};
use model_transfer::services::transport::ObjectTransport;
use model_transfer::services::upload_state::UploadStateStore;
use model_transfer::services::uploader::MultipartUploader;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const MIB: usize = 1024 * 1024;
pub const PUBLIC_HOST: &str = "https://cdn.mock";

pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::new("model_transfer=debug"))
        .with(fmt::layer().with_test_writer())
        .try_init();
}

/// Deterministic, non-repeating test content
pub fn model_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

pub fn test_config() -> TransferConfig {
    TransferConfig {
        retry_base_delay: Duration::from_millis(10),
        ..TransferConfig::development()
    }
}

pub fn uploader_with(
    storage: Arc<MockStorage>,
    kv: Arc<dyn KeyValueStore>,
    config: TransferConfig,
) -> MultipartUploader {
    let state = UploadStateStore::new(kv, config.part_size);
    MultipartUploader::new(storage.clone(), storage, state, config)
}

pub fn uploader(storage: Arc<MockStorage>, config: TransferConfig) -> MultipartUploader {
    uploader_with(storage, Arc::new(MemoryKeyValueStore::new()), config)
}

#[derive(Default)]
struct StorageState {
    next_upload: u32,
    open: HashMap<String, (String, HashMap<u32, (String, Bytes)>)>,
    objects: HashMap<String, Bytes>,
    put_log: Vec<u32>,
    put_attempts: HashMap<u32, u32>,
    completed: Vec<Vec<CompletedPart>>,
    aborted: Vec<String>,
    failing_parts: HashMap<u32, u32>,
    failing_authorizations: HashMap<u32, u32>,
    authorize_attempts: HashMap<u32, u32>,
    hanging_parts: HashSet<u32>,
    failing_completes: u32,
    fail_initiate: bool,
}

/// In-memory multipart storage serving both the API and the transport side
#[derive(Default)]
pub struct MockStorage {
    state: Mutex<StorageState>,
}

impl MockStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `times` PUTs of `part_number` fail
    pub fn fail_part(&self, part_number: u32, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failing_parts
            .insert(part_number, times);
    }

    /// The next `times` part-URL requests for `part_number` are refused
    pub fn fail_authorize(&self, part_number: u32, times: u32) {
        self.state
            .lock()
            .unwrap()
            .failing_authorizations
            .insert(part_number, times);
    }

    pub fn authorize_attempts(&self, part_number: u32) -> u32 {
        self.state
            .lock()
            .unwrap()
            .authorize_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub fn hang_part(&self, part_number: u32) {
        self.state.lock().unwrap().hanging_parts.insert(part_number);
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_parts.clear();
        state.hanging_parts.clear();
    }

    pub fn fail_complete(&self, times: u32) {
        self.state.lock().unwrap().failing_completes = times;
    }

    pub fn fail_initiate(&self) {
        self.state.lock().unwrap().fail_initiate = true;
    }

    pub fn serve(&self, url: &str, data: impl Into<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(url.to_string(), data.into());
    }

    pub fn object(&self, url: &str) -> Option<Bytes> {
        self.state.lock().unwrap().objects.get(url).cloned()
    }

    /// Part numbers in the order they were stored
    pub fn put_log(&self) -> Vec<u32> {
        self.state.lock().unwrap().put_log.clone()
    }

    pub fn attempts(&self, part_number: u32) -> u32 {
        self.state
            .lock()
            .unwrap()
            .put_attempts
            .get(&part_number)
            .copied()
            .unwrap_or(0)
    }

    pub fn initiated(&self) -> u32 {
        self.state.lock().unwrap().next_upload
    }

    pub fn completed(&self) -> Vec<Vec<CompletedPart>> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }
}

fn etag_for(data: &[u8]) -> String {
    format!("\"{}\"", &hex::encode(Sha256::digest(data))[..16])
}

#[async_trait]
impl MultipartApi for MockStorage {
    async fn initiate_multipart(
        &self,
        file_name: &str,
        _content_type: &str,
    ) -> anyhow::Result<MultipartInit> {
        let mut state = self.state.lock().unwrap();
        if state.fail_initiate {
            return Err(anyhow!("marketplace returned 503"));
        }
        state.next_upload += 1;
        let upload_id = format!("upload-{}", state.next_upload);
        let key = format!("models/{}/{}", state.next_upload, file_name);
        state
            .open
            .insert(upload_id.clone(), (key.clone(), HashMap::new()));
        Ok(MultipartInit { upload_id, key })
    }

    async fn authorize_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        if !state.open.contains_key(upload_id) {
            return Err(anyhow!("no such upload {}", upload_id));
        }
        *state.authorize_attempts.entry(part_number).or_default() += 1;
        if let Some(remaining) = state.failing_authorizations.get_mut(&part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(anyhow!("403 Forbidden: signature service unavailable"));
            }
        }
        Ok(format!("mock://{}/{}", upload_id, part_number))
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> anyhow::Result<String> {
        let mut state = self.state.lock().unwrap();
        if state.failing_completes > 0 {
            state.failing_completes -= 1;
            return Err(anyhow!("storage is busy, try again"));
        }

        let (open_key, stored) = state
            .open
            .remove(upload_id)
            .ok_or_else(|| anyhow!("no such upload {}", upload_id))?;
        if open_key != key {
            return Err(anyhow!("key mismatch"));
        }

        let mut object = Vec::new();
        for part in parts {
            let (etag, data) = stored
                .get(&part.part_number)
                .ok_or_else(|| anyhow!("part {} was never stored", part.part_number))?;
            if etag != &part.etag {
                return Err(anyhow!("ETag mismatch on part {}", part.part_number));
            }
            object.extend_from_slice(data);
        }

        let url = format!("{}/{}", PUBLIC_HOST, key);
        state.objects.insert(url.clone(), Bytes::from(object));
        state.completed.push(parts.to_vec());
        Ok(url)
    }

    async fn abort_multipart(&self, _key: &str, upload_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().unwrap();
        state.open.remove(upload_id);
        state.aborted.push(upload_id.to_string());
        Ok(())
    }
}

#[async_trait]
impl ObjectTransport for MockStorage {
    async fn put_part(&self, url: &str, body: Bytes) -> anyhow::Result<String> {
        let (upload_id, part_number) = url
            .strip_prefix("mock://")
            .and_then(|rest| rest.rsplit_once('/'))
            .and_then(|(id, n)| Some((id.to_string(), n.parse::<u32>().ok()?)))
            .ok_or_else(|| anyhow!("unexpected part URL {}", url))?;

        let hang = {
            let mut state = self.state.lock().unwrap();
            *state.put_attempts.entry(part_number).or_default() += 1;
            if let Some(remaining) = state.failing_parts.get_mut(&part_number) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(anyhow!("connection reset by peer"));
                }
            }
            state.hanging_parts.contains(&part_number)
        };
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let etag = etag_for(&body);
        let (_, stored) = state
            .open
            .get_mut(&upload_id)
            .ok_or_else(|| anyhow!("no such upload {}", upload_id))?;
        stored.insert(part_number, (etag.clone(), body));
        state.put_log.push(part_number);
        Ok(etag)
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Bytes> {
        self.object(url)
            .ok_or_else(|| anyhow!("404 Not Found: {}", url))
    }
}

/// Catalog that remembers every attached fingerprint
#[derive(Default)]
pub struct MockCatalog {
    known: Mutex<HashMap<ContentFingerprint, String>>,
    attached: Mutex<Vec<(String, FileReference)>>,
}

impl MockCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attached(&self) -> Vec<(String, FileReference)> {
        self.attached.lock().unwrap().clone()
    }
}

#[async_trait]
impl CatalogApi for MockCatalog {
    async fn find_duplicate(
        &self,
        fingerprint: &ContentFingerprint,
        _size: u64,
    ) -> anyhow::Result<DuplicateCheck> {
        let record_id = self.known.lock().unwrap().get(fingerprint).cloned();
        Ok(DuplicateCheck {
            exists: record_id.is_some(),
            record_id,
        })
    }

    async fn attach_upload(
        &self,
        record_id: &str,
        reference: &FileReference,
    ) -> anyhow::Result<()> {
        self.known
            .lock()
            .unwrap()
            .insert(reference.fingerprint.clone(), record_id.to_string());
        self.attached
            .lock()
            .unwrap()
            .push((record_id.to_string(), reference.clone()));
        Ok(())
    }
}

/// Memory store whose deletes always fail
#[derive(Default)]
pub struct StickyKeyValueStore {
    inner: MemoryKeyValueStore,
}

impl StickyKeyValueStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for StickyKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        Err(anyhow!("read-only file system: {}", key))
    }
}

/// Sink keeping downloads in memory
#[derive(Default)]
pub struct MemorySink {
    files: Mutex<HashMap<String, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.files.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl DownloadSink for MemorySink {
    async fn save(&self, file_name: &str, data: Bytes) -> anyhow::Result<PathBuf> {
        self.files
            .lock()
            .unwrap()
            .insert(file_name.to_string(), data);
        Ok(PathBuf::from("memory").join(file_name))
    }

    async fn store(&self, file_name: &str, file: &LocalFile) -> anyhow::Result<PathBuf> {
        let data = file.read_all().await?;
        self.save(file_name, data).await
    }
}
