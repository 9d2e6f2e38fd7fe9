mod common;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
    routing::{get, post, put},
};
use common::{model_bytes, test_config};
use model_transfer::TransferError;
use model_transfer::infrastructure::kv::MemoryKeyValueStore;
use model_transfer::models::{ContentFingerprint, LocalFile};
use model_transfer::services::distribution::{DirectorySink, DistributionManager, EngineSource};
use model_transfer::services::marketplace::{CatalogApi, FileReference, HttpMarketplaceApi};
use model_transfer::services::transport::HttpTransport;
use model_transfer::services::upload_state::UploadStateStore;
use model_transfer::services::uploader::MultipartUploader;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct Fake {
    base: Mutex<String>,
    uploads: Mutex<HashMap<String, (String, HashMap<u32, Vec<u8>>)>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    records: Mutex<HashMap<String, Value>>,
    unauthorized: Mutex<u32>,
    fail_initiate: Mutex<bool>,
}

type Shared = Arc<Fake>;

fn authorized(fake: &Fake, headers: &HeaderMap) -> bool {
    let ok = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {}", TOKEN).as_str());
    if !ok {
        *fake.unauthorized.lock().unwrap() += 1;
    }
    ok
}

async fn initiate(
    State(fake): State<Shared>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !authorized(&fake, &headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({}))).into_response();
    }
    if *fake.fail_initiate.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({}))).into_response();
    }
    let mut uploads = fake.uploads.lock().unwrap();
    let upload_id = format!("u{}", uploads.len() + 1);
    let key = format!("models/{}", body["fileName"].as_str().unwrap_or("unnamed"));
    uploads.insert(upload_id.clone(), (key.clone(), HashMap::new()));
    Json(json!({ "uploadId": upload_id, "key": key })).into_response()
}

async fn part_url(State(fake): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    let base = fake.base.lock().unwrap().clone();
    Json(json!({
        "url": format!(
            "{}/storage/{}/{}",
            base,
            body["uploadId"].as_str().unwrap(),
            body["partNumber"].as_u64().unwrap()
        )
    }))
}

async fn store_part(
    State(fake): State<Shared>,
    Path((upload_id, part)): Path<(String, u32)>,
    body: Bytes,
) -> impl IntoResponse {
    let etag = format!("\"etag-{}-{}\"", part, body.len());
    match fake.uploads.lock().unwrap().get_mut(&upload_id) {
        Some((_, parts)) => {
            parts.insert(part, body.to_vec());
            (StatusCode::OK, [(header::ETAG, etag)]).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn complete(State(fake): State<Shared>, Json(body): Json<Value>) -> impl IntoResponse {
    let upload_id = body["uploadId"].as_str().unwrap_or_default();
    let Some((key, parts)) = fake.uploads.lock().unwrap().remove(upload_id) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let mut object = Vec::new();
    for part in body["parts"].as_array().cloned().unwrap_or_default() {
        let number = part["PartNumber"].as_u64().unwrap() as u32;
        let data = &parts[&number];
        assert_eq!(
            part["ETag"].as_str().unwrap(),
            format!("\"etag-{}-{}\"", number, data.len())
        );
        object.extend_from_slice(data);
    }
    fake.objects.lock().unwrap().insert(key.clone(), object);

    let base = fake.base.lock().unwrap().clone();
    Json(json!({ "location": format!("{}/objects/{}", base, key) })).into_response()
}

async fn abort(State(fake): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    let upload_id = body["uploadId"].as_str().unwrap_or_default();
    fake.uploads.lock().unwrap().remove(upload_id);
    StatusCode::NO_CONTENT
}

async fn dedup(State(fake): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let records = fake.records.lock().unwrap();
    let hit = records
        .iter()
        .find(|(_, reference)| reference["fingerprint"] == body["fingerprint"]);
    match hit {
        Some((id, _)) => Json(json!({ "exists": true, "recordId": id })),
        None => Json(json!({ "exists": false })),
    }
}

async fn attach(
    State(fake): State<Shared>,
    Path(record_id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    fake.records.lock().unwrap().insert(record_id, body);
    StatusCode::OK
}

async fn object(State(fake): State<Shared>, Path(key): Path<String>) -> impl IntoResponse {
    match fake.objects.lock().unwrap().get(&key) {
        Some(data) => (StatusCode::OK, data.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_fake() -> (String, Shared) {
    let fake = Shared::default();
    let app = Router::new()
        .route("/api/uploads/multipart", post(initiate))
        .route("/api/uploads/multipart/part-url", post(part_url))
        .route("/api/uploads/multipart/complete", post(complete))
        .route("/api/uploads/multipart/abort", post(abort))
        .route("/api/uploads/dedup", post(dedup))
        .route("/api/records/:id/file", post(attach))
        .route("/storage/:upload_id/:part", put(store_part))
        .route("/objects/*key", get(object))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    *fake.base.lock().unwrap() = base.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (base, fake)
}

fn http_uploader(base: &str) -> MultipartUploader {
    let mut config = test_config();
    config.part_size = 64 * 1024;
    let api = Arc::new(HttpMarketplaceApi::new(&format!("{}/api", base), Some(TOKEN.into())).unwrap());
    let state = UploadStateStore::new(Arc::new(MemoryKeyValueStore::new()), config.part_size);
    MultipartUploader::new(api, Arc::new(HttpTransport::new().unwrap()), state, config)
}

#[tokio::test]
async fn test_multipart_upload_over_http() {
    let (base, fake) = spawn_fake().await;
    let uploader = http_uploader(&base);
    let data = model_bytes(150_000);
    let file = LocalFile::from_bytes("tiny-llama.bin", data.clone());

    let url = uploader.upload("tiny", &file).await.unwrap();

    assert_eq!(url, format!("{}/objects/models/tiny-llama.bin", base));
    assert_eq!(
        fake.objects.lock().unwrap()["models/tiny-llama.bin"],
        data
    );
    assert_eq!(*fake.unauthorized.lock().unwrap(), 0);
    assert!(fake.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_server_error_on_initiate_is_an_initialization_failure() {
    let (base, fake) = spawn_fake().await;
    *fake.fail_initiate.lock().unwrap() = true;
    let uploader = http_uploader(&base);

    let err = uploader
        .upload("broken", &LocalFile::from_bytes("b.bin", vec![1u8; 10]))
        .await
        .unwrap_err();

    match err {
        TransferError::Initialization(reason) => assert!(reason.contains("500")),
        other => panic!("expected Initialization, got {other}"),
    }
    assert!(uploader.list_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_token_is_rejected() {
    let (base, fake) = spawn_fake().await;
    let api = HttpMarketplaceApi::new(&format!("{}/api/", base), None).unwrap();
    let state = UploadStateStore::new(Arc::new(MemoryKeyValueStore::new()), 1024);
    let uploader = MultipartUploader::new(
        Arc::new(api),
        Arc::new(HttpTransport::new().unwrap()),
        state,
        test_config(),
    );

    let err = uploader
        .upload("anon", &LocalFile::from_bytes("a.bin", vec![0u8; 10]))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Initialization(_)));
    assert_eq!(*fake.unauthorized.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_dedup_lookup_and_attach() {
    let (base, fake) = spawn_fake().await;
    let api = HttpMarketplaceApi::new(&format!("{}/api", base), Some(TOKEN.into())).unwrap();
    let fingerprint = ContentFingerprint::new("ab".repeat(32));

    let before = api.find_duplicate(&fingerprint, 10).await.unwrap();
    assert!(!before.exists);
    assert_eq!(before.record_id, None);

    let reference = FileReference {
        url: format!("{}/objects/models/x.bin", base),
        size: 10,
        fingerprint: fingerprint.clone(),
    };
    api.attach_upload("model 7", &reference).await.unwrap();

    let stored = fake.records.lock().unwrap()["model 7"].clone();
    assert_eq!(stored["fingerprint"], json!("ab".repeat(32)));
    assert_eq!(stored["size"], json!(10));

    let after = api.find_duplicate(&fingerprint, 10).await.unwrap();
    assert!(after.exists);
    assert_eq!(after.record_id.as_deref(), Some("model 7"));
}

#[tokio::test]
async fn test_direct_download_over_http() {
    let (base, fake) = spawn_fake().await;
    fake.objects
        .lock()
        .unwrap()
        .insert("models/direct.bin".into(), b"direct weights".to_vec());

    let dir = tempfile::tempdir().unwrap();
    let manager = DistributionManager::new(
        EngineSource::Unavailable("disabled".into()),
        Arc::new(HttpTransport::new().unwrap()),
        Arc::new(DirectorySink::new(dir.path())),
        Vec::new(),
    );

    let path = manager
        .fetch_direct(&format!("{}/objects/models/direct.bin", base), "direct.bin")
        .await
        .unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"direct weights");

    let err = manager
        .fetch_direct(&format!("{}/objects/models/gone.bin", base), "gone.bin")
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Download(_)));
}
