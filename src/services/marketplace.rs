use crate::models::{CompletedPart, ContentFingerprint, MultipartInit};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

/// Answer of the dedup lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateCheck {
    pub exists: bool,
    #[serde(default)]
    pub record_id: Option<String>,
}

/// Completed upload attached to a marketplace record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReference {
    pub url: String,
    pub size: u64,
    pub fingerprint: ContentFingerprint,
}

/// Multipart transaction calls of the marketplace (or the bucket itself)
#[async_trait]
pub trait MultipartApi: Send + Sync {
    async fn initiate_multipart(&self, file_name: &str, content_type: &str)
    -> Result<MultipartInit>;

    /// Returns a signed URL allowing one PUT of `part_number` (valid ~1 hour)
    async fn authorize_part(&self, key: &str, upload_id: &str, part_number: u32)
    -> Result<String>;

    /// Returns the final object URL
    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String>;

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()>;
}

/// Record-level calls of the marketplace
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn find_duplicate(
        &self,
        fingerprint: &ContentFingerprint,
        size: u64,
    ) -> Result<DuplicateCheck>;

    async fn attach_upload(&self, record_id: &str, reference: &FileReference) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateRequest<'a> {
    file_name: &'a str,
    content_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PartUrlRequest<'a> {
    key: &'a str,
    upload_id: &'a str,
    part_number: u32,
}

#[derive(Deserialize)]
struct PartUrlResponse {
    url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteRequest<'a> {
    key: &'a str,
    upload_id: &'a str,
    parts: &'a [CompletedPart],
}

#[derive(Deserialize)]
struct CompleteResponse {
    location: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbortRequest<'a> {
    key: &'a str,
    upload_id: &'a str,
}

#[derive(Serialize)]
struct DedupRequest<'a> {
    fingerprint: &'a ContentFingerprint,
    size: u64,
}

/// JSON client for the marketplace REST API
pub struct HttpMarketplaceApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpMarketplaceApi {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).with_context(|| format!("invalid API base URL '{}'", base_url))?;
        Ok(Self {
            client: reqwest::Client::builder().build()?,
            base_url,
            token,
        })
    }

    fn request(&self, path: &str) -> Result<reqwest::RequestBuilder> {
        let url = self.base_url.join(path)?;
        let builder = self.client.post(url);
        Ok(match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .request(path)?
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", path))?
            .error_for_status()
            .with_context(|| format!("POST {}", path))?;
        Ok(response.json().await?)
    }

    async fn post_unit<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        self.request(path)?
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {}", path))?
            .error_for_status()
            .with_context(|| format!("POST {}", path))?;
        Ok(())
    }
}

#[async_trait]
impl MultipartApi for HttpMarketplaceApi {
    async fn initiate_multipart(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<MultipartInit> {
        self.post_json(
            "uploads/multipart",
            &InitiateRequest {
                file_name,
                content_type,
            },
        )
        .await
    }

    async fn authorize_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        let response: PartUrlResponse = self
            .post_json(
                "uploads/multipart/part-url",
                &PartUrlRequest {
                    key,
                    upload_id,
                    part_number,
                },
            )
            .await?;
        Ok(response.url)
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let response: CompleteResponse = self
            .post_json(
                "uploads/multipart/complete",
                &CompleteRequest {
                    key,
                    upload_id,
                    parts,
                },
            )
            .await?;
        Ok(response.location)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.post_unit("uploads/multipart/abort", &AbortRequest { key, upload_id })
            .await
    }
}

#[async_trait]
impl CatalogApi for HttpMarketplaceApi {
    async fn find_duplicate(
        &self,
        fingerprint: &ContentFingerprint,
        size: u64,
    ) -> Result<DuplicateCheck> {
        self.post_json("uploads/dedup", &DedupRequest { fingerprint, size })
            .await
    }

    async fn attach_upload(&self, record_id: &str, reference: &FileReference) -> Result<()> {
        let path = format!("records/{}/file", urlencoding::encode(record_id));
        self.post_unit(&path, reference).await
    }
}
