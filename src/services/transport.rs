use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;

/// Raw object transfers against pre-signed or public URLs
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// PUTs one part body and returns the ETag storage acknowledged it with
    async fn put_part(&self, url: &str, body: Bytes) -> Result<String>;

    /// GETs a whole object into memory
    async fn fetch(&self, url: &str) -> Result<Bytes>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectTransport for HttpTransport {
    async fn put_part(&self, url: &str, body: Bytes) -> Result<String> {
        let size = body.len();
        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_LENGTH, size)
            .body(body)
            .send()
            .await
            .context("part upload request failed")?
            .error_for_status()?;

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("storage response carried no ETag header"))?;

        tracing::debug!("PUT {} bytes acknowledged with ETag {}", size, etag);
        Ok(etag)
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;
        Ok(response.bytes().await?)
    }
}
