use crate::models::{CompletedPart, MultipartInit};
use crate::services::marketplace::MultipartApi;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use std::time::Duration;
use uuid::Uuid;

/// Lifetime of a pre-signed part URL
const PART_URL_TTL: Duration = Duration::from_secs(3600);

/// Opens and finalizes multipart transactions directly against a bucket,
/// handing out pre-signed part URLs instead of going through the marketplace.
pub struct S3MultipartApi {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3MultipartApi {
    pub fn new(client: Client, bucket: String, key_prefix: String) -> Self {
        Self {
            client,
            bucket,
            key_prefix,
        }
    }

    fn object_key(&self, file_name: &str) -> String {
        let prefix = self.key_prefix.trim_matches('/');
        if prefix.is_empty() {
            format!("{}/{}", Uuid::new_v4(), file_name)
        } else {
            format!("{}/{}/{}", prefix, Uuid::new_v4(), file_name)
        }
    }
}

#[async_trait]
impl MultipartApi for S3MultipartApi {
    async fn initiate_multipart(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> Result<MultipartInit> {
        let key = self.object_key(file_name);
        let res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&key)
            .content_type(content_type)
            .send()
            .await?;

        let upload_id = res
            .upload_id()
            .ok_or_else(|| anyhow!("No upload ID"))?
            .to_string();

        Ok(MultipartInit { upload_id, key })
    }

    async fn authorize_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<String> {
        let presigned = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .presigned(PresigningConfig::expires_in(PART_URL_TTL)?)
            .await?;
        Ok(presigned.uri().to_string())
    }

    async fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<String> {
        let completed_parts: Vec<S3CompletedPart> = parts
            .iter()
            .map(|p| {
                S3CompletedPart::builder()
                    .e_tag(&p.etag)
                    .part_number(p.part_number as i32)
                    .build()
            })
            .collect();

        let res = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build(),
            )
            .send()
            .await?;

        Ok(res
            .location()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", self.bucket, key)))
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await?;
        Ok(())
    }
}
