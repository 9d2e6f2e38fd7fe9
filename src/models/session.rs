use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A part acknowledged by storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    #[serde(rename = "PartNumber")]
    pub part_number: u32,
    #[serde(rename = "ETag")]
    pub etag: String,
}

/// Remote handles for a freshly opened multipart transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultipartInit {
    pub upload_id: String,
    pub key: String,
}

/// Durable record of one multipart transfer.
///
/// Serialized as `{uploadId, key, fileName, fileSize, uploadedParts, createdAt}`.
/// The transfer id is the storage key and is not part of the record body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    #[serde(skip)]
    pub transfer_id: String,
    pub upload_id: String,
    pub key: String,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default)]
    pub uploaded_parts: Vec<CompletedPart>,
    pub created_at: DateTime<Utc>,
}

/// Row of the resume listing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompleteUpload {
    pub id: String,
    pub file_name: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
}

/// Number of parts for a file; an empty file still uploads one empty part
pub fn total_parts(file_size: u64, part_size: u64) -> u32 {
    let part_size = part_size.max(1);
    file_size.div_ceil(part_size).max(1) as u32
}

/// Byte range `[start, end)` of 1-based `part_number`
pub fn part_range(part_number: u32, part_size: u64, file_size: u64) -> (u64, u64) {
    let start = (part_number.saturating_sub(1) as u64) * part_size;
    let end = (part_number as u64 * part_size).min(file_size);
    (start.min(file_size), end)
}

impl UploadSession {
    pub fn new(
        transfer_id: impl Into<String>,
        init: MultipartInit,
        file_name: impl Into<String>,
        file_size: u64,
    ) -> Self {
        Self {
            transfer_id: transfer_id.into(),
            upload_id: init.upload_id,
            key: init.key,
            file_name: file_name.into(),
            file_size,
            uploaded_parts: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn total_parts(&self, part_size: u64) -> u32 {
        total_parts(self.file_size, part_size)
    }

    pub fn is_part_complete(&self, part_number: u32) -> bool {
        self.uploaded_parts
            .iter()
            .any(|p| p.part_number == part_number && !p.etag.is_empty())
    }

    /// Records an acknowledged part, replacing any earlier entry for the same number
    pub fn record_part(&mut self, part: CompletedPart) {
        self.uploaded_parts
            .retain(|p| p.part_number != part.part_number);
        self.uploaded_parts.push(part);
        self.uploaded_parts.sort_by_key(|p| p.part_number);
    }

    pub fn completed_count(&self) -> usize {
        self.uploaded_parts
            .iter()
            .filter(|p| !p.etag.is_empty())
            .count()
    }

    pub fn missing_parts(&self, part_size: u64) -> Vec<u32> {
        (1..=self.total_parts(part_size))
            .filter(|n| !self.is_part_complete(*n))
            .collect()
    }

    /// Completed share of all parts, 0..=100
    pub fn progress(&self, part_size: u64) -> u8 {
        let total = self.total_parts(part_size) as f64;
        let done = self.completed_count().min(total as usize) as f64;
        (done / total * 100.0).round() as u8
    }

    /// Parts in ascending order, as the completion call expects them
    pub fn ordered_parts(&self) -> Vec<CompletedPart> {
        let mut parts: Vec<CompletedPart> = self
            .uploaded_parts
            .iter()
            .filter(|p| !p.etag.is_empty())
            .cloned()
            .collect();
        parts.sort_by_key(|p| p.part_number);
        parts
    }
}
