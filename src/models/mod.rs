mod file;
mod session;
mod torrent;

pub use file::{FileSource, LocalFile};
pub use session::{
    CompletedPart, IncompleteUpload, MultipartInit, UploadSession, part_range, total_parts,
};
pub use torrent::{SeedStatus, SwarmStats, TorrentDescriptor, TorrentOptions};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Hex SHA-256 of a file's full byte stream, used as the dedup key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    pub fn new(digest: impl Into<String>) -> Self {
        Self(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
