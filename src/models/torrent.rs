use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Options for packaging a file as a torrent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentOptions {
    /// Name inside the torrent; defaults to the file name
    pub name: Option<String>,
    pub comment: Option<String>,
    /// Trackers; the configured defaults are used when empty
    #[serde(default)]
    pub announce: Vec<String>,
}

impl TorrentOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }
}

/// A packaged, seeded upload
#[derive(Debug, Clone)]
pub struct TorrentDescriptor {
    pub magnet_uri: String,
    /// Lowercase hex SHA-1 of the bencoded info dictionary
    pub info_hash: String,
    /// Bencoded `.torrent` file
    pub torrent_file: Bytes,
}

/// Live counters of one swarm
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwarmStats {
    pub uploaded: u64,
    pub downloaded: u64,
    pub peers: usize,
    pub seeds: usize,
    /// 0.0..=1.0
    pub progress: f64,
    /// Bytes per second
    pub download_speed: f64,
    /// Bytes per second
    pub upload_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedStatus {
    pub info_hash: String,
    pub name: String,
    #[serde(flatten)]
    pub stats: SwarmStats,
}
