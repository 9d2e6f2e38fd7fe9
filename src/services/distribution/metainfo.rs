use crate::error::{TransferError, TransferResult};
use crate::models::TorrentOptions;
use crate::utils::hash::fill_window;
use data_encoding::BASE32;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use url::Url;

pub const MIN_PIECE_LENGTH: u64 = 16 * 1024;
pub const MAX_PIECE_LENGTH: u64 = 16 * 1024 * 1024;

const CREATED_BY: &str = concat!("model-transfer/", env!("CARGO_PKG_VERSION"));

/// Single-file info dictionary. Fields are declared in bencode key order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Info {
    pub length: u64,
    pub name: String,
    #[serde(rename = "piece length")]
    pub piece_length: u64,
    #[serde(with = "serde_bytes")]
    pub pieces: Vec<u8>,
}

/// A `.torrent` document. No timestamps are written so identical inputs
/// always encode to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metainfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announce: Option<String>,
    #[serde(
        rename = "announce-list",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub announce_list: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(rename = "created by", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub info: Info,
}

/// Power of two near `size / 1024`, clamped to 16 KiB..=16 MiB
pub fn piece_length_for(size: u64) -> u64 {
    (size / 1024)
        .max(1)
        .next_power_of_two()
        .clamp(MIN_PIECE_LENGTH, MAX_PIECE_LENGTH)
}

impl Metainfo {
    pub fn build(
        name: &str,
        data: &[u8],
        options: &TorrentOptions,
        default_trackers: &[String],
    ) -> Self {
        let piece_length = piece_length_for(data.len() as u64);
        let mut pieces = Vec::with_capacity(data.len().div_ceil(piece_length as usize) * 20);
        for piece in data.chunks(piece_length as usize) {
            pieces.extend_from_slice(&Sha1::digest(piece));
        }
        Self::assemble(name, data.len() as u64, piece_length, pieces, options, default_trackers)
    }

    /// Same document as [`build`](Self::build), hashed piece by piece from
    /// `reader` so only one piece is held in memory. `length` must match
    /// what the reader yields.
    pub fn build_from_reader<R: Read>(
        name: &str,
        mut reader: R,
        length: u64,
        options: &TorrentOptions,
        default_trackers: &[String],
    ) -> io::Result<Self> {
        let piece_length = piece_length_for(length);
        let mut pieces = Vec::with_capacity(length.div_ceil(piece_length) as usize * 20);
        let mut buffer = vec![0u8; piece_length as usize];
        let mut total = 0u64;

        loop {
            let filled = fill_window(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            pieces.extend_from_slice(&Sha1::digest(&buffer[..filled]));
            total += filled as u64;
            if filled < buffer.len() {
                break;
            }
        }

        if total != length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} yielded {} of {} bytes", name, total, length),
            ));
        }
        Ok(Self::assemble(name, length, piece_length, pieces, options, default_trackers))
    }

    fn assemble(
        name: &str,
        length: u64,
        piece_length: u64,
        pieces: Vec<u8>,
        options: &TorrentOptions,
        default_trackers: &[String],
    ) -> Self {
        let trackers: Vec<String> = if options.announce.is_empty() {
            default_trackers.to_vec()
        } else {
            options.announce.clone()
        };

        Self {
            announce: trackers.first().cloned(),
            announce_list: trackers.iter().map(|t| vec![t.clone()]).collect(),
            comment: options.comment.clone(),
            created_by: Some(CREATED_BY.to_string()),
            info: Info {
                length,
                name: name.to_string(),
                piece_length,
                pieces,
            },
        }
    }

    pub fn to_bytes(&self) -> TransferResult<Vec<u8>> {
        serde_bencode::to_bytes(self).map_err(|e| TransferError::Torrent(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> TransferResult<Self> {
        serde_bencode::from_bytes(bytes).map_err(|e| TransferError::Torrent(e.to_string()))
    }

    /// Lowercase hex SHA-1 of the bencoded info dictionary
    pub fn info_hash(&self) -> TransferResult<String> {
        let encoded = serde_bencode::to_bytes(&self.info)
            .map_err(|e| TransferError::Torrent(e.to_string()))?;
        Ok(hex::encode(Sha1::digest(&encoded)))
    }

    pub fn trackers(&self) -> Vec<String> {
        let mut trackers: Vec<String> = self.announce_list.iter().flatten().cloned().collect();
        if let Some(announce) = &self.announce {
            if !trackers.contains(announce) {
                trackers.insert(0, announce.clone());
            }
        }
        trackers
    }

    pub fn magnet(&self) -> TransferResult<MagnetLink> {
        Ok(MagnetLink {
            info_hash: self.info_hash()?,
            display_name: Some(self.info.name.clone()),
            trackers: self.trackers(),
        })
    }

    /// Checks length and every piece hash against `data`
    pub fn verify(&self, data: &[u8]) -> bool {
        self.verify_reader(data).unwrap_or(false)
    }

    /// Streams `reader` one piece at a time against the piece hashes
    pub fn verify_reader<R: Read>(&self, mut reader: R) -> io::Result<bool> {
        if self.info.piece_length == 0 {
            return Ok(false);
        }
        let mut expected = self.info.pieces.chunks(20);
        let mut buffer = vec![0u8; self.info.piece_length as usize];
        let mut total = 0u64;

        loop {
            let filled = fill_window(&mut reader, &mut buffer)?;
            if filled == 0 {
                break;
            }
            match expected.next() {
                Some(hash) if Sha1::digest(&buffer[..filled]).as_slice() == hash => {}
                _ => return Ok(false),
            }
            total += filled as u64;
            if filled < buffer.len() {
                break;
            }
        }

        Ok(total == self.info.length && expected.next().is_none())
    }
}

/// `magnet:?xt=urn:btih:<hash>&dn=<name>&tr=<tracker>...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MagnetLink {
    /// Lowercase hex, 40 characters
    pub info_hash: String,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

impl MagnetLink {
    pub fn parse(uri: &str) -> TransferResult<Self> {
        let url = Url::parse(uri).map_err(|e| TransferError::Torrent(format!("{}: {}", uri, e)))?;
        if url.scheme() != "magnet" {
            return Err(TransferError::Torrent(format!(
                "not a magnet link: {}",
                uri
            )));
        }

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "xt" => {
                    if let Some(hash) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(normalize_info_hash(hash)?);
                    }
                }
                "dn" => display_name = Some(value.into_owned()),
                "tr" => trackers.push(value.into_owned()),
                _ => {}
            }
        }

        let info_hash = info_hash.ok_or_else(|| {
            TransferError::Torrent(format!("magnet link has no btih info-hash: {}", uri))
        })?;

        Ok(Self {
            info_hash,
            display_name,
            trackers,
        })
    }
}

fn normalize_info_hash(hash: &str) -> TransferResult<String> {
    match hash.len() {
        40 if hash.chars().all(|c| c.is_ascii_hexdigit()) => Ok(hash.to_ascii_lowercase()),
        32 => BASE32
            .decode(hash.to_ascii_uppercase().as_bytes())
            .map(hex::encode)
            .map_err(|e| TransferError::Torrent(format!("bad base32 info-hash: {}", e))),
        len => Err(TransferError::Torrent(format!(
            "invalid info-hash length: {}",
            len
        ))),
    }
}

impl fmt::Display for MagnetLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "magnet:?xt=urn:btih:{}", self.info_hash)?;
        if let Some(name) = &self.display_name {
            write!(f, "&dn={}", urlencoding::encode(name))?;
        }
        for tracker in &self.trackers {
            write!(f, "&tr={}", urlencoding::encode(tracker))?;
        }
        Ok(())
    }
}

impl FromStr for MagnetLink {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
