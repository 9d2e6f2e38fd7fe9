use std::env;
use std::net::SocketAddr;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Multipart part size (5 MiB, the S3 minimum for non-final parts)
pub const DEFAULT_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Read granularity of the content hasher (2 MiB)
pub const DEFAULT_HASH_WINDOW: usize = 2 * 1024 * 1024;

/// Public trackers announced when a torrent is created without its own list
pub const DEFAULT_TRACKERS: &[&str] = &[
    "udp://tracker.opentrackr.org:1337/announce",
    "udp://tracker.openbittorrent.com:6969/announce",
    "wss://tracker.openwebtorrent.com",
    "wss://tracker.webtorrent.dev",
];

/// Where multipart transactions are opened and finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    /// Through the marketplace REST API (pre-signed URLs handed out by the API)
    Http,
    /// Directly against an S3-compatible bucket
    S3,
}

impl FromStr for StorageMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "http" | "api" => Ok(StorageMode::Http),
            "s3" | "minio" => Ok(StorageMode::S3),
            other => Err(format!("unknown storage mode '{}'", other)),
        }
    }
}

/// Which peer-to-peer engine backs the distribution manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMode {
    /// BitTorrent over the network through librqbit
    Rqbit,
    /// In-process swarm shared by every manager attached to the same hub
    Local,
    /// No engine; every retrieval goes straight to the direct download
    Disabled,
}

impl FromStr for EngineMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "rqbit" | "bittorrent" => Ok(EngineMode::Rqbit),
            "local" => Ok(EngineMode::Local),
            "disabled" | "none" | "off" => Ok(EngineMode::Disabled),
            other => Err(format!("unknown p2p engine '{}'", other)),
        }
    }
}

/// Bucket credentials used when `storage_mode` is [`StorageMode::S3`]
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    /// Prefix under which new multipart objects are keyed
    pub key_prefix: String,
}

/// Transfer client configuration
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Marketplace API base URL
    pub api_base_url: String,

    /// Bearer token sent to the marketplace API
    pub api_token: Option<String>,

    /// Backend for multipart transactions (default: http)
    pub storage_mode: StorageMode,

    /// Multipart part size in bytes (default: 5 MiB)
    pub part_size: u64,

    /// Hasher read window in bytes (default: 2 MiB)
    pub hash_window_size: usize,

    /// Additional attempts per part after the first failure (default: 3)
    pub max_part_retries: u32,

    /// First backoff delay; doubles on every retry (default: 1s)
    pub retry_base_delay: Duration,

    /// Lower bound for a single part PUT deadline (default: 30s)
    pub min_part_timeout: Duration,

    /// Deadline budget per KiB of part body in milliseconds (default: 30)
    pub part_timeout_ms_per_kb: u64,

    /// Parts uploaded at once; 1 keeps strict ascending order (default: 1)
    pub max_concurrent_parts: usize,

    /// Directory holding durable upload state
    pub state_dir: PathBuf,

    /// Directory receiving completed downloads
    pub download_dir: PathBuf,

    /// Trackers announced by newly created torrents
    pub trackers: Vec<String>,

    /// How long the swarm gets before falling back to the direct download
    pub p2p_timeout: Duration,

    /// Peer-to-peer engine selection (default: rqbit)
    pub p2p_engine: EngineMode,

    /// Where the engine keeps swarm downloads and staged seeds
    pub p2p_work_dir: PathBuf,

    /// TCP ports the engine may listen on for peers
    pub p2p_listen_ports: Range<u16>,

    /// Peers dialled directly when joining a swarm
    pub p2p_peers: Vec<SocketAddr>,

    pub p2p_disable_dht: bool,

    /// Bucket settings for direct S3 mode
    pub s3: Option<S3Config>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000/api".to_string(),
            api_token: None,
            storage_mode: StorageMode::Http,
            part_size: DEFAULT_PART_SIZE,
            hash_window_size: DEFAULT_HASH_WINDOW,
            max_part_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            min_part_timeout: Duration::from_secs(30),
            part_timeout_ms_per_kb: 30,
            max_concurrent_parts: 1,
            state_dir: PathBuf::from(".model-transfer/state"),
            download_dir: PathBuf::from("downloads"),
            trackers: DEFAULT_TRACKERS.iter().map(|t| t.to_string()).collect(),
            p2p_timeout: Duration::from_secs(30),
            p2p_engine: EngineMode::Rqbit,
            p2p_work_dir: PathBuf::from(".model-transfer/p2p"),
            p2p_listen_ports: 4240..4260,
            p2p_peers: Vec::new(),
            p2p_disable_dht: false,
            s3: None,
        }
    }
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key)
        .ok()
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|list| !list.is_empty())
}

/// `"4240-4260"` as a half-open range; an empty range is rejected
fn parse_port_range(value: &str) -> Option<Range<u16>> {
    let (start, end) = value.trim().split_once('-')?;
    let range = start.trim().parse().ok()?..end.trim().parse().ok()?;
    (!range.is_empty()).then_some(range)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl TransferConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let storage_mode = env_or("STORAGE_MODE", default.storage_mode);

        Self {
            api_base_url: env::var("API_BASE_URL").unwrap_or(default.api_base_url),

            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),

            s3: if storage_mode == StorageMode::S3 {
                S3Config::from_env()
            } else {
                None
            },

            storage_mode,

            part_size: env_or("PART_SIZE", default.part_size),

            hash_window_size: env_or("HASH_WINDOW_SIZE", default.hash_window_size),

            max_part_retries: env_or("MAX_PART_RETRIES", default.max_part_retries),

            retry_base_delay: Duration::from_millis(env_or(
                "RETRY_BASE_DELAY_MS",
                default.retry_base_delay.as_millis() as u64,
            )),

            min_part_timeout: Duration::from_secs(env_or(
                "MIN_PART_TIMEOUT_SECS",
                default.min_part_timeout.as_secs(),
            )),

            part_timeout_ms_per_kb: env_or("PART_TIMEOUT_MS_PER_KB", default.part_timeout_ms_per_kb),

            max_concurrent_parts: env_or("MAX_CONCURRENT_PARTS", default.max_concurrent_parts),

            state_dir: env::var("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.state_dir),

            download_dir: env::var("DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.download_dir),

            trackers: env_list("TORRENT_TRACKERS").unwrap_or(default.trackers),

            p2p_timeout: Duration::from_millis(env_or(
                "P2P_TIMEOUT_MS",
                default.p2p_timeout.as_millis() as u64,
            )),

            p2p_engine: env_or("P2P_ENGINE", default.p2p_engine),

            p2p_work_dir: env::var("P2P_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.p2p_work_dir),

            p2p_listen_ports: env::var("P2P_LISTEN_PORTS")
                .ok()
                .and_then(|v| parse_port_range(&v))
                .unwrap_or(default.p2p_listen_ports),

            p2p_peers: env_list("P2P_PEERS")
                .map(|peers| peers.iter().filter_map(|p| p.parse().ok()).collect())
                .unwrap_or(default.p2p_peers),

            p2p_disable_dht: env_or("P2P_DISABLE_DHT", default.p2p_disable_dht),
        }
    }

    /// Short delays and deadlines for local development and tests
    pub fn development() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(10),
            min_part_timeout: Duration::from_secs(5),
            state_dir: env::temp_dir().join("model-transfer-dev"),
            download_dir: env::temp_dir().join("model-transfer-downloads"),
            p2p_timeout: Duration::from_secs(5),
            p2p_work_dir: env::temp_dir().join("model-transfer-p2p"),
            ..Self::default()
        }
    }

    /// Deadline for one part PUT: `max(min_part_timeout, size_KB * ms_per_kb)`
    pub fn part_timeout(&self, part_bytes: u64) -> Duration {
        let proportional =
            (part_bytes as f64 / 1024.0 * self.part_timeout_ms_per_kb as f64).ceil() as u64;
        Duration::from_millis(proportional).max(self.min_part_timeout)
    }

    /// Backoff before retry `attempt` (1-based): base, 2*base, 4*base, ...
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(1u32 << exponent)
    }
}

impl S3Config {
    /// Reads `MINIO_*` variables; `None` unless endpoint and bucket are both set
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("MINIO_ENDPOINT").ok()?;
        let bucket = env::var("MINIO_BUCKET").ok()?;
        Some(Self {
            endpoint,
            bucket,
            access_key: env::var("MINIO_ACCESS_KEY").unwrap_or_default(),
            secret_key: env::var("MINIO_SECRET_KEY").unwrap_or_default(),
            region: env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            key_prefix: env::var("MINIO_KEY_PREFIX").unwrap_or_else(|_| "models".to_string()),
        })
    }
}
