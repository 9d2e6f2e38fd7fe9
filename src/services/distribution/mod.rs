pub mod engine;
pub mod local;
pub mod metainfo;
pub mod rqbit;
pub mod sink;

pub use engine::{EngineSource, EngineState, SwarmHandle, TorrentEngine};
pub use local::{LocalSwarm, LocalSwarmEngine};
pub use metainfo::{MagnetLink, Metainfo};
pub use rqbit::{RqbitEngine, RqbitOptions};
pub use sink::{DirectorySink, DownloadSink};

use crate::error::{TransferError, TransferResult, describe};
use crate::models::{LocalFile, SeedStatus, TorrentDescriptor, TorrentOptions};
use crate::services::transport::ObjectTransport;
use bytes::Bytes;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Where a downloaded file came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    Swarm(PathBuf),
    Direct(PathBuf),
}

impl DownloadSource {
    pub fn path(&self) -> &PathBuf {
        match self {
            Self::Swarm(path) | Self::Direct(path) => path,
        }
    }
}

enum RaceOutcome {
    Swarm(PathBuf),
    /// Timer won or the swarm failed
    Lost,
    /// Engine was not ready; the swarm was never tried
    Unready,
}

type JoinedSlot = Arc<Mutex<Option<Arc<dyn SwarmHandle>>>>;

/// Packages uploads as torrents, seeds them, and retrieves files from swarms
/// with a direct-download fallback.
pub struct DistributionManager {
    state: watch::Receiver<EngineState>,
    seeds: DashMap<String, Arc<dyn SwarmHandle>>,
    transport: Arc<dyn ObjectTransport>,
    sink: Arc<dyn DownloadSink>,
    default_trackers: Vec<String>,
}

impl DistributionManager {
    /// A `Loading` source is spawned onto the current runtime.
    pub fn new(
        source: EngineSource,
        transport: Arc<dyn ObjectTransport>,
        sink: Arc<dyn DownloadSink>,
        default_trackers: Vec<String>,
    ) -> Self {
        let state = match source {
            EngineSource::Ready(engine) => watch::channel(EngineState::Ready(engine)).1,
            EngineSource::Unavailable(reason) => {
                warn!("⚠️ P2P engine unavailable: {}", reason);
                watch::channel(EngineState::Unavailable(reason)).1
            }
            EngineSource::Loading(loader) => {
                let (tx, rx) = watch::channel(EngineState::Loading);
                tokio::spawn(async move {
                    let next = match loader.await {
                        Ok(engine) => {
                            info!("🧲 P2P engine ready");
                            EngineState::Ready(engine)
                        }
                        Err(e) => {
                            error!("❌ P2P engine failed to load: {:#}", e);
                            EngineState::Unavailable(describe(&e))
                        }
                    };
                    tx.send_replace(next);
                });
                rx
            }
        };

        Self {
            state,
            seeds: DashMap::new(),
            transport,
            sink,
            default_trackers,
        }
    }

    pub fn with_engine(
        engine: Arc<dyn TorrentEngine>,
        transport: Arc<dyn ObjectTransport>,
        sink: Arc<dyn DownloadSink>,
        default_trackers: Vec<String>,
    ) -> Self {
        Self::new(
            EngineSource::Ready(engine),
            transport,
            sink,
            default_trackers,
        )
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.borrow().clone()
    }

    fn current_engine(&self) -> Option<Arc<dyn TorrentEngine>> {
        match &*self.state.borrow() {
            EngineState::Ready(engine) => Some(engine.clone()),
            _ => None,
        }
    }

    /// Waits out `Loading`; fails fast once the engine is `Unavailable`
    pub async fn ready(&self) -> TransferResult<Arc<dyn TorrentEngine>> {
        let mut state = self.state.clone();
        loop {
            let current = state.borrow_and_update().clone();
            match current {
                EngineState::Ready(engine) => return Ok(engine),
                EngineState::Unavailable(reason) => {
                    return Err(TransferError::EngineUnavailable(reason));
                }
                EngineState::Loading => {}
            }
            if state.changed().await.is_err() {
                return Err(TransferError::EngineUnavailable(
                    "engine loader stopped before finishing".to_string(),
                ));
            }
        }
    }

    /// Packages `file` as a torrent and seeds it. Seeding the same content
    /// twice keeps the existing seed.
    pub async fn create_torrent(
        &self,
        file: &LocalFile,
        options: TorrentOptions,
    ) -> TransferResult<TorrentDescriptor> {
        let engine = self.ready().await?;
        let name = options
            .name
            .clone()
            .unwrap_or_else(|| file.name().to_string());

        let trackers = self.default_trackers.clone();
        let content = file.clone();
        let metainfo = tokio::task::spawn_blocking(move || {
            let reader = content.blocking_reader()?;
            Metainfo::build_from_reader(&name, reader, content.size(), &options, &trackers)
        })
        .await
        .map_err(|e| TransferError::Torrent(e.to_string()))??;

        let info_hash = metainfo.info_hash()?;
        let magnet = metainfo.magnet()?;
        let torrent_file = Bytes::from(metainfo.to_bytes()?);

        if self.seeds.contains_key(&info_hash) {
            debug!("Already seeding {}", info_hash);
        } else {
            let handle = engine
                .seed(&metainfo, file)
                .await
                .map_err(|e| TransferError::Engine(describe(&e)))?;
            if let Some(previous) = self.seeds.insert(info_hash.clone(), handle) {
                previous.close().await;
            }
            info!(
                "🌱 Seeding {} ({} bytes) as {}",
                metainfo.info.name, metainfo.info.length, info_hash
            );
        }

        Ok(TorrentDescriptor {
            magnet_uri: magnet.to_string(),
            info_hash,
            torrent_file,
        })
    }

    /// Fetches a stored object and seeds it under `file_name`
    pub async fn create_torrent_from_url(
        &self,
        url: &str,
        file_name: &str,
        options: TorrentOptions,
    ) -> TransferResult<TorrentDescriptor> {
        let data = self
            .transport
            .fetch(url)
            .await
            .map_err(|e| TransferError::Download(describe(&e)))?;
        let file = LocalFile::from_bytes(file_name, data);
        self.create_torrent(&file, options).await
    }

    /// Joins the swarm behind `magnet`, downloads it and keeps seeding.
    /// Returns the info-hash the seed is registered under.
    pub async fn start_seeding(&self, magnet: &str) -> TransferResult<String> {
        let link = MagnetLink::parse(magnet)?;
        if self.seeds.contains_key(&link.info_hash) {
            return Ok(link.info_hash);
        }

        let engine = self.ready().await?;
        let handle = engine
            .join(&link)
            .await
            .map_err(|e| TransferError::Engine(describe(&e)))?;
        if let Err(e) = handle.first_file().await {
            handle.close().await;
            return Err(TransferError::Engine(describe(&e)));
        }

        if let Some(previous) = self.seeds.insert(link.info_hash.clone(), handle) {
            previous.close().await;
        }
        info!("🌱 Seeding {} from swarm", link.info_hash);
        Ok(link.info_hash)
    }

    /// Returns `false` when nothing was seeded under `info_hash`
    pub async fn stop_seeding(&self, info_hash: &str) -> bool {
        match self.seeds.remove(info_hash) {
            Some((_, handle)) => {
                handle.close().await;
                info!("🛑 Stopped seeding {}", info_hash);
                true
            }
            None => false,
        }
    }

    pub fn seeding_status(&self) -> Vec<SeedStatus> {
        let mut status: Vec<SeedStatus> = self
            .seeds
            .iter()
            .map(|entry| SeedStatus {
                info_hash: entry.key().clone(),
                name: entry.value().name(),
                stats: entry.value().stats(),
            })
            .collect();
        status.sort_by(|a, b| a.name.cmp(&b.name).then(a.info_hash.cmp(&b.info_hash)));
        status
    }

    /// Races a swarm download of `magnet` against `timeout`.
    ///
    /// Returns `true` when the swarm delivered the file into the sink. When the
    /// engine is not ready the file is downloaded from `fallback_url` right
    /// away and `false` is returned, whether or not that download worked. A
    /// zero timeout never touches the swarm.
    pub async fn download_with_timeout(
        &self,
        magnet: &str,
        fallback_url: &str,
        file_name: &str,
        timeout: Duration,
    ) -> TransferResult<bool> {
        match self.race(magnet, file_name, timeout).await {
            RaceOutcome::Swarm(_) => Ok(true),
            RaceOutcome::Lost => Ok(false),
            RaceOutcome::Unready => {
                if let Err(e) = self.fetch_direct(fallback_url, file_name).await {
                    warn!("⚠️ Direct download of {} failed: {}", file_name, e);
                }
                Ok(false)
            }
        }
    }

    /// Like [`download_with_timeout`](Self::download_with_timeout), but
    /// always ends with the file in the sink.
    pub async fn download_or_fallback(
        &self,
        magnet: &str,
        fallback_url: &str,
        file_name: &str,
        timeout: Duration,
    ) -> TransferResult<DownloadSource> {
        match self.race(magnet, file_name, timeout).await {
            RaceOutcome::Swarm(path) => Ok(DownloadSource::Swarm(path)),
            RaceOutcome::Lost | RaceOutcome::Unready => {
                info!("↩️ Falling back to direct download of {}", file_name);
                let path = self.fetch_direct(fallback_url, file_name).await?;
                Ok(DownloadSource::Direct(path))
            }
        }
    }

    pub async fn fetch_direct(&self, url: &str, file_name: &str) -> TransferResult<PathBuf> {
        let data = self
            .transport
            .fetch(url)
            .await
            .map_err(|e| TransferError::Download(describe(&e)))?;
        let size = data.len();
        let path = self
            .sink
            .save(file_name, data)
            .await
            .map_err(|e| TransferError::Download(describe(&e)))?;
        info!("⬇️ Downloaded {} ({} bytes) directly", file_name, size);
        Ok(path)
    }

    /// Closes every seed. Returns how many were closed.
    pub async fn shutdown(&self) -> usize {
        let hashes: Vec<String> = self.seeds.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for hash in hashes {
            if self.stop_seeding(&hash).await {
                closed += 1;
            }
        }
        if closed > 0 {
            info!("👋 Distribution shut down, {} seeds closed", closed);
        }
        closed
    }

    async fn race(&self, magnet: &str, file_name: &str, timeout: Duration) -> RaceOutcome {
        let Some(engine) = self.current_engine() else {
            warn!(
                "⚠️ P2P engine is {}; downloading {} directly",
                self.engine_state().label(),
                file_name
            );
            return RaceOutcome::Unready;
        };

        if timeout.is_zero() {
            return RaceOutcome::Lost;
        }

        let link = match MagnetLink::parse(magnet) {
            Ok(link) => link,
            Err(e) => {
                warn!("⚠️ Skipping swarm download: {}", e);
                return RaceOutcome::Lost;
            }
        };

        let joined: JoinedSlot = Arc::default();
        let outcome = tokio::select! {
            biased;
            result = self.fetch_from_swarm(engine, &link, file_name, joined.clone()) => match result {
                Ok(path) => {
                    info!("🧲 Downloaded {} from swarm {}", file_name, link.info_hash);
                    RaceOutcome::Swarm(path)
                }
                Err(e) => {
                    warn!("⚠️ Swarm download of {} failed: {}", file_name, e);
                    RaceOutcome::Lost
                }
            },
            _ = tokio::time::sleep(timeout) => {
                info!("⏱️ Swarm download of {} timed out after {:?}", file_name, timeout);
                RaceOutcome::Lost
            }
        };

        let leftover = joined.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = leftover {
            handle.close().await;
        }
        outcome
    }

    async fn fetch_from_swarm(
        &self,
        engine: Arc<dyn TorrentEngine>,
        link: &MagnetLink,
        file_name: &str,
        joined: JoinedSlot,
    ) -> TransferResult<PathBuf> {
        let handle = engine
            .join(link)
            .await
            .map_err(|e| TransferError::Engine(describe(&e)))?;
        if let Ok(mut slot) = joined.lock() {
            *slot = Some(handle.clone());
        }

        let file = handle
            .first_file()
            .await
            .map_err(|e| TransferError::Engine(describe(&e)))?;
        self.sink
            .store(file_name, &file)
            .await
            .map_err(|e| TransferError::Download(describe(&e)))
    }
}
