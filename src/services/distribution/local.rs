//! In-process swarm engine. Peers are engines attached to the same
//! [`LocalSwarm`] hub; content moves between them piece-verified. Used where
//! a networked engine is not wanted, such as tests and single-host setups.

use super::engine::{SwarmHandle, TorrentEngine};
use super::metainfo::{MagnetLink, Metainfo};
use crate::models::{LocalFile, SwarmStats};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Notify, OnceCell};
use tokio::time::Instant;
use tracing::{debug, info};

struct Swarm {
    metainfo: Metainfo,
    info_hash: String,
    content: LocalFile,
    seeds: AtomicUsize,
    leechers: AtomicUsize,
    served: AtomicU64,
}

/// Shared rendezvous point for [`LocalSwarmEngine`]s
#[derive(Default)]
pub struct LocalSwarm {
    swarms: DashMap<String, Arc<Swarm>>,
    announced: Notify,
}

impl LocalSwarm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn swarm_count(&self) -> usize {
        self.swarms.len()
    }

    pub fn is_seeded(&self, info_hash: &str) -> bool {
        self.swarms
            .get(info_hash)
            .is_some_and(|s| s.seeds.load(Ordering::SeqCst) > 0)
    }

    fn find(&self, info_hash: &str) -> Option<Arc<Swarm>> {
        self.swarms.get(info_hash).map(|s| s.value().clone())
    }

    fn leave(&self, swarm: &Swarm, was_seed: bool) {
        let counter = if was_seed {
            &swarm.seeds
        } else {
            &swarm.leechers
        };
        counter.fetch_sub(1, Ordering::SeqCst);
        self.swarms
            .remove_if(&swarm.info_hash, |_, s| s.seeds.load(Ordering::SeqCst) == 0);
    }
}

pub struct LocalSwarmEngine {
    hub: Arc<LocalSwarm>,
}

impl LocalSwarmEngine {
    pub fn new(hub: Arc<LocalSwarm>) -> Self {
        Self { hub }
    }
}

async fn matches_pieces(metainfo: &Metainfo, content: &LocalFile) -> Result<bool> {
    let metainfo = metainfo.clone();
    let content = content.clone();
    let verified =
        tokio::task::spawn_blocking(move || metainfo.verify_reader(content.blocking_reader()?))
            .await??;
    Ok(verified)
}

#[async_trait]
impl TorrentEngine for LocalSwarmEngine {
    async fn seed(
        &self,
        metainfo: &Metainfo,
        content: &LocalFile,
    ) -> Result<Arc<dyn SwarmHandle>> {
        if !matches_pieces(metainfo, content).await? {
            bail!("content does not match the piece hashes of {}", metainfo.info.name);
        }
        let info_hash = metainfo.info_hash()?;
        let content = content.clone().renamed(metainfo.info.name.clone());

        let swarm = self
            .hub
            .swarms
            .entry(info_hash.clone())
            .or_insert_with(|| {
                Arc::new(Swarm {
                    metainfo: metainfo.clone(),
                    info_hash: info_hash.clone(),
                    content: content.clone(),
                    seeds: AtomicUsize::new(0),
                    leechers: AtomicUsize::new(0),
                    served: AtomicU64::new(0),
                })
            })
            .value()
            .clone();
        swarm.seeds.fetch_add(1, Ordering::SeqCst);
        self.hub.announced.notify_waiters();

        info!("📡 Local swarm {} has a new seed", info_hash);
        Ok(Arc::new(LocalHandle::new(
            self.hub.clone(),
            swarm,
            Some(content),
        )))
    }

    async fn join(&self, magnet: &MagnetLink) -> Result<Arc<dyn SwarmHandle>> {
        loop {
            let announced = self.hub.announced.notified();
            tokio::pin!(announced);
            announced.as_mut().enable();

            if let Some(swarm) = self.hub.find(&magnet.info_hash) {
                swarm.leechers.fetch_add(1, Ordering::SeqCst);
                debug!("Joined local swarm {}", magnet.info_hash);
                return Ok(Arc::new(LocalHandle::new(self.hub.clone(), swarm, None)));
            }

            announced.await;
        }
    }
}

struct LocalHandle {
    hub: Arc<LocalSwarm>,
    swarm: Arc<Swarm>,
    content: OnceCell<LocalFile>,
    downloaded: AtomicU64,
    seeding: AtomicBool,
    closed: AtomicBool,
    started: Instant,
}

impl LocalHandle {
    fn new(hub: Arc<LocalSwarm>, swarm: Arc<Swarm>, content: Option<LocalFile>) -> Self {
        let seeding = content.is_some();
        Self {
            hub,
            swarm,
            content: OnceCell::new_with(content),
            downloaded: AtomicU64::new(0),
            seeding: AtomicBool::new(seeding),
            closed: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    async fn download(&self) -> Result<LocalFile> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("swarm {} was closed", self.swarm.info_hash);
        }
        if !self.hub.is_seeded(&self.swarm.info_hash) {
            return Err(anyhow!("swarm {} has no seeds left", self.swarm.info_hash));
        }
        if !matches_pieces(&self.swarm.metainfo, &self.swarm.content).await? {
            bail!("piece verification failed for {}", self.swarm.info_hash);
        }

        let file = self.swarm.content.clone();
        self.downloaded.fetch_add(file.size(), Ordering::SeqCst);
        self.swarm.served.fetch_add(file.size(), Ordering::SeqCst);

        // promote to seed
        self.swarm.seeds.fetch_add(1, Ordering::SeqCst);
        self.swarm.leechers.fetch_sub(1, Ordering::SeqCst);
        self.seeding.store(true, Ordering::SeqCst);

        debug!(
            "Fetched {} bytes from local swarm {}",
            file.size(),
            self.swarm.info_hash
        );
        Ok(file)
    }
}

#[async_trait]
impl SwarmHandle for LocalHandle {
    fn info_hash(&self) -> &str {
        &self.swarm.info_hash
    }

    fn name(&self) -> String {
        self.swarm.metainfo.info.name.clone()
    }

    fn stats(&self) -> SwarmStats {
        let seeds = self.swarm.seeds.load(Ordering::SeqCst);
        let leechers = self.swarm.leechers.load(Ordering::SeqCst);
        let seeding = self.seeding.load(Ordering::SeqCst);
        let members = seeds + leechers;
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::EPSILON);

        // served bytes are shared by every seed of the swarm
        let uploaded = if seeding {
            self.swarm.served.load(Ordering::SeqCst)
        } else {
            0
        };
        let downloaded = self.downloaded.load(Ordering::SeqCst);

        SwarmStats {
            uploaded,
            downloaded,
            peers: members.saturating_sub(1),
            seeds,
            progress: if seeding { 1.0 } else { 0.0 },
            download_speed: downloaded as f64 / elapsed,
            upload_speed: uploaded as f64 / elapsed,
        }
    }

    async fn first_file(&self) -> Result<LocalFile> {
        let file = self.content.get_or_try_init(|| self.download()).await?;
        Ok(file.clone())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.hub
            .leave(&self.swarm, self.seeding.load(Ordering::SeqCst));
        debug!("Left local swarm {}", self.swarm.info_hash);
    }
}
