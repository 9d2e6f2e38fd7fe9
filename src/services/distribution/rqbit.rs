//! Networked engine backed by one librqbit session. Trackers, DHT and
//! incoming peer connections are all handled by rqbit.

use super::engine::{SwarmHandle, TorrentEngine};
use super::metainfo::{MagnetLink, Metainfo};
use super::sink::check_file_name;
use crate::models::{FileSource, LocalFile, SwarmStats};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, ManagedTorrent, Session, SessionOptions};
use std::net::SocketAddr;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// rqbit reports speeds in MiB/s
const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone)]
pub struct RqbitOptions {
    /// Swarm downloads land in `<work_dir>/swarm`, staged seeds in `<work_dir>/seeds`
    pub work_dir: PathBuf,
    pub listen_ports: Range<u16>,
    /// Peers dialled directly, on top of trackers and DHT
    pub initial_peers: Vec<SocketAddr>,
    pub disable_dht: bool,
}

pub struct RqbitEngine {
    session: Arc<Session>,
    work_dir: PathBuf,
    initial_peers: Vec<SocketAddr>,
}

impl RqbitEngine {
    pub async fn start(options: RqbitOptions) -> Result<Self> {
        let swarm_dir = options.work_dir.join("swarm");
        tokio::fs::create_dir_all(&swarm_dir)
            .await
            .with_context(|| format!("creating {}", swarm_dir.display()))?;

        let session = Session::new_with_opts(
            swarm_dir,
            SessionOptions {
                disable_dht: options.disable_dht,
                disable_dht_persistence: true,
                listen_port_range: Some(options.listen_ports.clone()),
                ..Default::default()
            },
        )
        .await
        .context("starting rqbit session")?;

        info!(
            "🧲 rqbit session up (ports {}..{}, dht {})",
            options.listen_ports.start,
            options.listen_ports.end,
            if options.disable_dht { "off" } else { "on" }
        );
        Ok(Self {
            session,
            work_dir: options.work_dir,
            initial_peers: options.initial_peers,
        })
    }

    fn add_options(&self, output_folder: &Path) -> AddTorrentOptions {
        AddTorrentOptions {
            overwrite: true,
            output_folder: Some(output_folder.to_string_lossy().into_owned()),
            initial_peers: (!self.initial_peers.is_empty()).then(|| self.initial_peers.clone()),
            ..Default::default()
        }
    }

    async fn add(
        &self,
        torrent: AddTorrent<'_>,
        output_folder: &Path,
        info_hash: &str,
    ) -> Result<Arc<ManagedTorrent>> {
        self.session
            .add_torrent(torrent, Some(self.add_options(output_folder)))
            .await
            .with_context(|| format!("adding {} to rqbit", info_hash))?
            .into_handle()
            .ok_or_else(|| anyhow!("rqbit returned no handle for {}", info_hash))
    }

    /// Places `content` at `<work_dir>/seeds/<info_hash>/<name>`, hard-linking
    /// on-disk files where the filesystem allows it
    async fn stage(&self, info_hash: &str, name: &str, content: &LocalFile) -> Result<PathBuf> {
        let folder = self.work_dir.join("seeds").join(info_hash);
        tokio::fs::create_dir_all(&folder).await?;
        let target = folder.join(name);

        match content.source() {
            FileSource::Memory(data) => tokio::fs::write(&target, data).await?,
            FileSource::Path(source) => {
                if tokio::fs::try_exists(&target).await? {
                    tokio::fs::remove_file(&target).await?;
                }
                if let Err(e) = tokio::fs::hard_link(source, &target).await {
                    debug!("Hard link failed ({}); copying {}", e, source.display());
                    tokio::fs::copy(source, &target).await?;
                }
            }
        }
        Ok(folder)
    }
}

/// Folder rqbit can seed from as-is: the content already sits at `<folder>/<name>`
fn seed_folder(content: &LocalFile, name: &str) -> Option<PathBuf> {
    let path = content.path()?;
    if path.file_name()? != name {
        return None;
    }
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Some(parent.to_path_buf()),
        _ => Some(PathBuf::from(".")),
    }
}

#[async_trait]
impl TorrentEngine for RqbitEngine {
    async fn seed(
        &self,
        metainfo: &Metainfo,
        content: &LocalFile,
    ) -> Result<Arc<dyn SwarmHandle>> {
        let info_hash = metainfo.info_hash()?;
        let name = metainfo.info.name.clone();
        check_file_name(&name)?;

        let folder = match seed_folder(content, &name) {
            Some(folder) => folder,
            None => self.stage(&info_hash, &name, content).await?,
        };

        let torrent = Bytes::from(metainfo.to_bytes()?);
        let handle = self
            .add(AddTorrent::from_bytes(torrent), &folder, &info_hash)
            .await?;
        // rqbit checks the existing file against the pieces before serving it
        handle.wait_until_completed().await?;

        info!("📡 rqbit seeding {} from {}", info_hash, folder.display());
        Ok(Arc::new(RqbitHandle {
            session: self.session.clone(),
            handle,
            info_hash,
            name,
            folder,
            closed: AtomicBool::new(false),
        }))
    }

    async fn join(&self, magnet: &MagnetLink) -> Result<Arc<dyn SwarmHandle>> {
        let folder = self.work_dir.join("swarm").join(&magnet.info_hash);
        let handle = self
            .add(AddTorrent::from_url(magnet.to_string()), &folder, &magnet.info_hash)
            .await?;

        debug!("Joined rqbit swarm {}", magnet.info_hash);
        Ok(Arc::new(RqbitHandle {
            session: self.session.clone(),
            handle,
            info_hash: magnet.info_hash.clone(),
            name: magnet
                .display_name
                .clone()
                .unwrap_or_else(|| magnet.info_hash.clone()),
            folder,
            closed: AtomicBool::new(false),
        }))
    }
}

struct RqbitHandle {
    session: Arc<Session>,
    handle: Arc<ManagedTorrent>,
    info_hash: String,
    name: String,
    folder: PathBuf,
    closed: AtomicBool,
}

impl RqbitHandle {
    async fn locate(&self) -> Result<PathBuf> {
        let expected = self.folder.join(&self.name);
        if tokio::fs::try_exists(&expected).await? {
            return Ok(expected);
        }

        let mut entries = tokio::fs::read_dir(&self.folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if !hidden && entry.file_type().await?.is_file() {
                return Ok(entry.path());
            }
        }
        Err(anyhow!(
            "swarm {} finished but {} holds no file",
            self.info_hash,
            self.folder.display()
        ))
    }
}

#[async_trait]
impl SwarmHandle for RqbitHandle {
    fn info_hash(&self) -> &str {
        &self.info_hash
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn stats(&self) -> SwarmStats {
        let stats = self.handle.stats();
        let (peers, downloaded, download_speed, upload_speed) = match &stats.live {
            Some(live) => (
                live.snapshot.peer_stats.live as usize,
                live.snapshot.fetched_bytes,
                live.download_speed.mbps * MIB,
                live.upload_speed.mbps * MIB,
            ),
            None => (0, 0, 0.0, 0.0),
        };
        let progress = match stats.total_bytes {
            0 if stats.finished => 1.0,
            0 => 0.0,
            total => stats.progress_bytes as f64 / total as f64,
        };

        SwarmStats {
            uploaded: stats.uploaded_bytes,
            downloaded,
            peers,
            // rqbit does not split peers into seeds and leechers; count ourselves
            seeds: usize::from(stats.finished),
            progress,
            download_speed,
            upload_speed,
        }
    }

    async fn first_file(&self) -> Result<LocalFile> {
        self.handle
            .wait_until_completed()
            .await
            .with_context(|| format!("downloading {}", self.info_hash))?;
        let path = self.locate().await?;
        Ok(LocalFile::open(&path).await?)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // files stay on disk; only the torrent leaves the session
        match self
            .session
            .delete(TorrentIdOrHash::Id(self.handle.id()), false)
            .await
        {
            Ok(()) => debug!("Left rqbit swarm {}", self.info_hash),
            Err(e) => warn!("⚠️ rqbit could not drop {}: {:#}", self.info_hash, e),
        }
    }
}
