use super::metainfo::{MagnetLink, Metainfo};
use crate::models::{LocalFile, SwarmStats};
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// A peer-to-peer transfer engine.
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Starts seeding `content` described by `metainfo`. On-disk content is
    /// served from disk, never loaded whole.
    async fn seed(
        &self,
        metainfo: &Metainfo,
        content: &LocalFile,
    ) -> Result<Arc<dyn SwarmHandle>>;

    /// Joins the swarm behind `magnet`; resolves once the swarm's metadata is known
    async fn join(&self, magnet: &MagnetLink) -> Result<Arc<dyn SwarmHandle>>;
}

/// Membership in one swarm
#[async_trait]
pub trait SwarmHandle: Send + Sync {
    fn info_hash(&self) -> &str;

    fn name(&self) -> String;

    fn stats(&self) -> SwarmStats;

    /// Downloads (if needed) and returns the first file of the torrent,
    /// named after the torrent
    async fn first_file(&self) -> Result<LocalFile>;

    /// Leaves the swarm. Calling it again is a no-op.
    async fn close(&self);
}

/// Readiness of the engine behind a distribution manager
#[derive(Clone)]
pub enum EngineState {
    Loading,
    Ready(Arc<dyn TorrentEngine>),
    Unavailable(String),
}

impl EngineState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Ready(_) => "ready",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl fmt::Debug for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loading => f.write_str("Loading"),
            Self::Ready(_) => f.write_str("Ready(..)"),
            Self::Unavailable(reason) => f.debug_tuple("Unavailable").field(reason).finish(),
        }
    }
}

/// How a manager obtains its engine
pub enum EngineSource {
    Ready(Arc<dyn TorrentEngine>),
    Unavailable(String),
    /// Spawned on construction; the manager is `Loading` until it resolves
    Loading(BoxFuture<'static, Result<Arc<dyn TorrentEngine>>>),
}

impl EngineSource {
    pub fn loading<F>(loader: F) -> Self
    where
        F: Future<Output = Result<Arc<dyn TorrentEngine>>> + Send + 'static,
    {
        Self::Loading(Box::pin(loader))
    }
}
