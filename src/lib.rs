pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{TransferError, TransferResult};

use crate::config::{EngineMode, StorageMode, TransferConfig};
use crate::infrastructure::kv::setup_state_store;
use crate::services::distribution::{
    DirectorySink, DistributionManager, EngineSource, LocalSwarm, LocalSwarmEngine, RqbitEngine,
    RqbitOptions, TorrentEngine,
};
use crate::services::hasher::ChunkedHasher;
use crate::services::marketplace::{CatalogApi, HttpMarketplaceApi, MultipartApi};
use crate::services::pipeline::PublishPipeline;
use crate::services::transport::{HttpTransport, ObjectTransport};
use crate::services::upload_state::UploadStateStore;
use crate::services::uploader::MultipartUploader;
use anyhow::Context;
use std::sync::Arc;

/// Every service of the transfer subsystem, wired from one [`TransferConfig`]
#[derive(Clone)]
pub struct TransferContext {
    pub config: TransferConfig,
    pub hasher: ChunkedHasher,
    pub catalog: Arc<dyn CatalogApi>,
    pub uploader: Arc<MultipartUploader>,
    pub distribution: Arc<DistributionManager>,
}

impl TransferContext {
    pub async fn from_config(config: TransferConfig) -> anyhow::Result<Self> {
        let marketplace = Arc::new(HttpMarketplaceApi::new(
            &config.api_base_url,
            config.api_token.clone(),
        )?);

        let multipart: Arc<dyn MultipartApi> = match config.storage_mode {
            StorageMode::Http => marketplace.clone(),
            StorageMode::S3 => {
                let s3 = config
                    .s3
                    .as_ref()
                    .context("STORAGE_MODE=s3 needs MINIO_ENDPOINT and credentials")?;
                infrastructure::storage::setup_storage(s3).await
            }
        };

        let kv = Arc::new(setup_state_store(&config.state_dir).await?);
        let state = UploadStateStore::new(kv, config.part_size);
        let transport: Arc<dyn ObjectTransport> = Arc::new(HttpTransport::new()?);

        let uploader = Arc::new(MultipartUploader::new(
            multipart,
            transport.clone(),
            state,
            config.clone(),
        ));

        let engine = match config.p2p_engine {
            EngineMode::Rqbit => {
                let options = RqbitOptions {
                    work_dir: config.p2p_work_dir.clone(),
                    listen_ports: config.p2p_listen_ports.clone(),
                    initial_peers: config.p2p_peers.clone(),
                    disable_dht: config.p2p_disable_dht,
                };
                EngineSource::loading(async move {
                    let engine = RqbitEngine::start(options).await?;
                    Ok::<_, anyhow::Error>(Arc::new(engine) as Arc<dyn TorrentEngine>)
                })
            }
            EngineMode::Local => {
                EngineSource::Ready(Arc::new(LocalSwarmEngine::new(LocalSwarm::new())))
            }
            EngineMode::Disabled => {
                EngineSource::Unavailable("P2P_ENGINE=disabled".to_string())
            }
        };
        let distribution = Arc::new(DistributionManager::new(
            engine,
            transport,
            Arc::new(DirectorySink::new(&config.download_dir)),
            config.trackers.clone(),
        ));

        Ok(Self {
            hasher: ChunkedHasher::from_config(&config),
            catalog: marketplace,
            uploader,
            distribution,
            config,
        })
    }

    pub fn pipeline(&self) -> PublishPipeline {
        PublishPipeline::new(
            self.hasher.clone(),
            self.catalog.clone(),
            self.uploader.clone(),
            Some(self.distribution.clone()),
        )
    }
}
