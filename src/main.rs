use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use model_transfer::TransferContext;
use model_transfer::config::TransferConfig;
use model_transfer::models::{LocalFile, TorrentOptions};
use model_transfer::services::distribution::DownloadSource;
use model_transfer::services::pipeline::{PublishOutcome, PublishProgress, PublishRequest};
use model_transfer::services::uploader::transfer_id_for;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "model-transfer", version, about = "Large model file transfers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the content fingerprint of a file
    Hash { path: PathBuf },
    /// Upload (or resume) a file
    Upload {
        path: PathBuf,
        /// Resume an existing transfer
        #[arg(long)]
        transfer_id: Option<String>,
        /// Run the dedup check and attach the result to this record
        #[arg(long)]
        record_id: Option<String>,
        /// Seed the uploaded file until Ctrl-C
        #[arg(long, requires = "record_id")]
        seed: bool,
    },
    /// List uploads that can be resumed
    List,
    /// Abort an upload and forget its state
    Abandon { transfer_id: String },
    /// Package a file as a torrent and seed it until Ctrl-C
    Torrent {
        path: PathBuf,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        comment: Option<String>,
        /// Write the .torrent file here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch a file from its swarm, falling back to a direct download
    Download {
        magnet: String,
        #[arg(long)]
        fallback_url: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "model_transfer=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = TransferConfig::from_env();
    info!(
        "⚙️ Config: API={}, storage={:?}, part size={}MB, retries={}, engine={:?}",
        config.api_base_url,
        config.storage_mode,
        config.part_size / 1024 / 1024,
        config.max_part_retries,
        config.p2p_engine
    );
    let ctx = TransferContext::from_config(config).await?;

    match cli.command {
        Command::Hash { path } => {
            let file = LocalFile::open(&path).await?;
            let fingerprint = ctx.hasher.hash_file(&file).await?;
            println!("{}  {}", fingerprint, path.display());
        }
        Command::Upload {
            path,
            transfer_id,
            record_id,
            seed,
        } => {
            let file = LocalFile::open(&path).await?;
            match record_id {
                Some(record_id) => {
                    let request = PublishRequest {
                        record_id,
                        transfer_id,
                        seed: seed.then(|| TorrentOptions::named(file.name())),
                    };
                    let outcome = ctx
                        .pipeline()
                        .publish(&file, request, |p| match p {
                            PublishProgress::Hashing(p) => info!("🔐 hashing {}%", p),
                            PublishProgress::Uploading(p) => info!("📤 uploading {}%", p),
                        })
                        .await?;
                    match outcome {
                        PublishOutcome::Duplicate { record_id, .. } => {
                            println!("duplicate of record {}", record_id.unwrap_or_default());
                        }
                        PublishOutcome::Uploaded(published) => {
                            println!("{}", published.url);
                            if let Some(torrent) = published.torrent {
                                println!("{}", torrent.magnet_uri);
                                wait_for_ctrl_c().await;
                            }
                        }
                    }
                }
                None => {
                    let transfer_id = transfer_id.unwrap_or_else(|| transfer_id_for(file.name()));
                    info!("📤 Transfer id: {}", transfer_id);
                    let url = ctx
                        .uploader
                        .upload_with_progress(&transfer_id, &file, |p| {
                            info!("📤 uploading {}%", p)
                        })
                        .await?;
                    println!("{}", url);
                }
            }
        }
        Command::List => {
            for upload in ctx.uploader.list_incomplete().await? {
                println!(
                    "{}\t{}\t{}%\t{}",
                    upload.id,
                    upload.file_name,
                    upload.progress,
                    upload.created_at.to_rfc3339()
                );
            }
        }
        Command::Abandon { transfer_id } => {
            if ctx.uploader.abandon(&transfer_id).await? {
                println!("abandoned {}", transfer_id);
            } else {
                println!("no upload named {}", transfer_id);
            }
        }
        Command::Torrent {
            path,
            name,
            comment,
            out,
        } => {
            let file = LocalFile::open(&path).await?;
            let options = TorrentOptions {
                name,
                comment,
                announce: Vec::new(),
            };
            let torrent = ctx.distribution.create_torrent(&file, options).await?;
            if let Some(out) = out {
                tokio::fs::write(&out, &torrent.torrent_file)
                    .await
                    .with_context(|| format!("writing {}", out.display()))?;
            }
            println!("{}", torrent.magnet_uri);
            wait_for_ctrl_c().await;
        }
        Command::Download {
            magnet,
            fallback_url,
            name,
            timeout_ms,
        } => {
            let timeout = timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(ctx.config.p2p_timeout);
            // the swarm only gets a chance once the engine has started
            if let Err(e) = ctx.distribution.ready().await {
                warn!("⚠️ {}", e);
            }
            let source = ctx
                .distribution
                .download_or_fallback(&magnet, &fallback_url, &name, timeout)
                .await?;
            let via = match &source {
                DownloadSource::Swarm(_) => "swarm",
                DownloadSource::Direct(_) => "direct",
            };
            println!("{} ({})", source.path().display(), via);
        }
    }

    ctx.distribution.shutdown().await;
    Ok(())
}

async fn wait_for_ctrl_c() {
    info!("🌱 Seeding, press Ctrl-C to stop");
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
}
