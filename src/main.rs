//! Forum mirror CLI entry point.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use forum_mirror::config::{Config, RunMode};
use forum_mirror::identity::IdentityHasher;
use forum_mirror::media::{MediaPipeline, S3ObjectStore};
use forum_mirror::platform::Platform;
use forum_mirror::platform::discord::{DiscordPlatform, build_gateway_client};
use forum_mirror::store::{MySqlStore, Store, mysql::connect_and_migrate};
use forum_mirror::sync::{LiveHandler, Reconciler, SyncOptions, SyncOrchestrator, Traversal};

#[derive(Parser)]
#[command(name = "forum-mirror", version)]
#[command(about = "Mirrors a chat platform's forum conversations into a relational store")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run one sync and exit
    Sync {
        /// Restrict the run to one guild
        #[arg(long)]
        guild: Option<u64>,
        /// Restrict the run to one forum channel
        #[arg(long)]
        channel: Option<u64>,
        /// Restrict the run to one thread
        #[arg(long)]
        thread: Option<u64>,
        /// Cap threads processed
        #[arg(long)]
        limit: Option<usize>,
        /// Skip threads already in the store
        #[arg(long)]
        skip_existing: bool,
        /// Platform token (overrides DISCORD_TOKEN)
        #[arg(long)]
        token: Option<String>,
        /// Ignore the cursor and run a full backfill
        #[arg(long)]
        force_full: bool,
    },
    /// Keep the gateway event loop running (default when no subcommand is
    /// given)
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    init_tracing(cli.debug);

    let command = cli.command.unwrap_or(Command::Watch);

    match command {
        Command::Sync {
            guild,
            channel,
            thread,
            limit,
            skip_existing,
            token,
            force_full,
        } => {
            let config = Config::load_with_token(token).context("configuration invalid")?;
            let options = SyncOptions {
                force_full: force_full || config.force_full_sync,
                guild,
                channel,
                thread,
                limit,
                skip_existing,
            };
            cmd_sync(config, options).await
        }
        Command::Watch => {
            let config = Config::load().context("configuration invalid")?;
            cmd_watch(config).await
        }
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Shared dependency bundle for both run modes.
struct Deps {
    store: Arc<dyn Store>,
    platform: Arc<dyn Platform>,
    reconciler: Arc<Reconciler>,
    cancel: CancellationToken,
}

async fn build_deps(config: &Config, actor: &str) -> anyhow::Result<Deps> {
    let pool = connect_and_migrate(&config.mysql)
        .await
        .context("failed to prepare database")?;
    let store: Arc<dyn Store> = Arc::new(MySqlStore::new(pool, actor));

    let hasher = IdentityHasher::new(config.pepper);

    if let Some(path) = &config.staff_csv_path {
        forum_mirror::identity::staff::import_staff_csv(path, &hasher, store.as_ref())
            .await
            .context("staff CSV import failed")?;
    }

    let media = match &config.s3 {
        Some(s3_config) => {
            let object_store = Arc::new(S3ObjectStore::new(s3_config).await);
            Some(Arc::new(MediaPipeline::new(object_store, config.image)))
        }
        None => None,
    };

    let platform: Arc<dyn Platform> = Arc::new(DiscordPlatform::from_token(&config.discord_token));

    let reconciler = Arc::new(Reconciler::new(store.clone(), hasher, media));

    let cancel = CancellationToken::new();
    spawn_signal_watcher(cancel.clone());

    Ok(Deps {
        store,
        platform,
        reconciler,
        cancel,
    })
}

async fn cmd_sync(config: Config, options: SyncOptions) -> anyhow::Result<()> {
    let deps = build_deps(&config, "sync").await?;

    let traversal = Traversal::new(deps.platform.clone(), deps.cancel.clone());
    let orchestrator = SyncOrchestrator::new(
        deps.platform.clone(),
        deps.store.clone(),
        deps.reconciler.clone(),
        traversal,
    );

    let stats = orchestrator
        .run(&options)
        .await
        .context("sync run failed")?;
    tracing::info!(?stats, "sync finished");
    Ok(())
}

async fn cmd_watch(config: Config) -> anyhow::Result<()> {
    let deps = build_deps(&config, "live").await?;

    // Optionally-concurrent historical sync alongside the event loop.
    let sync_handle = if config.enable_historical_sync {
        let traversal = Traversal::new(deps.platform.clone(), deps.cancel.clone());
        let orchestrator = SyncOrchestrator::new(
            deps.platform.clone(),
            deps.store.clone(),
            deps.reconciler.clone(),
            traversal,
        );
        let options = SyncOptions {
            force_full: config.force_full_sync,
            ..SyncOptions::default()
        };

        Some(tokio::spawn(async move {
            match orchestrator.run(&options).await {
                Ok(stats) => {
                    tracing::info!(?stats, "startup sync finished");
                    true
                }
                Err(error) => {
                    tracing::error!(%error, "startup sync failed");
                    false
                }
            }
        }))
    } else {
        None
    };

    if config.run_mode == RunMode::Once || config.exit_after_sync {
        let succeeded = match sync_handle {
            Some(handle) => handle.await.context("startup sync task panicked")?,
            None => true,
        };
        anyhow::ensure!(succeeded, "startup sync failed");
        return Ok(());
    }

    let live = Arc::new(LiveHandler::new(
        deps.platform.clone(),
        deps.store.clone(),
        deps.reconciler.clone(),
        Traversal::new(deps.platform.clone(), deps.cancel.clone()),
    ));

    let mut client = build_gateway_client(&config.discord_token, live)
        .await
        .context("failed to build gateway client")?;
    let shard_manager = client.shard_manager.clone();

    let cancel = deps.cancel.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        tracing::info!("shutdown signal received, stopping gateway");
        shard_manager.shutdown_all().await;
    });

    client
        .start()
        .await
        .context("gateway connection failed")?;
    Ok(())
}

fn spawn_signal_watcher(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(signal) => signal,
                    Err(error) => {
                        tracing::error!(%error, "failed to install SIGTERM handler");
                        let _ = ctrl_c.await;
                        cancel.cancel();
                        return;
                    }
                };

            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }

        cancel.cancel();
    });
}
