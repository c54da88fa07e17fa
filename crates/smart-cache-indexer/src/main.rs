mod cli;

use crate::cli::Args;

use alloy_provider::{
    Provider,
    ProviderBuilder,
    RootProvider,
};
use anyhow::{
    Context,
    Result,
};
use clap::Parser;
use smart_cache_indexer::{
    HttpGasOracle,
    IncrementalUpdater,
    IndexerEvent,
    LocalCache,
    RpcLogSource,
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{
    info,
    warn,
};
use tracing_subscriber::{
    EnvFilter,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log filter")?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.indexer_config();

    let db_path = args.db_path()?;
    let db: sled::Db = sled::Config::new()
        .path(&db_path)
        .open()
        .with_context(|| format!("failed to open cache database at {}", db_path.display()))?;
    info!(database_path = %db_path.display(), "Opened cache database");
    let cache = Arc::new(LocalCache::new(db, config.cache_expiry));

    let provider = connect_provider(args.rpc_url.as_str()).await?;
    let rpc = Arc::new(RpcLogSource::new(provider, args.cache_manager));
    let oracle = Arc::new(
        HttpGasOracle::with_timeout(&args.oracle_url, config.request_timeout)
            .context("failed to build gas oracle client")?,
    );

    let updater = Arc::new(IncrementalUpdater::new(
        rpc.clone(),
        rpc,
        oracle,
        cache,
        config,
    ));
    let mut events = updater.subscribe();
    let activation = updater.activate();
    info!(cache_manager = %args.cache_manager, "Indexer activated");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(err) = result {
                    warn!(error = %err, "Error waiting for shutdown signal");
                }
                break;
            }
            event = events.recv() => match event {
                Ok(IndexerEvent::AddressesDiscovered(addresses)) => {
                    info!(count = addresses.len(), "New cached programs discovered");
                }
                Ok(IndexerEvent::AggregateUpdated(aggregate)) => {
                    info!(
                        total_gas_without_cache = aggregate.total_gas_without_cache,
                        total_gas_with_cache = aggregate.total_gas_with_cache,
                        total_gas_saved = aggregate.total_gas_saved,
                        "Gas aggregate updated"
                    );
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Event listener lagged behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Shutting down, waiting for the running cycle to finish");
    activation.deactivate().await;

    if let Some(snapshot) = updater.snapshot() {
        info!(
            programs = snapshot.addresses.len(),
            last_scanned_block = snapshot.last_scanned_block,
            unscanned_blocks = snapshot.unscanned_blocks,
            total_gas_saved = snapshot.aggregate.total_gas_saved,
            "Indexer stopped"
        );
    }

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() -> Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .context("failed to install SIGINT handler")?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("Received Ctrl+C");
    }

    Ok(())
}

async fn connect_provider(rpc_url: &str) -> Result<Arc<RootProvider>> {
    let provider = ProviderBuilder::new()
        .connect(rpc_url)
        .await
        .context("failed to connect to RPC provider")?;
    Ok(Arc::new(provider.root().clone()))
}
