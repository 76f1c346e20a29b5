pub mod args;
mod balances;
mod cache;

use std::time::Duration;

use alloy::{
    providers::{Provider, ProviderBuilder},
    rpc::client::RpcClient,
    transports::layers::{RetryBackoffLayer, ThrottleLayer},
};
use anyhow::Context;
use args::Cli;
use keysub::{EngineBuilder, config::EngineConfig, domain::Balance, source::SourceExt, store::FileBackend};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::args::Commands;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let backend = FileBackend::new(&cli.cache_dir);

    match &cli.command {
        Commands::Cache { namespace } => cache::render(&backend, namespace),
        Commands::Watch { account, token, interval_ms, timeout_ms, num_updates } => {
            let config = EngineConfig::load(cli.config.as_deref()).context("loading engine config")?;

            let client = if cli.rpc == args::DEFAULT_RPC_PROVIDER || cli.rpc_throttle.is_some() {
                // Apply throttling with default RPC
                RpcClient::builder()
                    .layer(ThrottleLayer::new(cli.rpc_throttle.unwrap_or(args::DEFAULT_RPC_THROTTLING)))
                    .layer(RetryBackoffLayer::new(10, 100, 200))
                    .connect(&cli.rpc)
                    .await
                    .context("connecting to RPC")?
            } else {
                RpcClient::builder()
                    .layer(RetryBackoffLayer::new(10, 100, 200))
                    .connect(&cli.rpc)
                    .await
                    .context("connecting to RPC")?
            };
            let provider = ProviderBuilder::new().connect_client(client).erased();

            let keys = balances::keys(account, token)?;
            info!(rpc = %cli.rpc, keys = keys.len(), cache_dir = %cli.cache_dir.display(), "Watching balances");
            let source = balances::source(provider, Duration::from_millis(*interval_ms))
                .with_timeout(Duration::from_millis(*timeout_ms));
            let engine = EngineBuilder::new(source)
                .namespace(args::BALANCES_NAMESPACE)
                .backend(backend)
                .config(config)?
                .open_first(|balance: &Balance| !balance.is_zero())
                .start();

            let cancellation_signal = CancellationToken::new();
            let cancellation_token = cancellation_signal.child_token();
            tokio::spawn(async move {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install CTRL+C signal handler");
                cancellation_signal.cancel();
            });

            balances::render(engine, keys, *num_updates, cancellation_token).await
        },
    }
}
