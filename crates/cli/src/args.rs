use std::path::PathBuf;

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use keysub::domain::TokenId;

pub(crate) const DEFAULT_RPC_PROVIDER: &str = "https://testnet-rpc.monad.xyz";
pub(crate) const DEFAULT_RPC_THROTTLING: u32 = 15;
pub(crate) const BALANCES_NAMESPACE: &str = "balances";

#[derive(Parser, Debug)]
#[command(name = "keysub-cli", version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// RPC endpoint to connect to
    #[arg(long, global = true, default_value_t = DEFAULT_RPC_PROVIDER.to_string() )]
    pub rpc: String,

    /// RPC throttling (req/sec) [default: 15 for default RPC provider and
    /// none for custom]
    #[arg(long, global = true)]
    pub rpc_throttle: Option<u32>,

    /// Engine config file (TOML) [default: $KEYSUB_CONFIG if set]
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Directory holding cache blobs
    #[arg(long, global = true, default_value = ".keysub")]
    pub cache_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch live balances of accounts, starting from cached values
    Watch {
        /// Account addresses to watch
        #[arg(long, required = true)]
        account: Vec<Address>,

        /// Tokens to watch balances of: `native` or `erc20:<address>`
        #[arg(long, default_value = "native")]
        token: Vec<TokenId>,

        /// Balance refetch interval
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,

        /// Outer timeout for establishing a watch and its first value
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,

        /// Number of updates to show [default: unlimited, until terminated by
        /// (Ctrl+C)]
        #[arg(long)]
        num_updates: Option<u64>,
    },
    /// Print cached values of a namespace
    Cache {
        /// Cache namespace
        #[arg(long, default_value = BALANCES_NAMESPACE)]
        namespace: String,
    },
}
