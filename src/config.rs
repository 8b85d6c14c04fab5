use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::apply::DispatcherConfig;
use crate::storage::{BackendQuota, MAX_LEASE_TTL};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kvapply",
    about = "Replicated key-value store apply node",
    version,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the node: raft, client API and metrics (default).
    Run,

    /// Apply a JSON-lines file of committed requests to a fresh in-memory backend.
    Replay(ReplayArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ReplayArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "KVAPPLY_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:2379"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        global = true,
        env = "KVAPPLY_DATA_DIR",
        value_name = "DIR",
        default_value = "./data"
    )]
    pub data_dir: PathBuf,

    #[arg(
        long,
        global = true,
        env = "KVAPPLY_NODE_ID",
        value_name = "ID",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub node_id: u64,

    #[arg(
        long,
        global = true,
        env = "KVAPPLY_NODE_NAME",
        value_name = "NAME",
        default_value = "node-1"
    )]
    pub node_name: String,

    /// Advertised base URL for clients and peers; derived from --bind when empty.
    #[arg(
        long,
        global = true,
        env = "KVAPPLY_API_BASE_URL",
        value_name = "URL",
        default_value = ""
    )]
    pub api_base_url: String,

    /// 0 selects the 2 GiB default; a negative value disables the quota.
    #[arg(
        long,
        global = true,
        env = "KVAPPLY_QUOTA_BACKEND_BYTES",
        value_name = "BYTES",
        default_value_t = 0,
        allow_hyphen_values = true
    )]
    pub quota_backend_bytes: i64,

    #[arg(
        long = "warning-apply-duration-ms",
        global = true,
        env = "KVAPPLY_WARNING_APPLY_DURATION_MS",
        value_name = "MS",
        default_value_t = 100,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub warning_apply_duration_ms: u64,

    #[arg(
        long,
        global = true,
        env = "KVAPPLY_MAX_LEASE_TTL",
        value_name = "SECS",
        default_value_t = MAX_LEASE_TTL,
        value_parser = clap::value_parser!(i64).range(1..=MAX_LEASE_TTL)
    )]
    pub max_lease_ttl: i64,
}

impl Config {
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            quota: BackendQuota::from_config(self.quota_backend_bytes),
            max_lease_ttl: self.max_lease_ttl,
            warning_apply_duration: Duration::from_millis(self.warning_apply_duration_ms),
        }
    }

    pub fn advertised_base_url(&self) -> String {
        if self.api_base_url.is_empty() {
            format!("http://{}", self.bind)
        } else {
            self.api_base_url.trim_end_matches('/').to_string()
        }
    }
}
