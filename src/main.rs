use anyhow::{Context, Result};
use std::{
    io::{BufReader, BufWriter, Write},
    sync::Arc,
};

use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = kvapply::config::Cli::parse();
    let cmd = cli.command.clone().unwrap_or(kvapply::config::Command::Run);

    match cmd {
        kvapply::config::Command::Run => run_node(cli.config).await,
        kvapply::config::Command::Replay(args) => replay_file(&cli.config, &args.file),
    }
}

fn replay_file(config: &kvapply::config::Config, path: &std::path::Path) -> Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let dispatcher = kvapply::replay::replay(
        config.dispatcher_config(),
        BufReader::new(file),
        &mut out,
    )?;
    out.flush().context("flush replies")?;
    info!(
        applied = dispatcher.backend().consistent_index,
        revision = dispatcher.backend().kv.current_revision(),
        "replay finished"
    );
    Ok(())
}

async fn run_node(config: kvapply::config::Config) -> Result<()> {
    let backend = kvapply::raft::storage::load_backend(&config.data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("load backend: {e}"))?;
    let metrics = Arc::new(kvapply::metrics::ApplyMetrics::default());
    let dispatcher = Arc::new(Mutex::new(kvapply::apply::Dispatcher::new(
        config.dispatcher_config(),
        backend,
        metrics.clone(),
    )));

    let client = reqwest::Client::builder()
        .build()
        .context("build http client")?;
    let raft = kvapply::raft::runtime::start_raft(
        &config.data_dir,
        "kvapply".to_string(),
        config.node_id,
        dispatcher.clone(),
        client,
    )
    .await?;

    let advertised = config.advertised_base_url();
    raft.initialize_single_node_if_needed(
        config.node_id,
        kvapply::raft::NodeMeta {
            name: config.node_name.clone(),
            api_base_url: advertised.clone(),
            raft_endpoint: advertised.clone(),
        },
    )
    .await?;

    let raft_facade: Arc<dyn kvapply::raft::app::RaftFacade> = Arc::new(raft.clone());
    let state = kvapply::http::AppState::new(config.node_id, raft_facade, dispatcher, metrics);
    let app = kvapply::http::build_router(state, Some(raft.raft()))
        .layer(TraceLayer::new_for_http());

    info!(
        bind = %config.bind,
        data_dir = %config.data_dir.display(),
        node_id = config.node_id,
        advertised = %advertised,
        "starting kvapply"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries replay output.
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
