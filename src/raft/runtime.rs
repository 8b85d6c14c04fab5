use std::{path::Path, sync::Arc};

use anyhow::Context;
use tokio::sync::Mutex;

use crate::{
    apply::Dispatcher,
    raft::{
        app::RealRaft,
        network_http::HttpNetworkFactory,
        storage::{FileLogStore, FileStateMachine},
        types::{NodeId, TypeConfig},
    },
};

pub async fn start_raft(
    data_dir: &Path,
    cluster_name: String,
    node_id: NodeId,
    dispatcher: Arc<Mutex<Dispatcher>>,
    client: reqwest::Client,
) -> anyhow::Result<RealRaft> {
    let config = {
        #[cfg(test)]
        {
            openraft::Config {
                cluster_name,
                ..Default::default()
            }
        }

        #[cfg(not(test))]
        {
            openraft::Config {
                cluster_name,
                heartbeat_interval: 500,
                election_timeout_min: 1_500,
                election_timeout_max: 3_000,
                install_snapshot_timeout: 30_000,
                snapshot_policy: openraft::SnapshotPolicy::LogsSinceLast(10_000),
                ..Default::default()
            }
        }
    }
    .validate()
    .map_err(|e| anyhow::anyhow!("raft config validate: {e}"))?;

    let log_store = FileLogStore::open(data_dir)
        .await
        .map_err(|e| anyhow::anyhow!("open log store: {e}"))?;
    let state_machine = FileStateMachine::open(data_dir, dispatcher)
        .await
        .map_err(|e| anyhow::anyhow!("open state machine: {e}"))?;

    let raft = openraft::Raft::<TypeConfig>::new(
        node_id,
        Arc::new(config),
        HttpNetworkFactory::new(client.clone()),
        log_store,
        state_machine,
    )
    .await
    .context("start raft")?;

    // Initialization is left to the caller: only a bootstrapping node initializes membership.
    Ok(RealRaft::new(raft, client))
}
