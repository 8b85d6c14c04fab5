use std::{future::Future, pin::Pin, sync::Arc};

use anyhow::Context;
use tokio::sync::{Mutex, watch};

use crate::{
    apply::{ApplyReply, Dispatcher, ShouldApply},
    command::RaftRequest,
    raft::{
        http_rpc::CLIENT_WRITE_PATH,
        types::{NodeId, NodeMeta, TypeConfig},
    },
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the HTTP layer needs from consensus: a way to propose and a view of cluster state.
pub trait RaftFacade: Send + Sync + 'static {
    fn metrics(&self) -> watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>;

    /// Proposes `req` and resolves with the reply of its apply once committed.
    fn client_write(&self, req: RaftRequest) -> BoxFuture<'_, anyhow::Result<ApplyReply>>;
}

/// Proposes through the local openraft instance; followers forward to the leader's client API.
#[derive(Clone)]
pub struct RealRaft {
    raft: openraft::Raft<TypeConfig>,
    metrics: watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>,
    client: reqwest::Client,
}

impl RealRaft {
    pub fn new(raft: openraft::Raft<TypeConfig>, client: reqwest::Client) -> Self {
        let metrics = raft.metrics();
        Self {
            raft,
            metrics,
            client,
        }
    }

    pub fn raft(&self) -> openraft::Raft<TypeConfig> {
        self.raft.clone()
    }

    pub async fn initialize_single_node_if_needed(
        &self,
        node_id: NodeId,
        node_meta: NodeMeta,
    ) -> anyhow::Result<()> {
        let initialized = self
            .raft
            .is_initialized()
            .await
            .context("raft is_initialized")?;
        if initialized {
            return Ok(());
        }
        let mut nodes = std::collections::BTreeMap::new();
        nodes.insert(node_id, node_meta);
        self.raft
            .initialize(nodes)
            .await
            .map_err(|e| anyhow::anyhow!("raft initialize: {e}"))?;
        Ok(())
    }
}

impl RaftFacade for RealRaft {
    fn metrics(&self) -> watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>> {
        self.metrics.clone()
    }

    fn client_write(&self, req: RaftRequest) -> BoxFuture<'_, anyhow::Result<ApplyReply>> {
        Box::pin(async move {
            let forwarded = req.clone();
            match self.raft.client_write(req).await {
                Ok(resp) => Ok(resp.data),
                Err(err) => {
                    let Some(openraft::error::ClientWriteError::ForwardToLeader(forward)) =
                        err.api_error()
                    else {
                        return Err(anyhow::anyhow!("raft client_write: {err}"));
                    };
                    let metrics = self.metrics.borrow().clone();
                    let leader = leader_api_base_url(forward, &metrics).ok_or_else(|| {
                        anyhow::anyhow!("raft client_write forward: leader not available")
                    })?;
                    forward_client_write(&self.client, &leader, &forwarded).await
                }
            }
        })
    }
}

fn leader_api_base_url(
    forward: &openraft::error::ForwardToLeader<NodeId, NodeMeta>,
    metrics: &openraft::RaftMetrics<NodeId, NodeMeta>,
) -> Option<String> {
    if let Some(node) = forward.leader_node.as_ref()
        && !node.api_base_url.is_empty()
    {
        return Some(node.api_base_url.clone());
    }
    let leader_id = forward.leader_id.or(metrics.current_leader)?;
    metrics
        .membership_config
        .nodes()
        .find(|(id, _node)| **id == leader_id)
        .map(|(_id, node)| node.api_base_url.clone())
        .filter(|url| !url.is_empty())
}

async fn forward_client_write(
    client: &reqwest::Client,
    leader_base_url: &str,
    req: &RaftRequest,
) -> anyhow::Result<ApplyReply> {
    let url = format!(
        "{}{CLIENT_WRITE_PATH}",
        leader_base_url.trim_end_matches('/')
    );
    client
        .post(url)
        .json(req)
        .send()
        .await
        .context("forward client_write request")?
        .error_for_status()
        .context("forward client_write response status")?
        .json::<ApplyReply>()
        .await
        .context("parse forward client_write response")
}

/// Applies proposals straight to a shared dispatcher, as a single-node log would.
#[derive(Clone)]
pub struct LocalRaft {
    dispatcher: Arc<Mutex<Dispatcher>>,
    metrics: watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>,
}

impl LocalRaft {
    pub fn new(
        dispatcher: Arc<Mutex<Dispatcher>>,
        metrics: watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>>,
    ) -> Self {
        Self {
            dispatcher,
            metrics,
        }
    }
}

impl RaftFacade for LocalRaft {
    fn metrics(&self) -> watch::Receiver<openraft::RaftMetrics<NodeId, NodeMeta>> {
        self.metrics.clone()
    }

    fn client_write(&self, req: RaftRequest) -> BoxFuture<'_, anyhow::Result<ApplyReply>> {
        Box::pin(async move {
            let mut dispatcher = self.dispatcher.lock().await;
            let index = dispatcher.backend().consistent_index + 1;
            let mut outcome = dispatcher.apply(&req, ShouldApply(true));
            dispatcher.set_consistent_index(index);
            drop(dispatcher);
            if let Some(done) = outcome.physical.take() {
                done.wait().await;
            }
            Ok(outcome.into_reply())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        apply::DispatcherConfig,
        command::{Command, PutRequest},
        metrics::ApplyMetrics,
        storage::Backend,
    };

    #[tokio::test]
    async fn local_raft_advances_consistent_index() {
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
            DispatcherConfig::default(),
            Backend::default(),
            Arc::new(ApplyMetrics::default()),
        )));
        let (_tx, rx) = watch::channel(openraft::RaftMetrics::new_initial(1));
        let raft = LocalRaft::new(dispatcher.clone(), rx);

        let reply = raft
            .client_write(RaftRequest::new(Command::Put(PutRequest {
                key: b"k".to_vec(),
                value: b"v".to_vec(),
                ..Default::default()
            })))
            .await
            .unwrap();
        assert!(reply.response.is_some());
        assert_eq!(dispatcher.lock().await.backend().consistent_index, 1);
    }

    #[test]
    fn leader_url_prefers_forward_hint() {
        let forward = openraft::error::ForwardToLeader {
            leader_id: Some(2),
            leader_node: Some(NodeMeta {
                name: "n2".to_string(),
                api_base_url: "http://10.0.0.2:2379".to_string(),
                raft_endpoint: "http://10.0.0.2:2380".to_string(),
            }),
        };
        let metrics = openraft::RaftMetrics::new_initial(1);
        assert_eq!(
            leader_api_base_url(&forward, &metrics).as_deref(),
            Some("http://10.0.0.2:2379")
        );

        let unknown = openraft::error::ForwardToLeader {
            leader_id: None,
            leader_node: None,
        };
        assert_eq!(leader_api_base_url(&unknown, &metrics), None);
    }
}
