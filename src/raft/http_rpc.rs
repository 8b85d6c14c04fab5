use axum::{Json, Router, extract::State, http::StatusCode, routing::post};
use openraft::{
    error::{InstallSnapshotError, RaftError},
    raft::{
        AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
        InstallSnapshotResponse, VoteRequest, VoteResponse,
    },
};
use tracing::{debug, warn};

use crate::{
    apply::ApplyReply,
    command::RaftRequest,
    raft::types::{NodeId, TypeConfig},
};

pub const APPEND_ENTRIES_PATH: &str = "/raft/append-entries";
pub const VOTE_PATH: &str = "/raft/vote";
pub const INSTALL_SNAPSHOT_PATH: &str = "/raft/install-snapshot";
pub const CLIENT_WRITE_PATH: &str = "/raft/client-write";

/// Body of every peer RPC reply: openraft's own result, serialized as is.
type RpcReply<T, E = openraft::error::Infallible> = Json<Result<T, RaftError<NodeId, E>>>;

#[derive(Clone)]
pub struct RaftRpcState {
    pub raft: openraft::Raft<TypeConfig>,
}

/// Peer-facing routes: the three openraft RPCs plus proposals forwarded by followers.
pub fn build_raft_rpc_router(state: RaftRpcState) -> Router {
    Router::new()
        .route(APPEND_ENTRIES_PATH, post(append_entries))
        .route(VOTE_PATH, post(vote))
        .route(INSTALL_SNAPSHOT_PATH, post(install_snapshot))
        .route(CLIENT_WRITE_PATH, post(client_write))
        .with_state(state)
}

async fn append_entries(
    State(state): State<RaftRpcState>,
    Json(req): Json<AppendEntriesRequest<TypeConfig>>,
) -> RpcReply<AppendEntriesResponse<NodeId>> {
    Json(state.raft.append_entries(req).await)
}

async fn vote(
    State(state): State<RaftRpcState>,
    Json(req): Json<VoteRequest<NodeId>>,
) -> RpcReply<VoteResponse<NodeId>> {
    debug!(vote = %req.vote, last_log_id = ?req.last_log_id, "vote requested");
    Json(state.raft.vote(req).await)
}

async fn install_snapshot(
    State(state): State<RaftRpcState>,
    Json(req): Json<InstallSnapshotRequest<TypeConfig>>,
) -> RpcReply<InstallSnapshotResponse<NodeId>, InstallSnapshotError> {
    debug!(
        snapshot_id = %req.meta.snapshot_id,
        offset = req.offset,
        done = req.done,
        "snapshot chunk received"
    );
    Json(state.raft.install_snapshot(req).await)
}

async fn client_write(
    State(state): State<RaftRpcState>,
    Json(req): Json<RaftRequest>,
) -> Result<Json<ApplyReply>, StatusCode> {
    let request_id = req.header.id;
    match state.raft.client_write(req).await {
        Ok(resp) => Ok(Json(resp.data)),
        Err(err) => {
            warn!(request_id, error = %err, "forwarded client_write failed");
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}
