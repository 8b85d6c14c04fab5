use std::io::Cursor;

use serde::{Deserialize, Serialize};

use crate::apply::ApplyReply;
use crate::command::RaftRequest;

pub type NodeId = u64;

/// Node metadata stored in the membership config.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMeta {
    pub name: String,

    /// Base URL of the client API; followers forward proposals here when this node leads.
    pub api_base_url: String,

    /// Base URL serving `/raft/*`.
    pub raft_endpoint: String,
}

/// Committed entries carry a [`RaftRequest`]; the state machine answers with the process-free
/// part of its [`ApplyOutcome`](crate::apply::ApplyOutcome).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TypeConfig;

impl openraft::RaftTypeConfig for TypeConfig {
    type D = RaftRequest;
    type R = ApplyReply;

    type NodeId = NodeId;
    type Node = NodeMeta;

    type Entry = openraft::impls::Entry<TypeConfig>;
    type Responder = openraft::impls::OneshotResponder<TypeConfig>;
    type AsyncRuntime = openraft::impls::TokioRuntime;

    // Requires tokio `io-util` feature for AsyncRead/Write/Seek impls on Cursor.
    type SnapshotData = Cursor<Vec<u8>>;
}
