//! Consensus plumbing around the apply pipeline: openraft types, file storage, HTTP transport.

pub mod app;
pub mod http_rpc;
pub mod network_http;
pub mod runtime;
pub mod storage;
pub mod types;

pub use types::{NodeId, NodeMeta, TypeConfig};
