pub mod apply;
pub mod b64;
pub mod command;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod raft;
pub mod replay;
pub mod response;
pub mod storage;
