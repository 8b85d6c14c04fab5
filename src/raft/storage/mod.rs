//! File-backed openraft storage: the log store and a state machine driving the
//! [`Dispatcher`](crate::apply::Dispatcher).

pub mod file;

pub use file::{FileLogStore, FileStateMachine, RaftPaths, load_backend};
