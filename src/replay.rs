//! Offline replay of committed requests, one JSON [`RaftRequest`] per line.

use std::{
    io::{BufRead, Write},
    sync::Arc,
};

use anyhow::Context;
use tracing::debug;

use crate::{
    apply::{Dispatcher, DispatcherConfig, ShouldApply},
    command::RaftRequest,
    metrics::ApplyMetrics,
    storage::Backend,
};

/// Applies every request read from `input` to a fresh backend and writes one reply per
/// request to `output`. Blank lines are skipped; the consistent index follows the line count.
pub fn replay(
    config: DispatcherConfig,
    input: impl BufRead,
    mut output: impl Write,
) -> anyhow::Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new(
        config,
        Backend::default(),
        Arc::new(ApplyMetrics::default()),
    );

    let mut index = 0u64;
    for (lineno, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", lineno + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let req: RaftRequest = serde_json::from_str(&line)
            .with_context(|| format!("parse request on line {}", lineno + 1))?;

        index += 1;
        let outcome = dispatcher.apply(&req, ShouldApply(true));
        dispatcher.set_consistent_index(index);
        debug!(index, op = req.command.op_name(), "replayed");

        let reply = serde_json::to_string(&outcome.into_reply()).context("encode reply")?;
        writeln!(output, "{reply}").context("write reply")?;
    }
    Ok(dispatcher)
}
