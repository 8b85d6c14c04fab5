use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::{ApplyError, ApplyResult};
use crate::response::Response;

/// Timing breadcrumbs collected while a write runs.
#[derive(Debug)]
pub struct Trace {
    op: &'static str,
    start: Instant,
    steps: Vec<(&'static str, Duration)>,
}

impl Trace {
    pub fn new(op: &'static str) -> Self {
        Self {
            op,
            start: Instant::now(),
            steps: Vec::new(),
        }
    }

    pub fn step(&mut self, name: &'static str) {
        self.steps.push((name, self.start.elapsed()));
    }

    pub fn steps(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.steps.iter().map(|(name, _)| *name)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace[{}]", self.op)?;
        for (name, at) in &self.steps {
            write!(f, " {name}@{at:?}")?;
        }
        Ok(())
    }
}

/// Fires once a compaction's superseded history is physically reclaimed.
#[derive(Debug)]
pub struct PhysicalCompletion {
    rx: oneshot::Receiver<()>,
}

impl PhysicalCompletion {
    pub fn channel() -> (oneshot::Sender<()>, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }

    pub fn completed(&mut self) -> bool {
        matches!(self.rx.try_recv(), Ok(()))
    }

    /// Resolves when reclamation is done. A dropped sender counts as done.
    pub async fn wait(self) {
        let _ = self.rx.await;
    }
}

/// Everything one apply produced.
///
/// `result` is `None` only for cluster-control commands and for commands skipped because this
/// node may not apply the data plane yet.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub result: Option<ApplyResult<Response>>,
    pub trace: Option<Trace>,
    pub physical: Option<PhysicalCompletion>,
}

impl ApplyOutcome {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_result(result: ApplyResult<Response>) -> Self {
        Self {
            result: Some(result),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.result.is_none() && self.trace.is_none() && self.physical.is_none()
    }

    pub fn response(&self) -> Option<&Response> {
        self.result.as_ref().and_then(|r| r.as_ref().ok())
    }

    pub fn error(&self) -> Option<&ApplyError> {
        self.result.as_ref().and_then(|r| r.as_ref().err())
    }

    /// Counted as a successful apply: no error, or a benign one.
    pub fn is_success(&self) -> bool {
        self.error().is_none_or(ApplyError::is_benign)
    }

    /// Drops the process-local parts (trace, completion signal).
    pub fn into_reply(self) -> ApplyReply {
        match self.result {
            None => ApplyReply::default(),
            Some(Ok(response)) => ApplyReply {
                response: Some(response),
                error: None,
            },
            Some(Err(error)) => ApplyReply {
                response: None,
                error: Some(error),
            },
        }
    }
}

/// The serializable part of an [`ApplyOutcome`], returned through consensus to the proposer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApplyError>,
}

impl ApplyReply {
    pub fn is_empty(&self) -> bool {
        self.response.is_none() && self.error.is_none()
    }
}
