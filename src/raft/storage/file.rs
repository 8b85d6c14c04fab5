use std::{
    collections::BTreeMap,
    fmt::Debug,
    ops::RangeBounds,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    apply::{ApplyReply, Dispatcher, PhysicalCompletion, ShouldApply},
    command::Command,
    raft::types::{NodeId, NodeMeta, TypeConfig},
    storage::Backend,
};

use openraft::entry::RaftPayload as _;
use openraft::{
    EntryPayload, ErrorSubject, ErrorVerb, LogId, LogState, RaftLogReader, Snapshot, SnapshotMeta,
    StorageError, StoredMembership, Vote,
    storage::{RaftLogStorage, RaftStateMachine},
};

type Entry = openraft::impls::Entry<TypeConfig>;

/// On-disk layout under `<data_dir>/raft`.
#[derive(Debug, Clone)]
pub struct RaftPaths {
    pub log_json: PathBuf,
    pub vote_json: PathBuf,
    pub committed_json: PathBuf,
    pub applied_json: PathBuf,
    pub backend_json: PathBuf,
    pub snapshot_meta_json: PathBuf,
    pub snapshot_data_json: PathBuf,
}

impl RaftPaths {
    pub fn new(data_dir: &Path) -> Self {
        let raft_dir = data_dir.join("raft");
        let log_dir = raft_dir.join("log");
        let snapshot_dir = raft_dir.join("snapshots");
        Self {
            log_json: log_dir.join("entries.json"),
            vote_json: log_dir.join("vote.json"),
            committed_json: log_dir.join("committed.json"),
            applied_json: raft_dir.join("applied.json"),
            backend_json: raft_dir.join("backend.json"),
            snapshot_meta_json: snapshot_dir.join("meta.json"),
            snapshot_data_json: snapshot_dir.join("backend.json"),
        }
    }

    fn ensure_dirs(&self) -> std::io::Result<()> {
        for path in [&self.log_json, &self.snapshot_meta_json] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

/// Reads the backend persisted by the state machine, or an empty one on first start.
pub async fn load_backend(data_dir: &Path) -> Result<Backend, StorageError<NodeId>> {
    let paths = RaftPaths::new(data_dir);
    let backend = read_json::<Backend>(&paths.backend_json)
        .await
        .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Read, e))?;
    Ok(backend.unwrap_or_default())
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct PersistedLog {
    #[serde(default)]
    last_purged_log_id: Option<LogId<NodeId>>,
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
struct LogInner {
    last_purged_log_id: Option<LogId<NodeId>>,
    entries: BTreeMap<u64, Entry>,
    vote: Option<Vote<NodeId>>,
    committed: Option<LogId<NodeId>>,
}

impl LogInner {
    fn last_log_id(&self) -> Option<LogId<NodeId>> {
        self.entries
            .values()
            .next_back()
            .map(|ent| ent.log_id)
            .or(self.last_purged_log_id)
    }

    fn to_persisted(&self) -> PersistedLog {
        PersistedLog {
            last_purged_log_id: self.last_purged_log_id,
            entries: self.entries.values().cloned().collect(),
        }
    }
}

/// Raft log, vote and commit index, each rewritten as a whole JSON file on change.
#[derive(Debug, Clone)]
pub struct FileLogStore {
    paths: RaftPaths,
    inner: Arc<Mutex<LogInner>>,
}

impl FileLogStore {
    pub async fn open(data_dir: &Path) -> Result<Self, StorageError<NodeId>> {
        let paths = RaftPaths::new(data_dir);
        paths
            .ensure_dirs()
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;

        let log = read_json::<PersistedLog>(&paths.log_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Read, e))?
            .unwrap_or_default();
        let vote = read_json::<Vote<NodeId>>(&paths.vote_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Read, e))?;
        let committed = read_json::<LogId<NodeId>>(&paths.committed_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Read, e))?;

        debug!(
            entries = log.entries.len(),
            last_purged = ?log.last_purged_log_id,
            "raft log loaded"
        );
        Ok(Self {
            paths,
            inner: Arc::new(Mutex::new(LogInner {
                last_purged_log_id: log.last_purged_log_id,
                entries: log
                    .entries
                    .into_iter()
                    .map(|ent| (ent.log_id.index, ent))
                    .collect(),
                vote,
                committed,
            })),
        })
    }

    async fn persist_log(&self) -> Result<(), StorageError<NodeId>> {
        let log = self.inner.lock().await.to_persisted();
        write_json(&self.paths.log_json, &log)
            .await
            .map_err(|e| io_err(ErrorSubject::Logs, ErrorVerb::Write, e))
    }
}

impl RaftLogReader<TypeConfig> for FileLogStore {
    async fn try_get_log_entries<RB: RangeBounds<u64> + Clone + Debug + openraft::OptionalSend>(
        &mut self,
        range: RB,
    ) -> Result<Vec<Entry>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.range(range).map(|(_, ent)| ent.clone()).collect())
    }
}

impl RaftLogStorage<TypeConfig> for FileLogStore {
    type LogReader = FileLogStore;

    async fn get_log_state(&mut self) -> Result<LogState<TypeConfig>, StorageError<NodeId>> {
        let inner = self.inner.lock().await;
        Ok(LogState {
            last_purged_log_id: inner.last_purged_log_id,
            last_log_id: inner.last_log_id(),
        })
    }

    async fn get_log_reader(&mut self) -> Self::LogReader {
        self.clone()
    }

    async fn save_vote(&mut self, vote: &Vote<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.vote = Some(*vote);
        write_json(&self.paths.vote_json, vote)
            .await
            .map_err(|e| io_err(ErrorSubject::Vote, ErrorVerb::Write, e))
    }

    async fn read_vote(&mut self) -> Result<Option<Vote<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.vote)
    }

    async fn save_committed(
        &mut self,
        committed: Option<LogId<NodeId>>,
    ) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.committed = committed;
        if let Some(committed) = &committed {
            write_json(&self.paths.committed_json, committed)
                .await
                .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;
        }
        Ok(())
    }

    async fn read_committed(&mut self) -> Result<Option<LogId<NodeId>>, StorageError<NodeId>> {
        Ok(self.inner.lock().await.committed)
    }

    async fn append<I>(
        &mut self,
        entries: I,
        callback: openraft::storage::LogFlushed<TypeConfig>,
    ) -> Result<(), StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + openraft::OptionalSend,
        I::IntoIter: openraft::OptionalSend,
    {
        {
            let mut inner = self.inner.lock().await;
            for ent in entries {
                inner.entries.insert(ent.log_id.index, ent);
            }
        }

        let res = self.persist_log().await;
        callback.log_io_completed(
            res.as_ref()
                .map(|_| ())
                .map_err(|e| std::io::Error::other(e.to_string())),
        );
        res
    }

    async fn truncate(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        self.inner.lock().await.entries.split_off(&log_id.index);
        self.persist_log().await
    }

    async fn purge(&mut self, log_id: LogId<NodeId>) -> Result<(), StorageError<NodeId>> {
        {
            let mut inner = self.inner.lock().await;
            let kept = inner.entries.split_off(&(log_id.index + 1));
            inner.entries = kept;
            inner.last_purged_log_id = Some(log_id);
        }
        self.persist_log().await
    }
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
struct AppliedState {
    last_applied: Option<LogId<NodeId>>,
    last_membership: StoredMembership<NodeId, NodeMeta>,
}

/// Feeds committed entries through the [`Dispatcher`] and persists its backend after each batch.
///
/// An entry reaches the data plane only when its index is above the backend's consistent
/// index; entries re-delivered after a crash between the backend and applied-state writes are
/// skipped.
#[derive(Clone)]
pub struct FileStateMachine {
    dispatcher: Arc<Mutex<Dispatcher>>,
    paths: RaftPaths,
    applied: Arc<Mutex<AppliedState>>,
}

impl FileStateMachine {
    pub async fn open(
        data_dir: &Path,
        dispatcher: Arc<Mutex<Dispatcher>>,
    ) -> Result<Self, StorageError<NodeId>> {
        let paths = RaftPaths::new(data_dir);
        paths
            .ensure_dirs()
            .map_err(|e| io_err(ErrorSubject::Store, ErrorVerb::Write, e))?;

        let applied = read_json::<AppliedState>(&paths.applied_json)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Read, e))?
            .unwrap_or_default();

        Ok(Self {
            dispatcher,
            paths,
            applied: Arc::new(Mutex::new(applied)),
        })
    }

    async fn persist(&self, backend: &[u8]) -> Result<(), StorageError<NodeId>> {
        write_bytes(&self.paths.backend_json, backend)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))?;
        let applied = self.applied.lock().await.clone();
        write_json(&self.paths.applied_json, &applied)
            .await
            .map_err(|e| io_err(ErrorSubject::StateMachine, ErrorVerb::Write, e))
    }
}

pub struct FileSnapshotBuilder {
    dispatcher: Arc<Mutex<Dispatcher>>,
    applied: Arc<Mutex<AppliedState>>,
    paths: RaftPaths,
}

impl openraft::RaftSnapshotBuilder<TypeConfig> for FileSnapshotBuilder {
    async fn build_snapshot(&mut self) -> Result<Snapshot<TypeConfig>, StorageError<NodeId>> {
        let AppliedState {
            last_applied,
            last_membership,
        } = self.applied.lock().await.clone();

        let bytes = self
            .dispatcher
            .lock()
            .await
            .backend()
            .to_json()
            .map_err(|e| {
                io_err(
                    ErrorSubject::Snapshot(None),
                    ErrorVerb::Write,
                    std::io::Error::other(e),
                )
            })?;

        let meta = SnapshotMeta {
            last_log_id: last_applied,
            last_membership,
            snapshot_id: format!(
                "snapshot-{}",
                last_applied.as_ref().map(|l| l.index).unwrap_or(0)
            ),
        };

        write_json(&self.paths.snapshot_meta_json, &meta)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        write_bytes(&self.paths.snapshot_data_json, &bytes)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        debug!(snapshot_id = %meta.snapshot_id, size = bytes.len(), "snapshot built");

        Ok(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(bytes)),
        })
    }
}

impl RaftStateMachine<TypeConfig> for FileStateMachine {
    type SnapshotBuilder = FileSnapshotBuilder;

    async fn applied_state(
        &mut self,
    ) -> Result<(Option<LogId<NodeId>>, StoredMembership<NodeId, NodeMeta>), StorageError<NodeId>>
    {
        let applied = self.applied.lock().await;
        Ok((applied.last_applied, applied.last_membership.clone()))
    }

    async fn apply<I>(&mut self, entries: I) -> Result<Vec<ApplyReply>, StorageError<NodeId>>
    where
        I: IntoIterator<Item = Entry> + openraft::OptionalSend,
        I::IntoIter: openraft::OptionalSend,
    {
        let mut replies = Vec::new();
        let mut physical: Vec<PhysicalCompletion> = Vec::new();

        let backend = {
            let mut dispatcher = self.dispatcher.lock().await;
            let mut applied = self.applied.lock().await;
            for entry in entries {
                let log_id = entry.log_id;
                if let Some(membership) = entry.get_membership() {
                    applied.last_membership =
                        StoredMembership::new(Some(log_id), membership.clone());
                }

                let fresh = log_id.index > dispatcher.backend().consistent_index;
                let reply = match entry.payload {
                    EntryPayload::Normal(req) => {
                        let mut outcome = dispatcher.apply(&req, ShouldApply(fresh));
                        if let Command::Compaction(compaction) = &req.command
                            && compaction.physical
                            && let Some(done) = outcome.physical.take()
                        {
                            physical.push(done);
                        }
                        outcome.into_reply()
                    }
                    EntryPayload::Membership(_) | EntryPayload::Blank => ApplyReply::default(),
                };
                if fresh {
                    dispatcher.set_consistent_index(log_id.index);
                }
                applied.last_applied = Some(log_id);
                replies.push(reply);
            }
            dispatcher.backend().to_json().map_err(|e| {
                io_err(
                    ErrorSubject::StateMachine,
                    ErrorVerb::Write,
                    std::io::Error::other(e),
                )
            })?
        };

        for done in physical {
            done.wait().await;
        }
        self.persist(&backend).await?;
        Ok(replies)
    }

    async fn get_snapshot_builder(&mut self) -> Self::SnapshotBuilder {
        FileSnapshotBuilder {
            dispatcher: self.dispatcher.clone(),
            applied: self.applied.clone(),
            paths: self.paths.clone(),
        }
    }

    async fn begin_receiving_snapshot(
        &mut self,
    ) -> Result<Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>, StorageError<NodeId>>
    {
        Ok(Box::new(std::io::Cursor::new(Vec::new())))
    }

    async fn install_snapshot(
        &mut self,
        meta: &SnapshotMeta<NodeId, NodeMeta>,
        snapshot: Box<<TypeConfig as openraft::RaftTypeConfig>::SnapshotData>,
    ) -> Result<(), StorageError<NodeId>> {
        let buf = (*snapshot).into_inner();
        let backend = Backend::from_json(&buf).map_err(|e| {
            io_err(
                ErrorSubject::Snapshot(Some(meta.signature())),
                ErrorVerb::Read,
                std::io::Error::other(e),
            )
        })?;

        self.dispatcher.lock().await.install(backend);
        {
            let mut applied = self.applied.lock().await;
            applied.last_applied = meta.last_log_id;
            applied.last_membership = meta.last_membership.clone();
        }

        self.persist(&buf).await?;
        write_json(&self.paths.snapshot_meta_json, meta)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        write_bytes(&self.paths.snapshot_data_json, &buf)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Write, e))?;
        debug!(snapshot_id = %meta.snapshot_id, "snapshot installed");
        Ok(())
    }

    async fn get_current_snapshot(
        &mut self,
    ) -> Result<Option<Snapshot<TypeConfig>>, StorageError<NodeId>> {
        let meta = read_json::<SnapshotMeta<NodeId, NodeMeta>>(&self.paths.snapshot_meta_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let bytes = read_bytes(&self.paths.snapshot_data_json)
            .await
            .map_err(|e| io_err(ErrorSubject::Snapshot(None), ErrorVerb::Read, e))?;
        Ok(Some(Snapshot {
            meta,
            snapshot: Box::new(std::io::Cursor::new(bytes)),
        }))
    }
}

fn io_err(
    subject: ErrorSubject<NodeId>,
    verb: ErrorVerb,
    err: std::io::Error,
) -> StorageError<NodeId> {
    StorageError::from_io_error(subject, verb, err)
}

async fn blocking<T, F>(f: F) -> Result<T, std::io::Error>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, std::io::Error> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}

async fn read_json<T: serde::de::DeserializeOwned + Send + 'static>(
    path: &Path,
) -> Result<Option<T>, std::io::Error> {
    let path = path.to_path_buf();
    blocking(move || {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let v = serde_json::from_slice(&bytes).map_err(std::io::Error::other)?;
        Ok(Some(v))
    })
    .await
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), std::io::Error> {
    let bytes = serde_json::to_vec_pretty(value).map_err(std::io::Error::other)?;
    write_bytes(path, &bytes).await
}

async fn read_bytes(path: &Path) -> Result<Vec<u8>, std::io::Error> {
    let path = path.to_path_buf();
    blocking(move || std::fs::read(&path)).await
}

/// Writes a sibling temp file and renames it over `path`.
async fn write_bytes(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let path = path.to_path_buf();
    let bytes = bytes.to_vec();
    blocking(move || {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &bytes)?;
        std::fs::rename(tmp, path)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use openraft::RaftSnapshotBuilder as _;
    use pretty_assertions::assert_eq;
    use tokio::sync::Mutex;

    use super::*;
    use crate::{
        apply::DispatcherConfig,
        command::{CompactionRequest, PutRequest, RaftRequest},
        metrics::ApplyMetrics,
        response::Response,
    };

    fn dispatcher(backend: Backend) -> Arc<Mutex<Dispatcher>> {
        Arc::new(Mutex::new(Dispatcher::new(
            DispatcherConfig::default(),
            backend,
            Arc::new(ApplyMetrics::default()),
        )))
    }

    fn entry(command: Command, index: u64) -> Entry {
        let log_id = LogId::new(openraft::CommittedLeaderId::new(1, 1), index);
        openraft::impls::Entry {
            log_id,
            payload: EntryPayload::Normal(RaftRequest::new(command)),
        }
    }

    fn put(key: &str, index: u64) -> Entry {
        entry(
            Command::Put(PutRequest {
                key: key.as_bytes().to_vec(),
                value: b"v".to_vec(),
                ..Default::default()
            }),
            index,
        )
    }

    #[tokio::test]
    async fn applied_entries_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sm = FileStateMachine::open(tmp.path(), dispatcher(Backend::default()))
            .await
            .unwrap();
        let replies = sm.apply(vec![put("a", 1), put("b", 2)]).await.unwrap();
        assert!(matches!(
            replies[1].response,
            Some(Response::Put(ref resp)) if resp.revision == 3
        ));

        let backend = load_backend(tmp.path()).await.unwrap();
        assert_eq!(backend.consistent_index, 2);
        assert_eq!(backend.kv.current_revision(), 3);

        let mut reopened = FileStateMachine::open(tmp.path(), dispatcher(backend))
            .await
            .unwrap();
        let (last_applied, _) = reopened.applied_state().await.unwrap();
        assert_eq!(last_applied.map(|l| l.index), Some(2));
    }

    #[tokio::test]
    async fn redelivered_entries_are_not_applied_twice() {
        let tmp = tempfile::tempdir().unwrap();
        let shared = dispatcher(Backend::default());
        let mut sm = FileStateMachine::open(tmp.path(), shared.clone())
            .await
            .unwrap();
        sm.apply(vec![put("a", 1)]).await.unwrap();

        let replies = sm.apply(vec![put("a", 1), put("b", 2)]).await.unwrap();
        assert!(replies[0].is_empty());
        assert!(replies[1].response.is_some());
        assert_eq!(shared.lock().await.backend().kv.current_revision(), 3);
    }

    #[tokio::test]
    async fn physical_compaction_is_awaited() {
        let tmp = tempfile::tempdir().unwrap();
        let mut sm = FileStateMachine::open(tmp.path(), dispatcher(Backend::default()))
            .await
            .unwrap();
        let compact = entry(
            Command::Compaction(CompactionRequest {
                revision: 2,
                physical: true,
            }),
            2,
        );
        let replies = sm.apply(vec![put("a", 1), compact]).await.unwrap();
        assert!(matches!(replies[1].response, Some(Response::Compaction(_))));
    }

    #[tokio::test]
    async fn snapshot_installs_into_fresh_node() {
        let tmp = tempfile::tempdir().unwrap();
        let source = dispatcher(Backend::default());
        let mut sm = FileStateMachine::open(tmp.path(), source.clone())
            .await
            .unwrap();
        sm.apply(vec![put("a", 1), put("b", 2)]).await.unwrap();
        let snapshot = sm
            .get_snapshot_builder()
            .await
            .build_snapshot()
            .await
            .unwrap();
        assert_eq!(snapshot.meta.snapshot_id, "snapshot-2");

        let other_dir = tempfile::tempdir().unwrap();
        let target = dispatcher(Backend::default());
        let mut other = FileStateMachine::open(other_dir.path(), target.clone())
            .await
            .unwrap();
        other
            .install_snapshot(&snapshot.meta, snapshot.snapshot)
            .await
            .unwrap();

        let installed = target.lock().await.backend().clone();
        assert_eq!(&installed, source.lock().await.backend());
        let current = other.get_current_snapshot().await.unwrap().unwrap();
        assert_eq!(current.meta, snapshot.meta);
    }

    #[tokio::test]
    async fn vote_is_persisted() {
        let tmp = tempfile::tempdir().unwrap();
        let mut log = FileLogStore::open(tmp.path()).await.unwrap();
        let vote = Vote::new(3, 1);
        log.save_vote(&vote).await.unwrap();

        let mut reopened = FileLogStore::open(tmp.path()).await.unwrap();
        assert_eq!(reopened.read_vote().await.unwrap(), Some(vote));
        let state = reopened.get_log_state().await.unwrap();
        assert_eq!(state.last_log_id, None);
    }
}
