//! Multi-version key space.
//!
//! Every key keeps its history as a list of `(revision, value-or-tombstone)` entries. A write
//! transaction stages all of its changes at one revision (`current + 1`) and publishes that
//! revision when it ends, if anything changed.

use serde::{Deserialize, Serialize};

use crate::error::{ApplyError, ApplyResult};

/// Stored bytes per history entry on top of key and value.
const ENTRY_OVERHEAD: u64 = 48;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    pub create_revision: i64,
    pub mod_revision: i64,
    pub version: i64,
    #[serde(with = "crate::b64")]
    pub value: Vec<u8>,
    pub lease: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct HistoryEntry {
    revision: i64,
    /// `None` marks a deletion.
    kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct KeyHistory {
    #[serde(with = "crate::b64")]
    key: Vec<u8>,
    entries: Vec<HistoryEntry>,
}

impl KeyHistory {
    fn at(&self, revision: i64) -> Option<&KeyValue> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.revision <= revision)
            .and_then(|entry| entry.kv.as_ref())
    }

    fn latest(&self) -> Option<&KeyValue> {
        self.entries.last().and_then(|entry| entry.kv.as_ref())
    }

    fn record(&mut self, revision: i64, kv: Option<KeyValue>) {
        // A second write to the same key in one transaction replaces the staged entry.
        if let Some(last) = self.entries.last_mut()
            && last.revision == revision
        {
            last.kv = kv;
            return;
        }
        self.entries.push(HistoryEntry { revision, kv });
    }

    /// Drops history no read at or above `revision` can observe. Returns true when the key is
    /// gone entirely.
    fn compact(&mut self, revision: i64) -> bool {
        let keep_from = self
            .entries
            .iter()
            .rposition(|entry| entry.revision <= revision);
        if let Some(idx) = keep_from {
            self.entries.drain(..idx);
            if self.entries.first().is_some_and(|entry| entry.kv.is_none()) {
                self.entries.remove(0);
            }
        }
        self.entries.is_empty()
    }

    fn size_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| {
                let value = entry.kv.as_ref().map_or(0, |kv| kv.value.len());
                (self.key.len() + value) as u64 + ENTRY_OVERHEAD
            })
            .sum()
    }
}

/// Result of reading a key range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    pub count: i64,
    pub revision: i64,
}

/// Options of a single range read.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeOptions {
    pub limit: i64,
    pub revision: i64,
    pub count_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccStore {
    current_revision: i64,
    compacted_revision: i64,
    history: Vec<KeyHistory>,
}

impl Default for MvccStore {
    fn default() -> Self {
        Self {
            current_revision: 1,
            compacted_revision: 0,
            history: Vec::new(),
        }
    }
}

impl MvccStore {
    pub fn current_revision(&self) -> i64 {
        self.current_revision
    }

    pub fn compacted_revision(&self) -> i64 {
        self.compacted_revision
    }

    /// Approximate bytes held by the key space, including superseded history.
    pub fn size_bytes(&self) -> u64 {
        self.history.iter().map(KeyHistory::size_bytes).sum()
    }

    pub fn range(
        &self,
        key: &[u8],
        range_end: &[u8],
        opts: RangeOptions,
    ) -> ApplyResult<RangeResult> {
        self.range_at(key, range_end, opts, self.current_revision)
    }

    /// Opens a write transaction. Every change made through it lands at one new revision.
    pub fn write(&mut self) -> WriteTxn<'_> {
        let revision = self.current_revision + 1;
        WriteTxn {
            store: self,
            revision,
            touched: Vec::new(),
            ended: false,
        }
    }

    /// Marks `revision` as compacted and drops superseded history below it.
    pub fn compact(&mut self, revision: i64) -> ApplyResult<()> {
        if revision <= self.compacted_revision {
            return Err(ApplyError::Compacted {
                requested: revision,
                compacted: self.compacted_revision,
            });
        }
        if revision > self.current_revision {
            return Err(ApplyError::FutureRevision {
                requested: revision,
                current: self.current_revision,
            });
        }
        self.compacted_revision = revision;
        self.history.retain_mut(|h| !h.compact(revision));
        Ok(())
    }

    fn range_at(
        &self,
        key: &[u8],
        range_end: &[u8],
        opts: RangeOptions,
        current: i64,
    ) -> ApplyResult<RangeResult> {
        let revision = if opts.revision <= 0 {
            current
        } else {
            opts.revision
        };
        if revision > current {
            return Err(ApplyError::FutureRevision {
                requested: revision,
                current,
            });
        }
        if revision < self.compacted_revision {
            return Err(ApplyError::Compacted {
                requested: revision,
                compacted: self.compacted_revision,
            });
        }

        let mut kvs = Vec::new();
        let mut count = 0;
        for history in self.scan(key, range_end) {
            let Some(kv) = history.at(revision) else {
                continue;
            };
            count += 1;
            if opts.count_only || (opts.limit > 0 && kvs.len() as i64 >= opts.limit) {
                continue;
            }
            kvs.push(kv.clone());
        }
        Ok(RangeResult {
            kvs,
            count,
            revision: current,
        })
    }

    fn scan<'a>(
        &'a self,
        key: &'a [u8],
        range_end: &'a [u8],
    ) -> impl Iterator<Item = &'a KeyHistory> + 'a {
        let start = self.history.partition_point(|h| h.key.as_slice() < key);
        self.history[start..]
            .iter()
            .take_while(move |h| in_range(&h.key, key, range_end))
    }

    fn history_mut(&mut self, key: &[u8]) -> &mut KeyHistory {
        let idx = match self.history.binary_search_by(|h| h.key.as_slice().cmp(key)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.history.insert(
                    idx,
                    KeyHistory {
                        key: key.to_vec(),
                        entries: Vec::new(),
                    },
                );
                idx
            }
        };
        &mut self.history[idx]
    }

    fn latest(&self, key: &[u8]) -> Option<&KeyValue> {
        self.history
            .binary_search_by(|h| h.key.as_slice().cmp(key))
            .ok()
            .and_then(|idx| self.history[idx].latest())
    }
}

/// Whether `candidate` falls in `[key, range_end)` with the empty and `"\0"` conventions.
pub fn in_range(candidate: &[u8], key: &[u8], range_end: &[u8]) -> bool {
    match range_end {
        [] => candidate == key,
        [0] => candidate >= key,
        end => candidate >= key && candidate < end,
    }
}

/// Staged writes at a single revision.
///
/// Dropping the transaction without calling [`WriteTxn::end`] discards what it staged.
pub struct WriteTxn<'a> {
    store: &'a mut MvccStore,
    revision: i64,
    touched: Vec<Vec<u8>>,
    ended: bool,
}

impl WriteTxn<'_> {
    fn changed(&self) -> bool {
        !self.touched.is_empty()
    }

    /// Reads see the changes staged so far.
    pub fn range(
        &self,
        key: &[u8],
        range_end: &[u8],
        opts: RangeOptions,
    ) -> ApplyResult<RangeResult> {
        let current = if self.changed() {
            self.revision
        } else {
            self.store.current_revision
        };
        self.store.range_at(key, range_end, opts, current)
    }

    pub fn get(&self, key: &[u8]) -> Option<&KeyValue> {
        self.store.latest(key)
    }

    /// Writes `value` under `key` and returns the previous value, if any.
    pub fn put(&mut self, key: &[u8], value: Vec<u8>, lease: i64) -> Option<KeyValue> {
        let revision = self.revision;
        let prev = self.store.latest(key).cloned();
        let (create_revision, version) = match &prev {
            Some(prev) => (prev.create_revision, prev.version + 1),
            None => (revision, 1),
        };
        self.store.history_mut(key).record(
            revision,
            Some(KeyValue {
                key: key.to_vec(),
                create_revision,
                mod_revision: revision,
                version,
                value,
                lease,
            }),
        );
        self.touch(key);
        prev
    }

    /// Tombstones every live key in the range and returns what was deleted.
    pub fn delete_range(&mut self, key: &[u8], range_end: &[u8]) -> Vec<KeyValue> {
        let deleted: Vec<KeyValue> = self
            .store
            .scan(key, range_end)
            .filter_map(|h| h.latest().cloned())
            .collect();
        for kv in &deleted {
            self.store.history_mut(&kv.key).record(self.revision, None);
            self.touch(&kv.key);
        }
        deleted
    }

    fn touch(&mut self, key: &[u8]) {
        if !self.touched.iter().any(|k| k.as_slice() == key) {
            self.touched.push(key.to_vec());
        }
    }

    /// Publishes the staged revision and returns the store's revision after the transaction.
    pub fn end(mut self) -> i64 {
        self.ended = true;
        if self.changed() {
            self.store.current_revision = self.revision;
        }
        self.store.current_revision
    }
}

impl Drop for WriteTxn<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        for key in std::mem::take(&mut self.touched) {
            let history = self.store.history_mut(&key);
            if history
                .entries
                .last()
                .is_some_and(|entry| entry.revision == self.revision)
            {
                history.entries.pop();
            }
        }
        self.store.history.retain(|h| !h.entries.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn put(store: &mut MvccStore, key: &str, value: &str) -> i64 {
        let mut txn = store.write();
        txn.put(key.as_bytes(), value.as_bytes().to_vec(), 0);
        txn.end()
    }

    fn read(store: &MvccStore, key: &str, revision: i64) -> ApplyResult<Vec<String>> {
        let opts = RangeOptions {
            revision,
            ..Default::default()
        };
        Ok(store
            .range(key.as_bytes(), &[0], opts)?
            .kvs
            .into_iter()
            .map(|kv| String::from_utf8_lossy(&kv.value).into_owned())
            .collect())
    }

    #[test]
    fn revisions_start_at_one_and_advance_per_write() {
        let mut store = MvccStore::default();
        assert_eq!(store.current_revision(), 1);
        assert_eq!(put(&mut store, "a", "1"), 2);
        assert_eq!(put(&mut store, "a", "2"), 3);

        let kv = store.range(b"a", &[], RangeOptions::default()).unwrap().kvs[0].clone();
        assert_eq!(kv.create_revision, 2);
        assert_eq!(kv.mod_revision, 3);
        assert_eq!(kv.version, 2);
    }

    #[test]
    fn writes_in_one_txn_share_a_revision() {
        let mut store = MvccStore::default();
        let mut txn = store.write();
        txn.put(b"a", b"1".to_vec(), 0);
        txn.put(b"b", b"2".to_vec(), 0);
        txn.put(b"a", b"3".to_vec(), 0);
        assert_eq!(txn.end(), 2);

        let kvs = store.range(b"a", &[0], RangeOptions::default()).unwrap().kvs;
        assert_eq!(kvs.len(), 2);
        assert!(kvs.iter().all(|kv| kv.mod_revision == 2));
        assert_eq!(kvs[0].value, b"3".to_vec());
        assert_eq!(kvs[0].version, 2);
        assert_eq!(kvs[0].create_revision, 2);
    }

    #[test]
    fn historical_reads_and_tombstones() {
        let mut store = MvccStore::default();
        put(&mut store, "a", "1");
        put(&mut store, "a", "2");
        let mut txn = store.write();
        assert_eq!(txn.delete_range(b"a", &[]).len(), 1);
        assert_eq!(txn.end(), 4);

        assert_eq!(read(&store, "a", 2).unwrap(), vec!["1"]);
        assert_eq!(read(&store, "a", 3).unwrap(), vec!["2"]);
        assert!(read(&store, "a", 0).unwrap().is_empty());
    }

    #[test]
    fn dropped_txn_discards_staged_writes() {
        let mut store = MvccStore::default();
        put(&mut store, "a", "1");
        {
            let mut txn = store.write();
            txn.put(b"a", b"2".to_vec(), 0);
            txn.put(b"b", b"2".to_vec(), 0);
            txn.delete_range(b"a", &[]);
        }
        assert_eq!(store.current_revision(), 2);
        assert_eq!(read(&store, "", 0).unwrap(), vec!["1"]);
        assert_eq!(put(&mut store, "c", "3"), 3);
    }

    #[test]
    fn empty_delete_does_not_advance_revision() {
        let mut store = MvccStore::default();
        let mut txn = store.write();
        assert!(txn.delete_range(b"missing", &[]).is_empty());
        assert_eq!(txn.end(), 1);
    }

    #[test]
    fn range_bounds_follow_revision_window() {
        let mut store = MvccStore::default();
        put(&mut store, "a", "1");
        put(&mut store, "a", "2");
        put(&mut store, "a", "3");
        store.compact(3).unwrap();

        assert_eq!(
            read(&store, "a", 2),
            Err(ApplyError::Compacted {
                requested: 2,
                compacted: 3
            })
        );
        assert_eq!(read(&store, "a", 3).unwrap(), vec!["2"]);
        assert_eq!(
            read(&store, "a", 9),
            Err(ApplyError::FutureRevision {
                requested: 9,
                current: 4
            })
        );
    }

    #[test]
    fn compaction_rejects_old_and_future_revisions() {
        let mut store = MvccStore::default();
        put(&mut store, "a", "1");
        put(&mut store, "a", "2");
        store.compact(2).unwrap();
        assert_eq!(
            store.compact(2),
            Err(ApplyError::Compacted {
                requested: 2,
                compacted: 2
            })
        );
        assert_eq!(
            store.compact(7),
            Err(ApplyError::FutureRevision {
                requested: 7,
                current: 3
            })
        );
    }

    #[test]
    fn compaction_reclaims_superseded_history() {
        let mut store = MvccStore::default();
        put(&mut store, "a", &"x".repeat(100));
        put(&mut store, "a", "small");
        let mut txn = store.write();
        txn.put(b"gone", b"v".to_vec(), 0);
        txn.end();
        let mut txn = store.write();
        txn.delete_range(b"gone", &[]);
        txn.end();

        let before = store.size_bytes();
        store.compact(store.current_revision()).unwrap();
        assert!(store.size_bytes() < before);
        assert_eq!(read(&store, "", 0).unwrap(), vec!["small"]);
    }

    #[test]
    fn limit_and_count() {
        let mut store = MvccStore::default();
        for key in ["a", "b", "c"] {
            put(&mut store, key, key);
        }
        let result = store
            .range(
                b"a",
                b"c",
                RangeOptions {
                    limit: 1,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.count, 2);
        assert_eq!(result.kvs.len(), 1);

        let result = store
            .range(
                b"a",
                &[0],
                RangeOptions {
                    count_only: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(result.count, 3);
        assert!(result.kvs.is_empty());
    }

    #[test]
    fn range_end_conventions() {
        assert!(in_range(b"a", b"a", b""));
        assert!(!in_range(b"ab", b"a", b""));
        assert!(in_range(b"zzz", b"a", &[0]));
        assert!(in_range(b"ab", b"a", b"b"));
        assert!(!in_range(b"b", b"a", b"b"));
    }
}
