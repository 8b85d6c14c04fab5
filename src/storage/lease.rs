use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ApplyError, ApplyResult};

/// Largest TTL a lease may be granted with, in seconds.
pub const MAX_LEASE_TTL: i64 = 9_000_000_000;

/// Stored bytes charged per lease.
const LEASE_OVERHEAD: u64 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub id: i64,
    pub ttl: i64,
    /// Last checkpointed remaining TTL; 0 when never checkpointed.
    #[serde(default)]
    pub remaining_ttl: i64,
    #[serde(with = "crate::b64::set", default)]
    pub keys: BTreeSet<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lessor {
    leases: BTreeMap<i64, Lease>,
}

impl Lessor {
    pub fn lookup(&self, id: i64) -> Option<&Lease> {
        self.leases.get(&id)
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.leases.len() as u64 * LEASE_OVERHEAD
    }

    /// Registers a lease under the id chosen by the proposer.
    pub fn grant(&mut self, id: i64, ttl: i64, max_ttl: i64) -> ApplyResult<&Lease> {
        if id == 0 {
            return Err(ApplyError::LeaseNotFound { lease_id: id });
        }
        if ttl > max_ttl {
            return Err(ApplyError::LeaseTtlTooLarge { ttl, max_ttl });
        }
        if self.leases.contains_key(&id) {
            return Err(ApplyError::LeaseExists { lease_id: id });
        }
        Ok(self.leases.entry(id).or_insert(Lease {
            id,
            ttl,
            remaining_ttl: 0,
            keys: BTreeSet::new(),
        }))
    }

    /// Removes the lease and hands back its attached keys for deletion.
    pub fn revoke(&mut self, id: i64) -> ApplyResult<Lease> {
        self.leases
            .remove(&id)
            .ok_or(ApplyError::LeaseNotFound { lease_id: id })
    }

    /// Records remaining TTLs. Leases that no longer exist are skipped.
    pub fn checkpoint(&mut self, id: i64, remaining_ttl: i64) {
        if let Some(lease) = self.leases.get_mut(&id) {
            lease.remaining_ttl = remaining_ttl;
        }
    }

    pub fn attach(&mut self, id: i64, key: &[u8]) -> ApplyResult<()> {
        let lease = self
            .leases
            .get_mut(&id)
            .ok_or(ApplyError::LeaseNotFound { lease_id: id })?;
        lease.keys.insert(key.to_vec());
        Ok(())
    }

    pub fn detach(&mut self, id: i64, key: &[u8]) {
        if let Some(lease) = self.leases.get_mut(&id) {
            lease.keys.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_rejects_duplicates_and_oversized_ttl() {
        let mut lessor = Lessor::default();
        lessor.grant(7, 10, MAX_LEASE_TTL).unwrap();
        assert_eq!(
            lessor.grant(7, 10, MAX_LEASE_TTL),
            Err(ApplyError::LeaseExists { lease_id: 7 })
        );
        assert_eq!(
            lessor.grant(8, MAX_LEASE_TTL + 1, MAX_LEASE_TTL),
            Err(ApplyError::LeaseTtlTooLarge {
                ttl: MAX_LEASE_TTL + 1,
                max_ttl: MAX_LEASE_TTL
            })
        );
        assert_eq!(lessor.len(), 1);
    }

    #[test]
    fn revoke_returns_attached_keys() {
        let mut lessor = Lessor::default();
        lessor.grant(1, 5, MAX_LEASE_TTL).unwrap();
        lessor.attach(1, b"a").unwrap();
        lessor.attach(1, b"b").unwrap();
        lessor.detach(1, b"a");

        let lease = lessor.revoke(1).unwrap();
        assert_eq!(lease.keys.into_iter().collect::<Vec<_>>(), vec![b"b".to_vec()]);
        assert_eq!(
            lessor.revoke(1),
            Err(ApplyError::LeaseNotFound { lease_id: 1 })
        );
    }

    #[test]
    fn checkpoint_ignores_missing_leases() {
        let mut lessor = Lessor::default();
        lessor.grant(1, 30, MAX_LEASE_TTL).unwrap();
        lessor.checkpoint(1, 12);
        lessor.checkpoint(99, 12);
        assert_eq!(lessor.lookup(1).map(|l| l.remaining_ttl), Some(12));
        assert!(lessor.lookup(99).is_none());
    }

    #[test]
    fn lease_keys_survive_json() {
        let mut lessor = Lessor::default();
        lessor.grant(3, 30, MAX_LEASE_TTL).unwrap();
        lessor.attach(3, &[0xff, 0x00]).unwrap();
        let raw = serde_json::to_string(&lessor).unwrap();
        let back: Lessor = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, lessor);
    }
}
