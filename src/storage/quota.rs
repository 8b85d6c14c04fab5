//! Backend size quota.
//!
//! Cost estimates are deliberately coarse; the point is to stop growth before the backend hits
//! its hard limit, not to account bytes exactly.

use crate::command::{PutRequest, RequestOp, TxnRequest};

use super::Backend;

pub const DEFAULT_QUOTA_BYTES: i64 = 2 * 1024 * 1024 * 1024;

/// Bytes charged per put on top of key and value.
const KV_OVERHEAD: u64 = 256;
/// Bytes charged per lease grant.
pub const LEASE_GRANT_COST: u64 = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendQuota {
    /// `None` means unlimited.
    limit: Option<u64>,
}

impl BackendQuota {
    /// `0` selects the default, a negative value disables the quota.
    pub fn from_config(bytes: i64) -> Self {
        let limit = match bytes {
            0 => Some(DEFAULT_QUOTA_BYTES as u64),
            b if b < 0 => None,
            b => Some(b as u64),
        };
        Self { limit }
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn available(&self, be: &Backend, cost: u64) -> bool {
        match self.limit {
            None => true,
            Some(limit) => cost == 0 || be.size_bytes() + cost < limit,
        }
    }
}

pub fn put_cost(req: &PutRequest) -> u64 {
    (req.key.len() + req.value.len()) as u64 + KV_OVERHEAD
}

/// The larger of the two branches; only one of them will run.
pub fn txn_cost(req: &TxnRequest) -> u64 {
    branch_cost(&req.success).max(branch_cost(&req.failure))
}

fn branch_cost(ops: &[RequestOp]) -> u64 {
    ops.iter()
        .map(|op| match op {
            RequestOp::Put(put) => put_cost(put),
            RequestOp::Txn(nested) => txn_cost(nested),
            RequestOp::Range(_) | RequestOp::DeleteRange(_) => 0,
        })
        .sum()
}
