//! Deterministic state the apply pipeline operates on.
//!
//! Everything here is plain data: replicas that apply the same log end up with equal
//! `Backend` values, and a snapshot is simply the serialized `Backend`.

pub mod alarm;
pub mod auth;
pub mod cluster;
pub mod lease;
pub mod mvcc;
pub mod quota;

use serde::{Deserialize, Serialize};

pub use alarm::{AlarmMember, AlarmStore, AlarmType};
pub use auth::{AuthStore, Permission, PermissionType};
pub use cluster::ClusterStore;
pub use lease::{Lessor, MAX_LEASE_TTL};
pub use mvcc::{KeyValue, MvccStore};
pub use quota::BackendQuota;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    #[serde(default)]
    pub kv: MvccStore,
    #[serde(default)]
    pub lessor: Lessor,
    #[serde(default)]
    pub auth: AuthStore,
    #[serde(default)]
    pub alarms: AlarmStore,
    #[serde(default)]
    pub cluster: ClusterStore,
    /// Last log index whose effects are reflected here.
    #[serde(default)]
    pub consistent_index: u64,
}

impl Backend {
    pub fn size_bytes(&self) -> u64 {
        self.kv.size_bytes() + self.lessor.size_bytes() + self.auth.size_bytes()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
