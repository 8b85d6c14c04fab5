use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{AlarmMember, KeyValue, Permission};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeResponse {
    pub kvs: Vec<KeyValue>,
    pub more: bool,
    pub count: i64,
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResponse {
    pub revision: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_kv: Option<KeyValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeResponse {
    pub revision: i64,
    pub deleted: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prev_kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOp {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnResponse {
    pub revision: i64,
    pub succeeded: bool,
    pub responses: Vec<ResponseOp>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionResponse {
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrantResponse {
    pub id: i64,
    pub ttl: i64,
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRevokeResponse {
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseCheckpointResponse {
    pub revision: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmResponse {
    pub alarms: Vec<AlarmMember>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateResponse {
    pub token: String,
}

/// Reply of every auth mutation: the auth revision after the change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRevisionResponse {
    pub auth_revision: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthStatusResponse {
    pub enabled: bool,
    pub auth_revision: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserGetResponse {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserListResponse {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleGetResponse {
    pub perm: Vec<Permission>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleListResponse {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "response", rename_all = "snake_case")]
pub enum Response {
    Range(RangeResponse),
    Put(PutResponse),
    DeleteRange(DeleteRangeResponse),
    Txn(TxnResponse),
    Compaction(CompactionResponse),
    LeaseGrant(LeaseGrantResponse),
    LeaseRevoke(LeaseRevokeResponse),
    LeaseCheckpoint(LeaseCheckpointResponse),
    Alarm(AlarmResponse),
    Authenticate(AuthenticateResponse),
    AuthStatus(AuthStatusResponse),
    AuthUserGet(AuthUserGetResponse),
    AuthUserList(AuthUserListResponse),
    AuthRoleGet(AuthRoleGetResponse),
    AuthRoleList(AuthRoleListResponse),
    /// Enable, disable and every user/role mutation.
    AuthRevision(AuthRevisionResponse),
}

/// Compact rendering for apply diagnostics: sizes instead of values, tokens hidden.
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range(r) => write!(
                f,
                "range_response_count:{} size:{} revision:{}",
                r.count,
                r.kvs.iter().map(|kv| kv.value.len()).sum::<usize>(),
                r.revision
            ),
            Self::Put(r) => write!(f, "put:<revision:{}>", r.revision),
            Self::DeleteRange(r) => {
                write!(f, "delete_range:<revision:{} deleted:{}>", r.revision, r.deleted)
            }
            Self::Txn(r) => write!(
                f,
                "txn:<revision:{} succeeded:{} responses:{}>",
                r.revision,
                r.succeeded,
                r.responses.len()
            ),
            Self::Compaction(r) => write!(f, "compaction:<revision:{}>", r.revision),
            Self::LeaseGrant(r) => write!(f, "lease_grant:<id:{:x} ttl:{}>", r.id, r.ttl),
            Self::LeaseRevoke(r) => write!(f, "lease_revoke:<revision:{}>", r.revision),
            Self::LeaseCheckpoint(r) => write!(f, "lease_checkpoint:<revision:{}>", r.revision),
            Self::Alarm(r) => write!(f, "alarm:<alarms:{}>", r.alarms.len()),
            Self::Authenticate(_) => write!(f, "authenticate:<token:<redacted>>"),
            Self::AuthStatus(r) => write!(
                f,
                "auth_status:<enabled:{} auth_revision:{}>",
                r.enabled, r.auth_revision
            ),
            Self::AuthUserGet(r) => write!(f, "auth_user_get:<roles:{}>", r.roles.len()),
            Self::AuthUserList(r) => write!(f, "auth_user_list:<users:{}>", r.users.len()),
            Self::AuthRoleGet(r) => write!(f, "auth_role_get:<perm:{}>", r.perm.len()),
            Self::AuthRoleList(r) => write!(f, "auth_role_list:<roles:{}>", r.roles.len()),
            Self::AuthRevision(r) => write!(f, "auth:<auth_revision:{}>", r.auth_revision),
        }
    }
}
