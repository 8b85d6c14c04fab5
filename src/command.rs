use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de::Error as _};

use crate::storage::{AlarmType, Permission};

/// Identity attached to a proposal by the node that accepted it from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeader {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_revision: u64,
}

/// One committed log entry: the proposer's header plus exactly one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftRequest {
    #[serde(default)]
    pub header: RequestHeader,
    #[serde(deserialize_with = "decode_command")]
    pub command: Command,
}

/// Like the derived decoder, but an unknown `op` becomes [`Command::Unrecognized`] even when it
/// carries a `request` payload.
fn decode_command<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Command, D::Error> {
    let raw = serde_json::Value::deserialize(deserializer)?;
    match Command::deserialize(&raw) {
        Ok(command) => Ok(command),
        Err(err) => {
            let op_only = serde_json::json!({ "op": raw.get("op") });
            match Command::deserialize(&op_only) {
                Ok(Command::Unrecognized) => Ok(Command::Unrecognized),
                _ => Err(D::Error::custom(err)),
            }
        }
    }
}

impl RaftRequest {
    pub fn new(command: Command) -> Self {
        Self {
            header: RequestHeader::default(),
            command,
        }
    }

    pub fn with_header(header: RequestHeader, command: Command) -> Self {
        Self { header, command }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "request", rename_all = "snake_case")]
pub enum Command {
    ClusterVersionSet(ClusterVersionSetRequest),
    ClusterMemberAttrSet(ClusterMemberAttrSetRequest),
    DowngradeInfoSet(DowngradeInfoSetRequest),

    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    Txn(TxnRequest),
    Compaction(CompactionRequest),
    LeaseGrant(LeaseGrantRequest),
    LeaseRevoke(LeaseRevokeRequest),
    LeaseCheckpoint(LeaseCheckpointRequest),
    Alarm(AlarmRequest),

    Authenticate(AuthenticateRequest),
    AuthEnable,
    AuthDisable,
    AuthStatus,
    AuthUserAdd(AuthUserAddRequest),
    AuthUserDelete(AuthUserDeleteRequest),
    AuthUserChangePassword(AuthUserChangePasswordRequest),
    AuthUserGrantRole(AuthUserGrantRoleRequest),
    AuthUserGet(AuthUserGetRequest),
    AuthUserRevokeRole(AuthUserRevokeRoleRequest),
    AuthUserList,
    AuthRoleAdd(AuthRoleAddRequest),
    AuthRoleGet(AuthRoleGetRequest),
    AuthRoleDelete(AuthRoleDeleteRequest),
    AuthRoleGrantPermission(AuthRoleGrantPermissionRequest),
    AuthRoleRevokePermission(AuthRoleRevokePermissionRequest),
    AuthRoleList,

    /// A log entry whose `op` tag this build does not know. Only the decoder produces it.
    #[serde(other)]
    Unrecognized,
}

impl Command {
    /// Operation label used for metrics and diagnostics.
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::ClusterVersionSet(_) => "ClusterVersionSet",
            Self::ClusterMemberAttrSet(_) => "ClusterMemberAttrSet",
            Self::DowngradeInfoSet(_) => "DowngradeInfoSet",
            Self::Range(_) => "Range",
            Self::Put(_) => "Put",
            Self::DeleteRange(_) => "DeleteRange",
            Self::Txn(_) => "Txn",
            Self::Compaction(_) => "Compaction",
            Self::LeaseGrant(_) => "LeaseGrant",
            Self::LeaseRevoke(_) => "LeaseRevoke",
            Self::LeaseCheckpoint(_) => "LeaseCheckpoint",
            Self::Alarm(_) => "Alarm",
            Self::Authenticate(_) => "Authenticate",
            Self::AuthEnable => "AuthEnable",
            Self::AuthDisable => "AuthDisable",
            Self::AuthStatus => "AuthStatus",
            Self::AuthUserAdd(_) => "AuthUserAdd",
            Self::AuthUserDelete(_) => "AuthUserDelete",
            Self::AuthUserChangePassword(_) => "AuthUserChangePassword",
            Self::AuthUserGrantRole(_) => "AuthUserGrantRole",
            Self::AuthUserGet(_) => "AuthUserGet",
            Self::AuthUserRevokeRole(_) => "AuthUserRevokeRole",
            Self::AuthUserList => "AuthUserList",
            Self::AuthRoleAdd(_) => "AuthRoleAdd",
            Self::AuthRoleGet(_) => "AuthRoleGet",
            Self::AuthRoleDelete(_) => "AuthRoleDelete",
            Self::AuthRoleGrantPermission(_) => "AuthRoleGrantPermission",
            Self::AuthRoleRevokePermission(_) => "AuthRoleRevokePermission",
            Self::AuthRoleList => "AuthRoleList",
            Self::Unrecognized => "unknown",
        }
    }

    /// Cluster-control commands keep replica metadata in sync and are never gated or policed.
    pub fn is_cluster_control(&self) -> bool {
        matches!(
            self,
            Self::ClusterVersionSet(_) | Self::ClusterMemberAttrSet(_) | Self::DowngradeInfoSet(_)
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterVersionSetRequest {
    pub ver: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMemberAttrSetRequest {
    pub member_id: u64,
    pub name: String,
    #[serde(default)]
    pub client_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowngradeInfoSetRequest {
    pub enabled: bool,
    #[serde(default)]
    pub ver: String,
}

/// `range_end` empty selects the single `key`; `range_end == [0]` selects every key `>= key`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub range_end: Vec<u8>,
    #[serde(default)]
    pub limit: i64,
    /// `<= 0` reads at the current revision.
    #[serde(default)]
    pub revision: i64,
    #[serde(default)]
    pub keys_only: bool,
    #[serde(default)]
    pub count_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutRequest {
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub value: Vec<u8>,
    #[serde(default)]
    pub lease: i64,
    #[serde(default)]
    pub prev_kv: bool,
    #[serde(default)]
    pub ignore_value: bool,
    #[serde(default)]
    pub ignore_lease: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteRangeRequest {
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub range_end: Vec<u8>,
    #[serde(default)]
    pub prev_kv: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestOp {
    Range(RangeRequest),
    Put(PutRequest),
    DeleteRange(DeleteRangeRequest),
    Txn(TxnRequest),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareResult {
    Equal,
    Greater,
    Less,
    NotEqual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareTarget {
    Version(i64),
    CreateRevision(i64),
    ModRevision(i64),
    Value(#[serde(with = "crate::b64")] Vec<u8>),
    Lease(i64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Compare {
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub range_end: Vec<u8>,
    pub result: CompareResult,
    pub target: CompareTarget,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnRequest {
    #[serde(default)]
    pub compare: Vec<Compare>,
    #[serde(default)]
    pub success: Vec<RequestOp>,
    #[serde(default)]
    pub failure: Vec<RequestOp>,
}

impl TxnRequest {
    /// A transaction without any put or delete in either branch, at any depth.
    pub fn is_read_only(&self) -> bool {
        self.success
            .iter()
            .chain(self.failure.iter())
            .all(|op| match op {
                RequestOp::Range(_) => true,
                RequestOp::Txn(nested) => nested.is_read_only(),
                RequestOp::Put(_) | RequestOp::DeleteRange(_) => false,
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRequest {
    pub revision: i64,
    /// The proposer waits for physical reclamation before acknowledging.
    #[serde(default)]
    pub physical: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrantRequest {
    pub ttl: i64,
    /// Assigned by the proposer when a client leaves it at 0.
    #[serde(default)]
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRevokeRequest {
    pub id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseCheckpoint {
    pub id: i64,
    pub remaining_ttl: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseCheckpointRequest {
    #[serde(default)]
    pub checkpoints: Vec<LeaseCheckpoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmAction {
    #[default]
    Get,
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRequest {
    pub action: AlarmAction,
    #[serde(default)]
    pub member_id: u64,
    #[serde(default)]
    pub alarm: AlarmType,
}

/// The password is verified by the proposer; only the name and the issued token are committed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub simple_token: String,
}

/// `password` is accepted from clients and replaced by `hashed_password` before proposing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserAddRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub hashed_password: String,
    #[serde(default)]
    pub no_password: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserDeleteRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserChangePasswordRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub hashed_password: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserGrantRoleRequest {
    pub user: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserGetRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUserRevokeRoleRequest {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleAddRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleGetRequest {
    pub role: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleDeleteRequest {
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleGrantPermissionRequest {
    pub name: String,
    pub perm: Permission,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRoleRevokePermissionRequest {
    pub role: String,
    #[serde(with = "crate::b64")]
    pub key: Vec<u8>,
    #[serde(with = "crate::b64", default)]
    pub range_end: Vec<u8>,
}

/// Human-readable rendering for diagnostics. Values are reduced to their size and passwords
/// never appear.
impl fmt::Display for RaftRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "header:<id:{}", self.header.id)?;
        if !self.header.username.is_empty() {
            write!(
                f,
                " username:{} auth_revision:{}",
                self.header.username, self.header.auth_revision
            )?;
        }
        write!(f, "> {}", CommandDisplay(&self.command))
    }
}

struct CommandDisplay<'a>(&'a Command);

impl fmt::Display for CommandDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.0.op_name();
        match self.0 {
            Command::Put(r) => write!(
                f,
                "{op}:<key:{:?} value_size:{} lease:{}>",
                String::from_utf8_lossy(&r.key),
                r.value.len(),
                r.lease
            ),
            Command::Range(r) => write!(
                f,
                "{op}:<key:{:?} range_end:{:?} limit:{} revision:{}>",
                String::from_utf8_lossy(&r.key),
                String::from_utf8_lossy(&r.range_end),
                r.limit,
                r.revision
            ),
            Command::DeleteRange(r) => write!(
                f,
                "{op}:<key:{:?} range_end:{:?}>",
                String::from_utf8_lossy(&r.key),
                String::from_utf8_lossy(&r.range_end)
            ),
            Command::Txn(r) => write!(
                f,
                "{op}:<compare:{} success:{} failure:{} read_only:{}>",
                r.compare.len(),
                r.success.len(),
                r.failure.len(),
                r.is_read_only()
            ),
            Command::Authenticate(r) => write!(f, "{op}:<name:{} password:<redacted>>", r.name),
            Command::AuthUserAdd(r) => write!(
                f,
                "{op}:<name:{} password:<redacted> no_password:{}>",
                r.name, r.no_password
            ),
            Command::AuthUserChangePassword(r) => {
                write!(f, "{op}:<name:{} password:<redacted>>", r.name)
            }
            Command::AuthEnable
            | Command::AuthDisable
            | Command::AuthStatus
            | Command::AuthUserList
            | Command::AuthRoleList
            | Command::Unrecognized => write!(f, "{op}:<>"),
            other => {
                let body = serde_json::to_value(other)
                    .ok()
                    .and_then(|v| v.get("request").cloned())
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                write!(f, "{op}:<{body}>")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_tagged_command() {
        let req: RaftRequest = serde_json::from_value(json!({
            "header": { "id": 7 },
            "command": { "op": "put", "request": { "key": "Zm9v", "value": "YmFy" } }
        }))
        .unwrap();
        assert_eq!(req.header.id, 7);
        assert_eq!(
            req.command,
            Command::Put(PutRequest {
                key: b"foo".to_vec(),
                value: b"bar".to_vec(),
                ..Default::default()
            })
        );
    }

    #[test]
    fn unknown_op_decodes_as_unrecognized() {
        let req: RaftRequest = serde_json::from_value(json!({
            "command": { "op": "watch_progress_v9" }
        }))
        .unwrap();
        assert_eq!(req.command, Command::Unrecognized);
        assert_eq!(req.command.op_name(), "unknown");

        let req: RaftRequest = serde_json::from_value(json!({
            "command": { "op": "lease_renew_v4", "request": { "id": 5 } }
        }))
        .unwrap();
        assert_eq!(req.command, Command::Unrecognized);
    }

    #[test]
    fn known_op_with_bad_payload_stays_an_error() {
        let err = serde_json::from_value::<RaftRequest>(json!({
            "command": { "op": "put", "request": { "key": 5 } }
        }))
        .unwrap_err();
        assert!(!err.to_string().contains("Unrecognized"), "{err}");
    }

    #[test]
    fn display_redacts_passwords_and_values() {
        let req = RaftRequest::new(Command::AuthUserAdd(AuthUserAddRequest {
            name: "alice".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        }));
        let rendered = req.to_string();
        assert!(rendered.contains("AuthUserAdd:<name:alice"));
        assert!(!rendered.contains("hunter2"));

        let req = RaftRequest::new(Command::Put(PutRequest {
            key: b"k".to_vec(),
            value: b"secret-value".to_vec(),
            ..Default::default()
        }));
        let rendered = req.to_string();
        assert!(rendered.contains("value_size:12"));
        assert!(!rendered.contains("secret-value"));
    }

    #[test]
    fn txn_read_only_looks_into_nested_txns() {
        let nested_write = TxnRequest {
            success: vec![RequestOp::Put(PutRequest {
                key: b"a".to_vec(),
                ..Default::default()
            })],
            ..Default::default()
        };
        let txn = TxnRequest {
            success: vec![RequestOp::Range(RangeRequest::default())],
            failure: vec![RequestOp::Txn(nested_write)],
            ..Default::default()
        };
        assert!(!txn.is_read_only());

        let read_only = TxnRequest {
            success: vec![RequestOp::Range(RangeRequest::default())],
            ..Default::default()
        };
        assert!(read_only.is_read_only());
    }

    #[test]
    fn only_three_commands_are_cluster_control() {
        assert!(Command::ClusterVersionSet(Default::default()).is_cluster_control());
        assert!(Command::DowngradeInfoSet(Default::default()).is_cluster_control());
        assert!(Command::ClusterMemberAttrSet(Default::default()).is_cluster_control());
        assert!(!Command::AuthEnable.is_cluster_control());
        assert!(!Command::Alarm(Default::default()).is_cluster_control());
    }
}
