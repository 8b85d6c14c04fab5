use serde::{Deserialize, Serialize};

/// Every error an applied command can produce.
///
/// These are values carried in an apply outcome, not failures of the node: a rejected command is
/// still a committed command, and every replica must reject it the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ApplyError {
    // storage engine
    Compacted {
        requested: i64,
        compacted: i64,
    },
    FutureRevision {
        requested: i64,
        current: i64,
    },
    KeyNotFound,

    // leases
    LeaseNotFound {
        lease_id: i64,
    },
    LeaseExists {
        lease_id: i64,
    },
    LeaseTtlTooLarge {
        ttl: i64,
        max_ttl: i64,
    },

    // policy rejections
    NoSpace,
    Corrupt,
    PermissionDenied,
    UserEmpty,
    AuthOldRevision {
        requested: u64,
        current: u64,
    },

    // auth store
    AuthNotEnabled,
    AuthFailed,
    InvalidAuthManagement,
    RootUserNotExist,
    RootRoleNotExist,
    UserAlreadyExist {
        name: String,
    },
    UserNotFound {
        name: String,
    },
    RoleEmpty,
    RoleAlreadyExist {
        name: String,
    },
    RoleNotFound {
        name: String,
    },
    RoleNotGranted {
        name: String,
    },
    PermissionNotGranted,
    PasswordRequired,
}

impl ApplyError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compacted { .. } => "compacted",
            Self::FutureRevision { .. } => "future_revision",
            Self::KeyNotFound => "key_not_found",
            Self::LeaseNotFound { .. } => "lease_not_found",
            Self::LeaseExists { .. } => "lease_exists",
            Self::LeaseTtlTooLarge { .. } => "lease_ttl_too_large",
            Self::NoSpace => "no_space",
            Self::Corrupt => "corrupt",
            Self::PermissionDenied => "permission_denied",
            Self::UserEmpty => "user_empty",
            Self::AuthOldRevision { .. } => "auth_old_revision",
            Self::AuthNotEnabled => "auth_not_enabled",
            Self::AuthFailed => "auth_failed",
            Self::InvalidAuthManagement => "invalid_auth_management",
            Self::RootUserNotExist => "root_user_not_exist",
            Self::RootRoleNotExist => "root_role_not_exist",
            Self::UserAlreadyExist { .. } => "user_already_exist",
            Self::UserNotFound { .. } => "user_not_found",
            Self::RoleEmpty => "role_empty",
            Self::RoleAlreadyExist { .. } => "role_already_exist",
            Self::RoleNotFound { .. } => "role_not_found",
            Self::RoleNotGranted { .. } => "role_not_granted",
            Self::PermissionNotGranted => "permission_not_granted",
            Self::PasswordRequired => "password_required",
        }
    }

    /// `Compacted` is a benign race between a compaction and a read committed around it; it is
    /// still returned to the caller but does not count as a failed apply.
    pub fn is_benign(&self) -> bool {
        matches!(self, Self::Compacted { .. })
    }

    /// Errors raised by a policy layer rather than by the storage engine.
    pub fn is_policy_rejection(&self) -> bool {
        matches!(
            self,
            Self::NoSpace
                | Self::Corrupt
                | Self::PermissionDenied
                | Self::UserEmpty
                | Self::AuthOldRevision { .. }
        )
    }
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compacted {
                requested,
                compacted,
            } => write!(
                f,
                "required revision has been compacted: requested={requested} compacted={compacted}"
            ),
            Self::FutureRevision { requested, current } => write!(
                f,
                "required revision is a future revision: requested={requested} current={current}"
            ),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::LeaseNotFound { lease_id } => write!(f, "lease not found: {lease_id:x}"),
            Self::LeaseExists { lease_id } => write!(f, "lease already exists: {lease_id:x}"),
            Self::LeaseTtlTooLarge { ttl, max_ttl } => {
                write!(f, "lease ttl is too large: ttl={ttl} max_ttl={max_ttl}")
            }
            Self::NoSpace => write!(f, "database space exceeded"),
            Self::Corrupt => write!(f, "corrupt cluster"),
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::UserEmpty => write!(f, "user name is empty"),
            Self::AuthOldRevision { requested, current } => write!(
                f,
                "revision of auth store is old: requested={requested} current={current}"
            ),
            Self::AuthNotEnabled => write!(f, "authentication is not enabled"),
            Self::AuthFailed => write!(f, "authentication failed, invalid user ID or password"),
            Self::InvalidAuthManagement => write!(f, "invalid auth management"),
            Self::RootUserNotExist => write!(f, "root user does not exist"),
            Self::RootRoleNotExist => write!(f, "root user does not have root role"),
            Self::UserAlreadyExist { name } => write!(f, "user name already exists: {name}"),
            Self::UserNotFound { name } => write!(f, "user name not found: {name}"),
            Self::RoleEmpty => write!(f, "role name is empty"),
            Self::RoleAlreadyExist { name } => write!(f, "role name already exists: {name}"),
            Self::RoleNotFound { name } => write!(f, "role name not found: {name}"),
            Self::RoleNotGranted { name } => write!(f, "role is not granted to the user: {name}"),
            Self::PermissionNotGranted => write!(f, "permission is not granted to the role"),
            Self::PasswordRequired => write!(f, "password is required for this user"),
        }
    }
}

impl std::error::Error for ApplyError {}

pub type ApplyResult<T> = Result<T, ApplyError>;
