//! Policy layers.
//!
//! A policy only decides; [`ApplyLayer`] does the wrapping. Each call asks the policy to admit
//! the request, then rejects it, forwards it, or forwards it and overrides a successful result.

use super::{Applier, ApplyContext, Op, PhysicalCompletion, Trace};
use crate::command::{
    AlarmRequest, AuthRoleAddRequest, AuthRoleDeleteRequest, AuthRoleGetRequest,
    AuthRoleGrantPermissionRequest, AuthRoleRevokePermissionRequest, AuthUserAddRequest,
    AuthUserChangePasswordRequest, AuthUserDeleteRequest, AuthUserGetRequest,
    AuthUserGrantRoleRequest, AuthUserRevokeRoleRequest, AuthenticateRequest, CompactionRequest,
    DeleteRangeRequest, LeaseCheckpointRequest, LeaseGrantRequest, LeaseRevokeRequest, PutRequest,
    RangeRequest, RequestOp, TxnRequest,
};
use crate::error::{ApplyError, ApplyResult};
use crate::response::{
    AlarmResponse, AuthRevisionResponse, AuthRoleGetResponse, AuthRoleListResponse,
    AuthStatusResponse, AuthUserGetResponse, AuthUserListResponse, AuthenticateResponse,
    CompactionResponse, DeleteRangeResponse, LeaseCheckpointResponse, LeaseGrantResponse,
    LeaseRevokeResponse, PutResponse, RangeResponse, TxnResponse,
};
use crate::storage::auth::PermissionType;
use crate::storage::quota::{self, LEASE_GRANT_COST};
use crate::storage::{Backend, BackendQuota};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Pass,
    /// Refuse without calling the inner applier.
    Reject(ApplyError),
    /// Call the inner applier, then turn a success into this error.
    Flag(ApplyError),
}

impl Admission {
    fn run<T>(self, inner: impl FnOnce() -> ApplyResult<T>) -> ApplyResult<T> {
        match self {
            Self::Pass => inner(),
            Self::Reject(err) => Err(err),
            Self::Flag(err) => inner().and(Err(err)),
        }
    }
}

pub trait Policy: Send + Sync {
    fn admit(&self, be: &Backend, ctx: &ApplyContext, op: Op<'_>) -> Admission;
}

/// A policy wrapped around the next applier in the chain.
pub struct ApplyLayer<P> {
    policy: P,
    inner: Box<dyn Applier>,
}

impl<P: Policy> ApplyLayer<P> {
    pub fn new(policy: P, inner: Box<dyn Applier>) -> Self {
        Self { policy, inner }
    }
}

impl<P: Policy> Applier for ApplyLayer<P> {
    fn range(
        &self,
        be: &Backend,
        ctx: &ApplyContext,
        req: &RangeRequest,
    ) -> ApplyResult<RangeResponse> {
        self.policy
            .admit(be, ctx, Op::Range(req))
            .run(|| self.inner.range(be, ctx, req))
    }

    fn put(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &PutRequest,
        trace: &mut Trace,
    ) -> ApplyResult<PutResponse> {
        self.policy
            .admit(be, ctx, Op::Put(req))
            .run(|| self.inner.put(be, ctx, req, trace))
    }

    fn delete_range(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &DeleteRangeRequest,
    ) -> ApplyResult<DeleteRangeResponse> {
        self.policy
            .admit(be, ctx, Op::DeleteRange(req))
            .run(|| self.inner.delete_range(be, ctx, req))
    }

    fn txn(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &TxnRequest,
        trace: &mut Trace,
    ) -> ApplyResult<TxnResponse> {
        self.policy
            .admit(be, ctx, Op::Txn(req))
            .run(|| self.inner.txn(be, ctx, req, trace))
    }

    fn compaction(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &CompactionRequest,
        trace: &mut Trace,
    ) -> ApplyResult<(CompactionResponse, PhysicalCompletion)> {
        self.policy
            .admit(be, ctx, Op::Compaction(req))
            .run(|| self.inner.compaction(be, ctx, req, trace))
    }

    fn lease_grant(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseGrantRequest,
    ) -> ApplyResult<LeaseGrantResponse> {
        self.policy
            .admit(be, ctx, Op::LeaseGrant(req))
            .run(|| self.inner.lease_grant(be, ctx, req))
    }

    fn lease_revoke(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseRevokeRequest,
    ) -> ApplyResult<LeaseRevokeResponse> {
        self.policy
            .admit(be, ctx, Op::LeaseRevoke(req))
            .run(|| self.inner.lease_revoke(be, ctx, req))
    }

    fn lease_checkpoint(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseCheckpointRequest,
    ) -> ApplyResult<LeaseCheckpointResponse> {
        self.policy
            .admit(be, ctx, Op::LeaseCheckpoint(req))
            .run(|| self.inner.lease_checkpoint(be, ctx, req))
    }

    fn alarm(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AlarmRequest,
    ) -> ApplyResult<AlarmResponse> {
        self.policy
            .admit(be, ctx, Op::Alarm(req))
            .run(|| self.inner.alarm(be, ctx, req))
    }

    fn authenticate(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthenticateRequest,
    ) -> ApplyResult<AuthenticateResponse> {
        self.policy
            .admit(be, ctx, Op::Authenticate(req))
            .run(|| self.inner.authenticate(be, ctx, req))
    }

    fn auth_enable(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::AuthEnable)
            .run(|| self.inner.auth_enable(be, ctx))
    }

    fn auth_disable(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::AuthDisable)
            .run(|| self.inner.auth_disable(be, ctx))
    }

    fn auth_status(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthStatusResponse> {
        self.policy
            .admit(be, ctx, Op::AuthStatus)
            .run(|| self.inner.auth_status(be, ctx))
    }

    fn user_add(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserAddRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::UserAdd(req))
            .run(|| self.inner.user_add(be, ctx, req))
    }

    fn user_delete(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::UserDelete(req))
            .run(|| self.inner.user_delete(be, ctx, req))
    }

    fn user_change_password(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserChangePasswordRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::UserChangePassword(req))
            .run(|| self.inner.user_change_password(be, ctx, req))
    }

    fn user_grant_role(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserGrantRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::UserGrantRole(req))
            .run(|| self.inner.user_grant_role(be, ctx, req))
    }

    fn user_get(
        &self,
        be: &Backend,
        ctx: &ApplyContext,
        req: &AuthUserGetRequest,
    ) -> ApplyResult<AuthUserGetResponse> {
        self.policy
            .admit(be, ctx, Op::UserGet(req))
            .run(|| self.inner.user_get(be, ctx, req))
    }

    fn user_revoke_role(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserRevokeRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::UserRevokeRole(req))
            .run(|| self.inner.user_revoke_role(be, ctx, req))
    }

    fn user_list(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthUserListResponse> {
        self.policy
            .admit(be, ctx, Op::UserList)
            .run(|| self.inner.user_list(be, ctx))
    }

    fn role_add(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleAddRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::RoleAdd(req))
            .run(|| self.inner.role_add(be, ctx, req))
    }

    fn role_get(
        &self,
        be: &Backend,
        ctx: &ApplyContext,
        req: &AuthRoleGetRequest,
    ) -> ApplyResult<AuthRoleGetResponse> {
        self.policy
            .admit(be, ctx, Op::RoleGet(req))
            .run(|| self.inner.role_get(be, ctx, req))
    }

    fn role_delete(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::RoleDelete(req))
            .run(|| self.inner.role_delete(be, ctx, req))
    }

    fn role_grant_permission(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleGrantPermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::RoleGrantPermission(req))
            .run(|| self.inner.role_grant_permission(be, ctx, req))
    }

    fn role_revoke_permission(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleRevokePermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        self.policy
            .admit(be, ctx, Op::RoleRevokePermission(req))
            .run(|| self.inner.role_revoke_permission(be, ctx, req))
    }

    fn role_list(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthRoleListResponse> {
        self.policy
            .admit(be, ctx, Op::RoleList)
            .run(|| self.inner.role_list(be, ctx))
    }
}

/// Charges writes against the backend quota. The write still runs on every replica so state
/// stays identical; only the reply turns into `NoSpace`.
#[derive(Debug, Clone, Copy)]
pub struct QuotaPolicy {
    quota: BackendQuota,
}

impl QuotaPolicy {
    pub fn new(quota: BackendQuota) -> Self {
        Self { quota }
    }
}

impl Policy for QuotaPolicy {
    fn admit(&self, be: &Backend, _ctx: &ApplyContext, op: Op<'_>) -> Admission {
        let cost = match op {
            Op::Put(req) => quota::put_cost(req),
            Op::Txn(req) => quota::txn_cost(req),
            Op::LeaseGrant(_) => LEASE_GRANT_COST,
            _ => return Admission::Pass,
        };
        if self.quota.available(be, cost) {
            Admission::Pass
        } else {
            Admission::Flag(ApplyError::NoSpace)
        }
    }
}

/// Applied while a `NoSpace` alarm is active: nothing that can grow the backend goes through.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpaceLockdown;

impl Policy for SpaceLockdown {
    fn admit(&self, _be: &Backend, _ctx: &ApplyContext, op: Op<'_>) -> Admission {
        match op {
            Op::Put(_) | Op::LeaseGrant(_) => Admission::Reject(ApplyError::NoSpace),
            Op::Txn(req) if !req.is_read_only() => Admission::Reject(ApplyError::NoSpace),
            _ => Admission::Pass,
        }
    }
}

/// Applied while a `Corrupt` alarm is active: the key space is off limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorruptLockdown;

impl Policy for CorruptLockdown {
    fn admit(&self, _be: &Backend, _ctx: &ApplyContext, op: Op<'_>) -> Admission {
        match op {
            Op::Range(_)
            | Op::Put(_)
            | Op::DeleteRange(_)
            | Op::Txn(_)
            | Op::Compaction(_)
            | Op::LeaseGrant(_)
            | Op::LeaseRevoke(_) => Admission::Reject(ApplyError::Corrupt),
            _ => Admission::Pass,
        }
    }
}

/// Enforces the proposer's identity against the auth store.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthPolicy;

impl AuthPolicy {
    fn check(be: &Backend, ctx: &ApplyContext, op: Op<'_>) -> ApplyResult<()> {
        match op {
            Op::Range(req) => {
                range_permitted(be, ctx, &req.key, &req.range_end, PermissionType::Read)
            }
            Op::Put(req) => check_put(be, ctx, req),
            Op::DeleteRange(req) => check_delete(be, ctx, req),
            Op::Txn(req) => check_txn(be, ctx, req),
            Op::LeaseRevoke(req) => check_lease_keys(be, ctx, req.id),
            Op::AuthEnable
            | Op::AuthDisable
            | Op::AuthStatus
            | Op::UserAdd(_)
            | Op::UserDelete(_)
            | Op::UserChangePassword(_)
            | Op::UserGrantRole(_)
            | Op::UserRevokeRole(_)
            | Op::UserList
            | Op::RoleAdd(_)
            | Op::RoleDelete(_)
            | Op::RoleGrantPermission(_)
            | Op::RoleRevokePermission(_)
            | Op::RoleList => admin_permitted(be, ctx),
            Op::UserGet(req) => {
                admin_permitted(be, ctx).or_else(|err| self_or(err, ctx, &req.name))
            }
            Op::RoleGet(req) => admin_permitted(be, ctx).or_else(|err| {
                let holds_role = be
                    .auth
                    .user(&ctx.auth.username)
                    .is_some_and(|user| user.roles.contains(&req.role));
                if holds_role { Ok(()) } else { Err(err) }
            }),
            Op::Compaction(_)
            | Op::LeaseGrant(_)
            | Op::LeaseCheckpoint(_)
            | Op::Alarm(_)
            | Op::Authenticate(_) => Ok(()),
        }
    }
}

impl Policy for AuthPolicy {
    fn admit(&self, be: &Backend, ctx: &ApplyContext, op: Op<'_>) -> Admission {
        match Self::check(be, ctx, op) {
            Ok(()) => Admission::Pass,
            Err(err) => Admission::Reject(err),
        }
    }
}

fn self_or(err: ApplyError, ctx: &ApplyContext, name: &str) -> ApplyResult<()> {
    if ctx.auth.username == name {
        Ok(())
    } else {
        Err(err)
    }
}

fn admin_permitted(be: &Backend, ctx: &ApplyContext) -> ApplyResult<()> {
    if !be.auth.is_enabled() {
        return Ok(());
    }
    let name = &ctx.auth.username;
    if name.is_empty() {
        return Err(ApplyError::UserEmpty);
    }
    if be.auth.user(name).is_none() {
        return Err(ApplyError::UserNotFound { name: name.clone() });
    }
    if !be.auth.has_root_role(name) {
        return Err(ApplyError::PermissionDenied);
    }
    Ok(())
}

fn range_permitted(
    be: &Backend,
    ctx: &ApplyContext,
    key: &[u8],
    range_end: &[u8],
    wanted: PermissionType,
) -> ApplyResult<()> {
    if !be.auth.is_enabled() {
        return Ok(());
    }
    let info = &ctx.auth;
    if info.username.is_empty() || info.revision == 0 {
        return Err(ApplyError::UserEmpty);
    }
    if info.revision < be.auth.revision() {
        return Err(ApplyError::AuthOldRevision {
            requested: info.revision,
            current: be.auth.revision(),
        });
    }
    if be
        .auth
        .is_range_permitted(&info.username, key, range_end, wanted)
    {
        Ok(())
    } else {
        Err(ApplyError::PermissionDenied)
    }
}

fn check_put(be: &Backend, ctx: &ApplyContext, req: &PutRequest) -> ApplyResult<()> {
    if req.lease != 0 {
        check_lease_keys(be, ctx, req.lease)?;
    }
    range_permitted(be, ctx, &req.key, &[], PermissionType::Write)?;
    if req.prev_kv {
        range_permitted(be, ctx, &req.key, &[], PermissionType::Read)?;
    }
    Ok(())
}

fn check_delete(be: &Backend, ctx: &ApplyContext, req: &DeleteRangeRequest) -> ApplyResult<()> {
    range_permitted(be, ctx, &req.key, &req.range_end, PermissionType::Write)?;
    if req.prev_kv {
        range_permitted(be, ctx, &req.key, &req.range_end, PermissionType::Read)?;
    }
    Ok(())
}

fn check_txn(be: &Backend, ctx: &ApplyContext, req: &TxnRequest) -> ApplyResult<()> {
    for cmp in &req.compare {
        range_permitted(be, ctx, &cmp.key, &cmp.range_end, PermissionType::Read)?;
    }
    for op in req.success.iter().chain(req.failure.iter()) {
        match op {
            RequestOp::Range(r) => {
                range_permitted(be, ctx, &r.key, &r.range_end, PermissionType::Read)?
            }
            RequestOp::Put(r) => check_put(be, ctx, r)?,
            RequestOp::DeleteRange(r) => check_delete(be, ctx, r)?,
            RequestOp::Txn(nested) => check_txn(be, ctx, nested)?,
        }
    }
    Ok(())
}

/// Write access to every key attached to the lease. An unknown lease has no keys to protect.
fn check_lease_keys(be: &Backend, ctx: &ApplyContext, lease_id: i64) -> ApplyResult<()> {
    let Some(lease) = be.lessor.lookup(lease_id) else {
        return Ok(());
    };
    for key in &lease.keys {
        range_permitted(be, ctx, key, &[], PermissionType::Write)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::AuthInfo;
    use crate::storage::Permission;
    use crate::storage::auth::{ROOT_ROLE, ROOT_USER};

    fn ctx(user: &str, revision: u64) -> ApplyContext {
        ApplyContext {
            auth: AuthInfo {
                username: user.to_string(),
                revision,
            },
        }
    }

    fn put(key: &str) -> PutRequest {
        PutRequest {
            key: key.as_bytes().to_vec(),
            value: b"v".to_vec(),
            ..Default::default()
        }
    }

    /// root plus `alice` with read-write on `[a, m)`, auth enabled.
    fn secured_backend() -> Backend {
        let mut be = Backend::default();
        be.auth.user_add(ROOT_USER, "$h", false).unwrap();
        be.auth.user_grant_role(ROOT_USER, ROOT_ROLE).unwrap();
        be.auth.role_add("half").unwrap();
        be.auth
            .role_grant_permission(
                "half",
                &Permission {
                    perm_type: PermissionType::Readwrite,
                    key: b"a".to_vec(),
                    range_end: b"m".to_vec(),
                },
            )
            .unwrap();
        be.auth.user_add("alice", "$h", false).unwrap();
        be.auth.user_grant_role("alice", "half").unwrap();
        be.auth.enable().unwrap();
        be
    }

    #[test]
    fn auth_disabled_admits_everything() {
        let be = Backend::default();
        let put = put("z");
        assert_eq!(
            AuthPolicy.admit(&be, &ApplyContext::default(), Op::Put(&put)),
            Admission::Pass
        );
        assert_eq!(
            AuthPolicy.admit(&be, &ApplyContext::default(), Op::UserList),
            Admission::Pass
        );
    }

    #[test]
    fn key_permissions_follow_granted_ranges() {
        let be = secured_backend();
        let rev = be.auth.revision();
        let alice = ctx("alice", rev);
        assert_eq!(AuthPolicy.admit(&be, &alice, Op::Put(&put("b"))), Admission::Pass);
        assert_eq!(
            AuthPolicy.admit(&be, &alice, Op::Put(&put("z"))),
            Admission::Reject(ApplyError::PermissionDenied)
        );
        assert_eq!(
            AuthPolicy.admit(&be, &ctx("", rev), Op::Put(&put("b"))),
            Admission::Reject(ApplyError::UserEmpty)
        );
        assert_eq!(
            AuthPolicy.admit(&be, &ctx("alice", rev - 1), Op::Put(&put("b"))),
            Admission::Reject(ApplyError::AuthOldRevision {
                requested: rev - 1,
                current: rev
            })
        );
    }

    #[test]
    fn txn_is_checked_recursively() {
        let be = secured_backend();
        let alice = ctx("alice", be.auth.revision());
        let txn = TxnRequest {
            success: vec![RequestOp::Txn(TxnRequest {
                failure: vec![RequestOp::Put(put("z"))],
                ..Default::default()
            })],
            ..Default::default()
        };
        assert_eq!(
            AuthPolicy.admit(&be, &alice, Op::Txn(&txn)),
            Admission::Reject(ApplyError::PermissionDenied)
        );
    }

    #[test]
    fn admin_ops_need_root_but_self_lookup_is_allowed() {
        let be = secured_backend();
        let alice = ctx("alice", be.auth.revision());
        assert_eq!(
            AuthPolicy.admit(&be, &alice, Op::UserList),
            Admission::Reject(ApplyError::PermissionDenied)
        );
        let own = AuthUserGetRequest {
            name: "alice".to_string(),
        };
        assert_eq!(AuthPolicy.admit(&be, &alice, Op::UserGet(&own)), Admission::Pass);
        let other = AuthUserGetRequest {
            name: ROOT_USER.to_string(),
        };
        assert_eq!(
            AuthPolicy.admit(&be, &alice, Op::UserGet(&other)),
            Admission::Reject(ApplyError::PermissionDenied)
        );
        let own_role = AuthRoleGetRequest {
            role: "half".to_string(),
        };
        assert_eq!(AuthPolicy.admit(&be, &alice, Op::RoleGet(&own_role)), Admission::Pass);
        let root = ctx(ROOT_USER, be.auth.revision());
        assert_eq!(AuthPolicy.admit(&be, &root, Op::AuthDisable), Admission::Pass);
    }

    #[test]
    fn space_lockdown_only_blocks_growth() {
        let be = Backend::default();
        let c = ApplyContext::default();
        let write_txn = TxnRequest {
            success: vec![RequestOp::Put(put("a"))],
            ..Default::default()
        };
        let read_txn = TxnRequest {
            success: vec![RequestOp::Range(RangeRequest::default())],
            ..Default::default()
        };
        assert_eq!(
            SpaceLockdown.admit(&be, &c, Op::Put(&put("a"))),
            Admission::Reject(ApplyError::NoSpace)
        );
        assert_eq!(
            SpaceLockdown.admit(&be, &c, Op::Txn(&write_txn)),
            Admission::Reject(ApplyError::NoSpace)
        );
        assert_eq!(SpaceLockdown.admit(&be, &c, Op::Txn(&read_txn)), Admission::Pass);
        assert_eq!(
            SpaceLockdown.admit(&be, &c, Op::DeleteRange(&DeleteRangeRequest::default())),
            Admission::Pass
        );
    }

    #[test]
    fn corrupt_lockdown_passes_alarms_and_auth() {
        let be = Backend::default();
        let c = ApplyContext::default();
        assert_eq!(
            CorruptLockdown.admit(&be, &c, Op::Range(&RangeRequest::default())),
            Admission::Reject(ApplyError::Corrupt)
        );
        assert_eq!(
            CorruptLockdown.admit(&be, &c, Op::Alarm(&AlarmRequest::default())),
            Admission::Pass
        );
        assert_eq!(CorruptLockdown.admit(&be, &c, Op::AuthStatus), Admission::Pass);
        assert_eq!(
            CorruptLockdown.admit(&be, &c, Op::LeaseCheckpoint(&Default::default())),
            Admission::Pass
        );
    }

    #[test]
    fn quota_flags_instead_of_rejecting() {
        let be = Backend::default();
        let tight = QuotaPolicy::new(BackendQuota::from_config(1));
        assert_eq!(
            tight.admit(&be, &ApplyContext::default(), Op::Put(&put("a"))),
            Admission::Flag(ApplyError::NoSpace)
        );
        assert_eq!(
            tight.admit(&be, &ApplyContext::default(), Op::DeleteRange(&Default::default())),
            Admission::Pass
        );
        let flagged: ApplyResult<u8> = Admission::Flag(ApplyError::NoSpace).run(|| Ok(1));
        assert_eq!(flagged, Err(ApplyError::NoSpace));
        let failed: ApplyResult<u8> =
            Admission::Flag(ApplyError::NoSpace).run(|| Err(ApplyError::KeyNotFound));
        assert_eq!(failed, Err(ApplyError::KeyNotFound));
    }
}
