//! The apply pipeline.
//!
//! A committed [`RaftRequest`](crate::command::RaftRequest) enters through the [`Dispatcher`],
//! which either hands it to the [`InternalApplier`] (cluster-control) or to the active
//! [`ApplyChain`]: a stack of policy layers over the [`BackendApplier`].

pub mod backend;
pub mod chain;
pub mod dispatcher;
pub mod internal;
pub mod outcome;
pub mod policy;

pub use backend::BackendApplier;
pub use chain::{ALARM_LAYERS, ApplyChain, BASE_LAYERS, ChainBuilder, Layer};
pub use dispatcher::{Dispatcher, DispatcherConfig, ShouldApply};
pub use internal::InternalApplier;
pub use outcome::{ApplyOutcome, ApplyReply, PhysicalCompletion, Trace};

use crate::command::{
    AlarmRequest, AuthRoleAddRequest, AuthRoleDeleteRequest, AuthRoleGetRequest,
    AuthRoleGrantPermissionRequest, AuthRoleRevokePermissionRequest, AuthUserAddRequest,
    AuthUserChangePasswordRequest, AuthUserDeleteRequest, AuthUserGetRequest,
    AuthUserGrantRoleRequest, AuthUserRevokeRoleRequest, AuthenticateRequest, CompactionRequest,
    DeleteRangeRequest, LeaseCheckpointRequest, LeaseGrantRequest, LeaseRevokeRequest, PutRequest,
    RangeRequest, RequestHeader, TxnRequest,
};
use crate::error::ApplyResult;
use crate::response::{
    AlarmResponse, AuthRevisionResponse, AuthRoleGetResponse, AuthRoleListResponse,
    AuthStatusResponse, AuthUserGetResponse, AuthUserListResponse, AuthenticateResponse,
    CompactionResponse, DeleteRangeResponse, LeaseCheckpointResponse, LeaseGrantResponse,
    LeaseRevokeResponse, PutResponse, RangeResponse, TxnResponse,
};
use crate::storage::Backend;

/// Identity the proposer resolved for the request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthInfo {
    pub username: String,
    pub revision: u64,
}

/// Per-request context handed down the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyContext {
    pub auth: AuthInfo,
}

impl ApplyContext {
    pub fn from_header(header: &RequestHeader) -> Self {
        Self {
            auth: AuthInfo {
                username: header.username.clone(),
                revision: header.auth_revision,
            },
        }
    }
}

/// One method per data-plane and auth-plane command.
///
/// Implemented by the [`BackendApplier`] and by every policy layer wrapping it. Reads take the
/// backend by shared reference.
pub trait Applier: Send + Sync {
    fn range(&self, be: &Backend, ctx: &ApplyContext, req: &RangeRequest)
    -> ApplyResult<RangeResponse>;

    fn put(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &PutRequest,
        trace: &mut Trace,
    ) -> ApplyResult<PutResponse>;

    fn delete_range(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &DeleteRangeRequest,
    ) -> ApplyResult<DeleteRangeResponse>;

    fn txn(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &TxnRequest,
        trace: &mut Trace,
    ) -> ApplyResult<TxnResponse>;

    fn compaction(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &CompactionRequest,
        trace: &mut Trace,
    ) -> ApplyResult<(CompactionResponse, PhysicalCompletion)>;

    fn lease_grant(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseGrantRequest,
    ) -> ApplyResult<LeaseGrantResponse>;

    fn lease_revoke(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseRevokeRequest,
    ) -> ApplyResult<LeaseRevokeResponse>;

    fn lease_checkpoint(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &LeaseCheckpointRequest,
    ) -> ApplyResult<LeaseCheckpointResponse>;

    fn alarm(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AlarmRequest,
    ) -> ApplyResult<AlarmResponse>;

    fn authenticate(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthenticateRequest,
    ) -> ApplyResult<AuthenticateResponse>;

    fn auth_enable(&self, be: &mut Backend, ctx: &ApplyContext)
    -> ApplyResult<AuthRevisionResponse>;

    fn auth_disable(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn auth_status(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthStatusResponse>;

    fn user_add(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserAddRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn user_delete(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn user_change_password(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserChangePasswordRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn user_grant_role(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserGrantRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn user_get(
        &self,
        be: &Backend,
        ctx: &ApplyContext,
        req: &AuthUserGetRequest,
    ) -> ApplyResult<AuthUserGetResponse>;

    fn user_revoke_role(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthUserRevokeRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn user_list(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthUserListResponse>;

    fn role_add(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleAddRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn role_get(
        &self,
        be: &Backend,
        ctx: &ApplyContext,
        req: &AuthRoleGetRequest,
    ) -> ApplyResult<AuthRoleGetResponse>;

    fn role_delete(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn role_grant_permission(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleGrantPermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn role_revoke_permission(
        &self,
        be: &mut Backend,
        ctx: &ApplyContext,
        req: &AuthRoleRevokePermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse>;

    fn role_list(&self, be: &Backend, ctx: &ApplyContext) -> ApplyResult<AuthRoleListResponse>;
}

/// Borrowed view of the request a policy layer is asked to admit.
#[derive(Debug, Clone, Copy)]
pub enum Op<'a> {
    Range(&'a RangeRequest),
    Put(&'a PutRequest),
    DeleteRange(&'a DeleteRangeRequest),
    Txn(&'a TxnRequest),
    Compaction(&'a CompactionRequest),
    LeaseGrant(&'a LeaseGrantRequest),
    LeaseRevoke(&'a LeaseRevokeRequest),
    LeaseCheckpoint(&'a LeaseCheckpointRequest),
    Alarm(&'a AlarmRequest),
    Authenticate(&'a AuthenticateRequest),
    AuthEnable,
    AuthDisable,
    AuthStatus,
    UserAdd(&'a AuthUserAddRequest),
    UserDelete(&'a AuthUserDeleteRequest),
    UserChangePassword(&'a AuthUserChangePasswordRequest),
    UserGrantRole(&'a AuthUserGrantRoleRequest),
    UserGet(&'a AuthUserGetRequest),
    UserRevokeRole(&'a AuthUserRevokeRoleRequest),
    UserList,
    RoleAdd(&'a AuthRoleAddRequest),
    RoleGet(&'a AuthRoleGetRequest),
    RoleDelete(&'a AuthRoleDeleteRequest),
    RoleGrantPermission(&'a AuthRoleGrantPermissionRequest),
    RoleRevokePermission(&'a AuthRoleRevokePermissionRequest),
    RoleList,
}
