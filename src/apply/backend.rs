//! Leaf of the apply chain: executes commands against the [`Backend`] with no policy checks.

use std::cmp::Ordering;

use tracing::{info, warn};

use super::{Applier, ApplyContext, PhysicalCompletion, Trace};
use crate::command::{
    AlarmAction, AlarmRequest, AuthRoleAddRequest, AuthRoleDeleteRequest, AuthRoleGetRequest,
    AuthRoleGrantPermissionRequest, AuthRoleRevokePermissionRequest, AuthUserAddRequest,
    AuthUserChangePasswordRequest, AuthUserDeleteRequest, AuthUserGetRequest,
    AuthUserGrantRoleRequest, AuthUserRevokeRoleRequest, AuthenticateRequest, Compare,
    CompareResult, CompareTarget, CompactionRequest, DeleteRangeRequest, LeaseCheckpointRequest,
    LeaseGrantRequest, LeaseRevokeRequest, PutRequest, RangeRequest, RequestOp, TxnRequest,
};
use crate::error::{ApplyError, ApplyResult};
use crate::response::{
    AlarmResponse, AuthRevisionResponse, AuthRoleGetResponse, AuthRoleListResponse,
    AuthStatusResponse, AuthUserGetResponse, AuthUserListResponse, AuthenticateResponse,
    CompactionResponse, DeleteRangeResponse, LeaseCheckpointResponse, LeaseGrantResponse,
    LeaseRevokeResponse, PutResponse, RangeResponse, ResponseOp, TxnResponse,
};
use crate::storage::mvcc::{RangeOptions, RangeResult, WriteTxn};
use crate::storage::{AlarmType, Backend, KeyValue, Lessor, MAX_LEASE_TTL};

#[derive(Debug, Clone)]
pub struct BackendApplier {
    max_lease_ttl: i64,
}

impl Default for BackendApplier {
    fn default() -> Self {
        Self::new(MAX_LEASE_TTL)
    }
}

impl BackendApplier {
    pub fn new(max_lease_ttl: i64) -> Self {
        Self { max_lease_ttl }
    }
}

fn range_options(req: &RangeRequest) -> RangeOptions {
    RangeOptions {
        limit: req.limit,
        revision: req.revision,
        count_only: req.count_only,
    }
}

fn range_response(req: &RangeRequest, result: RangeResult) -> RangeResponse {
    let more = req.limit > 0 && result.count > result.kvs.len() as i64;
    let mut kvs = result.kvs;
    if req.keys_only {
        for kv in &mut kvs {
            kv.value.clear();
        }
    }
    RangeResponse {
        kvs,
        more: more && !req.count_only,
        count: result.count,
        revision: result.revision,
    }
}

/// Validates a put against the state it will be applied to.
fn check_put(view: &WriteTxn<'_>, lessor: &Lessor, req: &PutRequest) -> ApplyResult<()> {
    if (req.ignore_value || req.ignore_lease) && view.get(&req.key).is_none() {
        return Err(ApplyError::KeyNotFound);
    }
    if !req.ignore_lease && req.lease != 0 && lessor.lookup(req.lease).is_none() {
        return Err(ApplyError::LeaseNotFound {
            lease_id: req.lease,
        });
    }
    Ok(())
}

fn put_kv(
    txn: &mut WriteTxn<'_>,
    lessor: &mut Lessor,
    req: &PutRequest,
) -> ApplyResult<Option<KeyValue>> {
    check_put(txn, lessor, req)?;
    let prev = txn.get(&req.key).cloned();
    let (value, lease) = match &prev {
        Some(prev) => (
            if req.ignore_value {
                prev.value.clone()
            } else {
                req.value.clone()
            },
            if req.ignore_lease { prev.lease } else { req.lease },
        ),
        None => (req.value.clone(), req.lease),
    };
    if let Some(prev) = &prev
        && prev.lease != 0
        && prev.lease != lease
    {
        lessor.detach(prev.lease, &req.key);
    }
    if lease != 0 {
        lessor.attach(lease, &req.key)?;
    }
    txn.put(&req.key, value, lease);
    Ok(prev)
}

fn delete_kvs(
    txn: &mut WriteTxn<'_>,
    lessor: &mut Lessor,
    req: &DeleteRangeRequest,
) -> Vec<KeyValue> {
    let deleted = txn.delete_range(&req.key, &req.range_end);
    for kv in &deleted {
        if kv.lease != 0 {
            lessor.detach(kv.lease, &kv.key);
        }
    }
    deleted
}

fn compare_holds(view: &WriteTxn<'_>, cmp: &Compare) -> bool {
    let Ok(result) = view.range(&cmp.key, &cmp.range_end, RangeOptions::default()) else {
        return false;
    };
    if result.kvs.is_empty() {
        // A missing key has no value to compare; every other target reads as zero.
        return !matches!(cmp.target, CompareTarget::Value(_))
            && compare_kv(cmp, &KeyValue::default());
    }
    result.kvs.iter().all(|kv| compare_kv(cmp, kv))
}

fn compare_kv(cmp: &Compare, kv: &KeyValue) -> bool {
    let ord = match &cmp.target {
        CompareTarget::Version(v) => kv.version.cmp(v),
        CompareTarget::CreateRevision(v) => kv.create_revision.cmp(v),
        CompareTarget::ModRevision(v) => kv.mod_revision.cmp(v),
        CompareTarget::Value(v) => kv.value.as_slice().cmp(v.as_slice()),
        CompareTarget::Lease(v) => kv.lease.cmp(v),
    };
    match cmp.result {
        CompareResult::Equal => ord == Ordering::Equal,
        CompareResult::NotEqual => ord != Ordering::Equal,
        CompareResult::Greater => ord == Ordering::Greater,
        CompareResult::Less => ord == Ordering::Less,
    }
}

fn branch(txn: &TxnRequest, succeeded: bool) -> &[RequestOp] {
    if succeeded {
        &txn.success
    } else {
        &txn.failure
    }
}

/// Evaluates every compare on the taken path up front, depth first, against the state before
/// the transaction writes anything.
fn compare_path(view: &WriteTxn<'_>, txn: &TxnRequest, path: &mut Vec<bool>) {
    let succeeded = txn.compare.iter().all(|cmp| compare_holds(view, cmp));
    path.push(succeeded);
    for op in branch(txn, succeeded) {
        if let RequestOp::Txn(nested) = op {
            compare_path(view, nested, path);
        }
    }
}

fn check_ops(
    view: &WriteTxn<'_>,
    lessor: &Lessor,
    ops: &[RequestOp],
    path: &[bool],
    next: &mut usize,
) -> ApplyResult<()> {
    for op in ops {
        match op {
            RequestOp::Range(req) => {
                view.range(&req.key, &req.range_end, range_options(req))?;
            }
            RequestOp::Put(req) => check_put(view, lessor, req)?,
            RequestOp::DeleteRange(_) => {}
            RequestOp::Txn(nested) => {
                let succeeded = path[*next];
                *next += 1;
                check_ops(view, lessor, branch(nested, succeeded), path, next)?;
            }
        }
    }
    Ok(())
}

fn exec_ops(
    txn: &mut WriteTxn<'_>,
    lessor: &mut Lessor,
    ops: &[RequestOp],
    path: &[bool],
    next: &mut usize,
) -> ApplyResult<Vec<ResponseOp>> {
    let mut responses = Vec::with_capacity(ops.len());
    for op in ops {
        let response = match op {
            RequestOp::Range(req) => {
                let result = txn.range(&req.key, &req.range_end, range_options(req))?;
                ResponseOp::Range(range_response(req, result))
            }
            RequestOp::Put(req) => {
                let prev = put_kv(txn, lessor, req)?;
                ResponseOp::Put(PutResponse {
                    revision: 0,
                    prev_kv: prev.filter(|_| req.prev_kv),
                })
            }
            RequestOp::DeleteRange(req) => {
                let deleted = delete_kvs(txn, lessor, req);
                ResponseOp::DeleteRange(DeleteRangeResponse {
                    revision: 0,
                    deleted: deleted.len() as i64,
                    prev_kvs: if req.prev_kv { deleted } else { Vec::new() },
                })
            }
            RequestOp::Txn(nested) => {
                let succeeded = path[*next];
                *next += 1;
                let responses = exec_ops(txn, lessor, branch(nested, succeeded), path, next)?;
                ResponseOp::Txn(TxnResponse {
                    revision: 0,
                    succeeded,
                    responses,
                })
            }
        };
        responses.push(response);
    }
    Ok(responses)
}

fn stamp_revision(responses: &mut [ResponseOp], revision: i64) {
    for response in responses {
        match response {
            ResponseOp::Range(_) => {}
            ResponseOp::Put(r) => r.revision = revision,
            ResponseOp::DeleteRange(r) => r.revision = revision,
            ResponseOp::Txn(r) => {
                r.revision = revision;
                stamp_revision(&mut r.responses, revision);
            }
        }
    }
}

fn auth_revision(revision: u64) -> AuthRevisionResponse {
    AuthRevisionResponse {
        auth_revision: revision,
    }
}

impl Applier for BackendApplier {
    fn range(
        &self,
        be: &Backend,
        _ctx: &ApplyContext,
        req: &RangeRequest,
    ) -> ApplyResult<RangeResponse> {
        let result = be.kv.range(&req.key, &req.range_end, range_options(req))?;
        Ok(range_response(req, result))
    }

    fn put(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &PutRequest,
        trace: &mut Trace,
    ) -> ApplyResult<PutResponse> {
        let mut txn = be.kv.write();
        let prev = put_kv(&mut txn, &mut be.lessor, req)?;
        trace.step("put to key space");
        let revision = txn.end();
        Ok(PutResponse {
            revision,
            prev_kv: prev.filter(|_| req.prev_kv),
        })
    }

    fn delete_range(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &DeleteRangeRequest,
    ) -> ApplyResult<DeleteRangeResponse> {
        let mut txn = be.kv.write();
        let deleted = delete_kvs(&mut txn, &mut be.lessor, req);
        let revision = txn.end();
        Ok(DeleteRangeResponse {
            revision,
            deleted: deleted.len() as i64,
            prev_kvs: if req.prev_kv { deleted } else { Vec::new() },
        })
    }

    fn txn(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &TxnRequest,
        trace: &mut Trace,
    ) -> ApplyResult<TxnResponse> {
        let mut txn = be.kv.write();
        let mut path = Vec::new();
        compare_path(&txn, req, &mut path);
        trace.step("compare");

        let succeeded = path[0];
        let ops = branch(req, succeeded);
        check_ops(&txn, &be.lessor, ops, &path, &mut 1)?;
        trace.step("check requests");

        // Lease attachments are staged with the writes and land only if every op succeeds.
        let mut lessor = be.lessor.clone();
        let mut responses = exec_ops(&mut txn, &mut lessor, ops, &path, &mut 1)?;
        let revision = txn.end();
        be.lessor = lessor;
        stamp_revision(&mut responses, revision);
        trace.step("apply requests");
        Ok(TxnResponse {
            revision,
            succeeded,
            responses,
        })
    }

    fn compaction(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &CompactionRequest,
        trace: &mut Trace,
    ) -> ApplyResult<(CompactionResponse, PhysicalCompletion)> {
        be.kv.compact(req.revision)?;
        trace.step("compact key space");
        // History is reclaimed inline, so the signal fires before the response is returned.
        let (done, physical) = PhysicalCompletion::channel();
        let _ = done.send(());
        Ok((
            CompactionResponse {
                revision: be.kv.current_revision(),
            },
            physical,
        ))
    }

    fn lease_grant(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &LeaseGrantRequest,
    ) -> ApplyResult<LeaseGrantResponse> {
        let lease = be.lessor.grant(req.id, req.ttl, self.max_lease_ttl)?;
        Ok(LeaseGrantResponse {
            id: lease.id,
            ttl: lease.ttl,
            revision: be.kv.current_revision(),
        })
    }

    fn lease_revoke(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &LeaseRevokeRequest,
    ) -> ApplyResult<LeaseRevokeResponse> {
        let lease = be.lessor.revoke(req.id)?;
        let mut txn = be.kv.write();
        for key in &lease.keys {
            txn.delete_range(key, &[]);
        }
        Ok(LeaseRevokeResponse {
            revision: txn.end(),
        })
    }

    fn lease_checkpoint(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &LeaseCheckpointRequest,
    ) -> ApplyResult<LeaseCheckpointResponse> {
        for cp in &req.checkpoints {
            be.lessor.checkpoint(cp.id, cp.remaining_ttl);
        }
        Ok(LeaseCheckpointResponse {
            revision: be.kv.current_revision(),
        })
    }

    fn alarm(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AlarmRequest,
    ) -> ApplyResult<AlarmResponse> {
        let alarms = match req.action {
            AlarmAction::Get => be.alarms.get(req.alarm),
            AlarmAction::Activate => {
                let raised = be.alarms.activate(req.member_id, req.alarm);
                match req.alarm {
                    AlarmType::NoSpace | AlarmType::Corrupt if raised.is_some() => {
                        warn!(
                            member_id = req.member_id,
                            alarm = ?req.alarm,
                            "alarm raised"
                        );
                    }
                    AlarmType::None => warn!("ignoring activation of an empty alarm"),
                    _ => {}
                }
                raised.into_iter().collect()
            }
            AlarmAction::Deactivate => {
                let cleared = be.alarms.deactivate(req.member_id, req.alarm);
                if cleared.is_some() {
                    info!(member_id = req.member_id, alarm = ?req.alarm, "alarm disarmed");
                }
                cleared.into_iter().collect()
            }
        };
        Ok(AlarmResponse { alarms })
    }

    fn authenticate(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthenticateRequest,
    ) -> ApplyResult<AuthenticateResponse> {
        let token = be.auth.authenticate(&req.name, &req.simple_token)?;
        Ok(AuthenticateResponse { token })
    }

    fn auth_enable(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth.enable().map(auth_revision)
    }

    fn auth_disable(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
    ) -> ApplyResult<AuthRevisionResponse> {
        Ok(auth_revision(be.auth.disable()))
    }

    fn auth_status(&self, be: &Backend, _ctx: &ApplyContext) -> ApplyResult<AuthStatusResponse> {
        Ok(AuthStatusResponse {
            enabled: be.auth.is_enabled(),
            auth_revision: be.auth.revision(),
        })
    }

    fn user_add(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthUserAddRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .user_add(&req.name, &req.hashed_password, req.no_password)
            .map(auth_revision)
    }

    fn user_delete(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthUserDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth.user_delete(&req.name).map(auth_revision)
    }

    fn user_change_password(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthUserChangePasswordRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .user_change_password(&req.name, &req.hashed_password)
            .map(auth_revision)
    }

    fn user_grant_role(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthUserGrantRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .user_grant_role(&req.user, &req.role)
            .map(auth_revision)
    }

    fn user_get(
        &self,
        be: &Backend,
        _ctx: &ApplyContext,
        req: &AuthUserGetRequest,
    ) -> ApplyResult<AuthUserGetResponse> {
        let roles = be.auth.user_get(&req.name)?;
        Ok(AuthUserGetResponse { roles })
    }

    fn user_revoke_role(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthUserRevokeRoleRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .user_revoke_role(&req.name, &req.role)
            .map(auth_revision)
    }

    fn user_list(&self, be: &Backend, _ctx: &ApplyContext) -> ApplyResult<AuthUserListResponse> {
        Ok(AuthUserListResponse {
            users: be.auth.user_list(),
        })
    }

    fn role_add(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthRoleAddRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth.role_add(&req.name).map(auth_revision)
    }

    fn role_get(
        &self,
        be: &Backend,
        _ctx: &ApplyContext,
        req: &AuthRoleGetRequest,
    ) -> ApplyResult<AuthRoleGetResponse> {
        let perm = be.auth.role_get(&req.role)?;
        Ok(AuthRoleGetResponse { perm })
    }

    fn role_delete(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthRoleDeleteRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth.role_delete(&req.role).map(auth_revision)
    }

    fn role_grant_permission(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthRoleGrantPermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .role_grant_permission(&req.name, &req.perm)
            .map(auth_revision)
    }

    fn role_revoke_permission(
        &self,
        be: &mut Backend,
        _ctx: &ApplyContext,
        req: &AuthRoleRevokePermissionRequest,
    ) -> ApplyResult<AuthRevisionResponse> {
        be.auth
            .role_revoke_permission(&req.role, &req.key, &req.range_end)
            .map(auth_revision)
    }

    fn role_list(&self, be: &Backend, _ctx: &ApplyContext) -> ApplyResult<AuthRoleListResponse> {
        Ok(AuthRoleListResponse {
            roles: be.auth.role_list(),
        })
    }
}
