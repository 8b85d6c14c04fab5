use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::{ApplyChain, ApplyContext, ApplyOutcome, ChainBuilder, InternalApplier, Trace};
use crate::command::{AlarmAction, Command, RaftRequest};
use crate::error::ApplyError;
use crate::metrics::{ApplyMetrics, V3_VERSION};
use crate::response::Response;
use crate::storage::{Backend, BackendQuota, MAX_LEASE_TTL};

/// Whether this node may apply data-plane and auth-plane commands for the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShouldApply(pub bool);

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub quota: BackendQuota,
    pub max_lease_ttl: i64,
    /// Applies slower than this are logged.
    pub warning_apply_duration: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            quota: BackendQuota::from_config(0),
            max_lease_ttl: MAX_LEASE_TTL,
            warning_apply_duration: Duration::from_millis(100),
        }
    }
}

/// Single entry point for committed commands. Owns the backend and the active chain; `apply`
/// takes `&mut self`, so there is exactly one apply in flight.
pub struct Dispatcher {
    backend: Backend,
    builder: ChainBuilder,
    chain: ApplyChain,
    internal: InternalApplier,
    warning_apply_duration: Duration,
    metrics: Arc<ApplyMetrics>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, backend: Backend, metrics: Arc<ApplyMetrics>) -> Self {
        let builder = ChainBuilder::new(config.quota, config.max_lease_ttl);
        let chain = builder.build(&backend.alarms);
        Self {
            backend,
            builder,
            chain,
            internal: InternalApplier,
            warning_apply_duration: config.warning_apply_duration,
            metrics,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn chain(&self) -> &ApplyChain {
        &self.chain
    }

    pub fn metrics(&self) -> &Arc<ApplyMetrics> {
        &self.metrics
    }

    pub fn set_consistent_index(&mut self, index: u64) {
        self.backend.consistent_index = index;
    }

    /// Replaces the whole backend (snapshot install) and rebuilds the chain for its alarms.
    pub fn install(&mut self, backend: Backend) {
        self.backend = backend;
        self.restore_alarms();
    }

    /// Rebuilds the chain from the base for the alarms currently stored in the backend.
    pub fn restore_alarms(&mut self) {
        self.chain = self.builder.build(&self.backend.alarms);
        debug!(layers = ?self.chain.layers(), "apply chain rebuilt");
    }

    pub fn apply(&mut self, req: &RaftRequest, should_apply: ShouldApply) -> ApplyOutcome {
        let start = Instant::now();
        let outcome = self.dispatch(req, should_apply);
        let took = start.elapsed();

        let op = req.command.op_name();
        let success = outcome.is_success();
        self.metrics.observe(V3_VERSION, op, success, took);
        if took > self.warning_apply_duration {
            warn!(
                op,
                took = ?took,
                expected_duration = ?self.warning_apply_duration,
                request = %req,
                response = %render_result(&outcome),
                "apply request took too long"
            );
        }
        if !success {
            warn!(
                op,
                took = ?took,
                rejected_by_policy = outcome.error().is_some_and(ApplyError::is_policy_rejection),
                request = %req,
                error = %render_result(&outcome),
                "failed to apply request"
            );
        }
        outcome
    }

    fn dispatch(&mut self, req: &RaftRequest, should_apply: ShouldApply) -> ApplyOutcome {
        let be = &mut self.backend;
        match &req.command {
            Command::ClusterVersionSet(r) => {
                self.internal.cluster_version_set(be, r, should_apply);
                return ApplyOutcome::empty();
            }
            Command::ClusterMemberAttrSet(r) => {
                self.internal.cluster_member_attr_set(be, r, should_apply);
                return ApplyOutcome::empty();
            }
            Command::DowngradeInfoSet(r) => {
                self.internal.downgrade_info_set(be, r, should_apply);
                return ApplyOutcome::empty();
            }
            _ => {}
        }

        if !should_apply.0 {
            return ApplyOutcome::empty();
        }

        let ctx = ApplyContext::from_header(&req.header);
        let chain = self.chain.entry();
        let mut trace = None;
        let mut physical = None;
        let mut rebuild = false;
        let result = match &req.command {
            Command::Range(r) => chain.range(be, &ctx, r).map(Response::Range),
            Command::Put(r) => {
                let t = trace.insert(Trace::new("Put"));
                chain.put(be, &ctx, r, t).map(Response::Put)
            }
            Command::DeleteRange(r) => chain.delete_range(be, &ctx, r).map(Response::DeleteRange),
            Command::Txn(r) => {
                let t = trace.insert(Trace::new("Txn"));
                chain.txn(be, &ctx, r, t).map(Response::Txn)
            }
            Command::Compaction(r) => {
                let t = trace.insert(Trace::new("Compaction"));
                chain.compaction(be, &ctx, r, t).map(|(resp, done)| {
                    physical = Some(done);
                    Response::Compaction(resp)
                })
            }
            Command::LeaseGrant(r) => chain.lease_grant(be, &ctx, r).map(Response::LeaseGrant),
            Command::LeaseRevoke(r) => chain.lease_revoke(be, &ctx, r).map(Response::LeaseRevoke),
            Command::LeaseCheckpoint(r) => chain
                .lease_checkpoint(be, &ctx, r)
                .map(Response::LeaseCheckpoint),
            Command::Alarm(r) => {
                rebuild = matches!(r.action, AlarmAction::Activate | AlarmAction::Deactivate);
                chain.alarm(be, &ctx, r).map(Response::Alarm)
            }
            Command::Authenticate(r) => chain.authenticate(be, &ctx, r).map(Response::Authenticate),
            Command::AuthEnable => chain.auth_enable(be, &ctx).map(Response::AuthRevision),
            Command::AuthDisable => chain.auth_disable(be, &ctx).map(Response::AuthRevision),
            Command::AuthStatus => chain.auth_status(be, &ctx).map(Response::AuthStatus),
            Command::AuthUserAdd(r) => chain.user_add(be, &ctx, r).map(Response::AuthRevision),
            Command::AuthUserDelete(r) => {
                chain.user_delete(be, &ctx, r).map(Response::AuthRevision)
            }
            Command::AuthUserChangePassword(r) => chain
                .user_change_password(be, &ctx, r)
                .map(Response::AuthRevision),
            Command::AuthUserGrantRole(r) => chain
                .user_grant_role(be, &ctx, r)
                .map(Response::AuthRevision),
            Command::AuthUserGet(r) => chain.user_get(be, &ctx, r).map(Response::AuthUserGet),
            Command::AuthUserRevokeRole(r) => chain
                .user_revoke_role(be, &ctx, r)
                .map(Response::AuthRevision),
            Command::AuthUserList => chain.user_list(be, &ctx).map(Response::AuthUserList),
            Command::AuthRoleAdd(r) => chain.role_add(be, &ctx, r).map(Response::AuthRevision),
            Command::AuthRoleGet(r) => chain.role_get(be, &ctx, r).map(Response::AuthRoleGet),
            Command::AuthRoleDelete(r) => {
                chain.role_delete(be, &ctx, r).map(Response::AuthRevision)
            }
            Command::AuthRoleGrantPermission(r) => chain
                .role_grant_permission(be, &ctx, r)
                .map(Response::AuthRevision),
            Command::AuthRoleRevokePermission(r) => chain
                .role_revoke_permission(be, &ctx, r)
                .map(Response::AuthRevision),
            Command::AuthRoleList => chain.role_list(be, &ctx).map(Response::AuthRoleList),
            Command::ClusterVersionSet(_)
            | Command::ClusterMemberAttrSet(_)
            | Command::DowngradeInfoSet(_) => {
                unreachable!("cluster-control commands are routed before the chain")
            }
            Command::Unrecognized => {
                // Skipping an entry diverges this replica from the log.
                error!(request = %req, "not implemented apply");
                std::process::abort();
            }
        };

        if rebuild {
            self.restore_alarms();
        }
        ApplyOutcome {
            result: Some(result),
            trace,
            physical,
        }
    }
}

fn render_result(outcome: &ApplyOutcome) -> String {
    match &outcome.result {
        None => "<none>".to_string(),
        Some(Ok(response)) => response.to_string(),
        Some(Err(err)) => err.to_string(),
    }
}
