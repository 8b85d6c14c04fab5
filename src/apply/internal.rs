//! Cluster-control commands. They keep replica metadata in sync and never go through the
//! policy chain.

use tracing::{debug, info, warn};

use super::ShouldApply;
use crate::command::{
    ClusterMemberAttrSetRequest, ClusterVersionSetRequest, DowngradeInfoSetRequest,
};
use crate::storage::Backend;
use crate::storage::cluster::MemberAttributes;

#[derive(Debug, Clone, Copy, Default)]
pub struct InternalApplier;

impl InternalApplier {
    pub fn cluster_version_set(
        &self,
        be: &mut Backend,
        req: &ClusterVersionSetRequest,
        should_apply: ShouldApply,
    ) {
        let version = match semver::Version::parse(&req.ver) {
            Ok(v) => v,
            Err(err) => {
                warn!(ver = %req.ver, error = %err, "ignoring unparseable cluster version");
                return;
            }
        };
        let prev = be.cluster.version.clone();
        be.cluster.set_version(&version);
        if prev != be.cluster.version {
            info!(from = %prev, to = %version, should_apply = should_apply.0, "cluster version set");
        }
    }

    pub fn cluster_member_attr_set(
        &self,
        be: &mut Backend,
        req: &ClusterMemberAttrSetRequest,
        should_apply: ShouldApply,
    ) {
        debug!(
            member_id = req.member_id,
            name = %req.name,
            should_apply = should_apply.0,
            "member attributes set"
        );
        be.cluster.set_member_attributes(
            req.member_id,
            MemberAttributes {
                name: req.name.clone(),
                client_urls: req.client_urls.clone(),
            },
        );
    }

    pub fn downgrade_info_set(
        &self,
        be: &mut Backend,
        req: &DowngradeInfoSetRequest,
        should_apply: ShouldApply,
    ) {
        if !req.enabled {
            be.cluster.set_downgrade(None);
            info!(should_apply = should_apply.0, "downgrade disabled");
            return;
        }
        match semver::Version::parse(&req.ver) {
            Ok(target) => {
                be.cluster.set_downgrade(Some(&target));
                info!(target = %target, should_apply = should_apply.0, "downgrade enabled");
            }
            Err(err) => {
                warn!(ver = %req.ver, error = %err, "ignoring unparseable downgrade target");
            }
        }
    }
}
