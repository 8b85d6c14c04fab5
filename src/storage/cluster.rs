use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberAttributes {
    pub name: String,
    #[serde(default)]
    pub client_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DowngradeInfo {
    pub enabled: bool,
    /// Canonical semver text; empty while disabled.
    #[serde(default)]
    pub target_version: String,
}

/// Cluster-wide metadata kept in sync by cluster-control commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStore {
    /// Canonical semver text; empty until first set.
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub downgrade: DowngradeInfo,
    #[serde(default)]
    pub members: BTreeMap<u64, MemberAttributes>,
}

impl ClusterStore {
    pub fn set_version(&mut self, version: &semver::Version) {
        self.version = version.to_string();
    }

    pub fn set_downgrade(&mut self, target: Option<&semver::Version>) {
        self.downgrade = match target {
            Some(v) => DowngradeInfo {
                enabled: true,
                target_version: v.to_string(),
            },
            None => DowngradeInfo::default(),
        };
    }

    pub fn set_member_attributes(&mut self, member_id: u64, attrs: MemberAttributes) {
        self.members.insert(member_id, attrs);
    }
}
