use std::fmt;

use super::policy::{ApplyLayer, AuthPolicy, CorruptLockdown, QuotaPolicy, SpaceLockdown};
use super::{Applier, BackendApplier};
use crate::storage::{AlarmStore, AlarmType, BackendQuota, MAX_LEASE_TTL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Auth,
    Quota,
    SpaceLockdown,
    CorruptLockdown,
}

/// Always present, outermost first.
pub const BASE_LAYERS: [Layer; 2] = [Layer::Auth, Layer::Quota];

/// Added on top of the base while the alarm is active, outermost first.
pub const ALARM_LAYERS: [(AlarmType, Layer); 2] = [
    (AlarmType::Corrupt, Layer::CorruptLockdown),
    (AlarmType::NoSpace, Layer::SpaceLockdown),
];

/// The active stack of layers over the backend applier. Never modified after it is built.
pub struct ApplyChain {
    layers: Vec<Layer>,
    entry: Box<dyn Applier>,
}

impl ApplyChain {
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn entry(&self) -> &dyn Applier {
        self.entry.as_ref()
    }
}

impl fmt::Debug for ApplyChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplyChain")
            .field("layers", &self.layers)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChainBuilder {
    quota: BackendQuota,
    max_lease_ttl: i64,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new(BackendQuota::from_config(0), MAX_LEASE_TTL)
    }
}

impl ChainBuilder {
    pub fn new(quota: BackendQuota, max_lease_ttl: i64) -> Self {
        Self {
            quota,
            max_lease_ttl,
        }
    }

    /// Layer order for the given alarm state, outermost first.
    pub fn layers_for(alarms: &AlarmStore) -> Vec<Layer> {
        ALARM_LAYERS
            .iter()
            .filter(|(alarm, _)| alarms.is_active(*alarm))
            .map(|(_, layer)| *layer)
            .chain(BASE_LAYERS)
            .collect()
    }

    /// Builds a fresh chain from the base up.
    pub fn build(&self, alarms: &AlarmStore) -> ApplyChain {
        let layers = Self::layers_for(alarms);
        let mut entry: Box<dyn Applier> = Box::new(BackendApplier::new(self.max_lease_ttl));
        for layer in layers.iter().rev() {
            entry = self.wrap(*layer, entry);
        }
        ApplyChain { layers, entry }
    }

    fn wrap(&self, layer: Layer, inner: Box<dyn Applier>) -> Box<dyn Applier> {
        match layer {
            Layer::Auth => Box::new(ApplyLayer::new(AuthPolicy, inner)),
            Layer::Quota => Box::new(ApplyLayer::new(QuotaPolicy::new(self.quota), inner)),
            Layer::SpaceLockdown => Box::new(ApplyLayer::new(SpaceLockdown, inner)),
            Layer::CorruptLockdown => Box::new(ApplyLayer::new(CorruptLockdown, inner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn no_alarms_builds_base() {
        let chain = ChainBuilder::default().build(&AlarmStore::default());
        assert_eq!(chain.layers(), &[Layer::Auth, Layer::Quota]);
    }

    #[test]
    fn both_alarms_stack_corrupt_outermost() {
        let mut alarms = AlarmStore::default();
        alarms.activate(1, AlarmType::NoSpace);
        alarms.activate(2, AlarmType::Corrupt);
        assert_eq!(
            ChainBuilder::layers_for(&alarms),
            vec![
                Layer::CorruptLockdown,
                Layer::SpaceLockdown,
                Layer::Auth,
                Layer::Quota
            ]
        );
    }

    #[test]
    fn single_alarm_layers() {
        let mut alarms = AlarmStore::default();
        alarms.activate(1, AlarmType::NoSpace);
        assert_eq!(
            ChainBuilder::layers_for(&alarms),
            vec![Layer::SpaceLockdown, Layer::Auth, Layer::Quota]
        );

        let mut alarms = AlarmStore::default();
        alarms.activate(1, AlarmType::Corrupt);
        assert_eq!(
            ChainBuilder::layers_for(&alarms),
            vec![Layer::CorruptLockdown, Layer::Auth, Layer::Quota]
        );
    }
}
