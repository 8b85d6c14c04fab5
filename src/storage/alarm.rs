use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    /// Matches every alarm in a get; never stored.
    #[default]
    None,
    NoSpace,
    Corrupt,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlarmMember {
    pub member_id: u64,
    pub alarm: AlarmType,
}

/// Active alarms raised by cluster members.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmStore {
    active: BTreeSet<AlarmMember>,
}

impl AlarmStore {
    /// Alarms of the given kind, or every alarm for [`AlarmType::None`].
    pub fn get(&self, alarm: AlarmType) -> Vec<AlarmMember> {
        self.active
            .iter()
            .filter(|m| alarm == AlarmType::None || m.alarm == alarm)
            .cloned()
            .collect()
    }

    /// Returns the alarm when it was newly raised.
    pub fn activate(&mut self, member_id: u64, alarm: AlarmType) -> Option<AlarmMember> {
        if alarm == AlarmType::None {
            return None;
        }
        let member = AlarmMember { member_id, alarm };
        self.active.insert(member.clone()).then_some(member)
    }

    /// Returns the alarm when it was active.
    pub fn deactivate(&mut self, member_id: u64, alarm: AlarmType) -> Option<AlarmMember> {
        let member = AlarmMember { member_id, alarm };
        self.active.take(&member)
    }

    pub fn is_active(&self, alarm: AlarmType) -> bool {
        self.active.iter().any(|m| m.alarm == alarm)
    }
}
