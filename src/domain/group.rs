//! Group membership (§3, §4.3 Add/RemoveUsersToGroup).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub name: String,
    pub status: GroupStatus,
    pub members: BTreeSet<String>,
    pub version: u64,
}

impl GroupInfo {
    /// New groups default to `Enabled` (§4.3 AddUsersToGroup).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: GroupStatus::Enabled,
            members: BTreeSet::new(),
            version: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn union_members(&mut self, new_members: &[String]) {
        for m in new_members {
            self.members.insert(m.clone());
        }
        self.version += 1;
    }

    pub fn subtract_members(&mut self, remove: &[String]) {
        for m in remove {
            self.members.remove(m);
        }
        self.version += 1;
    }
}
