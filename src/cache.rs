//! Identity Cache: the in-memory projection of IAM state (§4.2).
//!
//! Five maps plus a derived reverse index, all guarded by one mutex. No
//! method on `IdentityCache` ever performs I/O — callers snapshot what they
//! need under the lock, release it, then talk to the store separately
//! (§9 "Cache ⟂ store separation").

use crate::domain::mapping::MappingKind;
use crate::domain::{GroupInfo, GroupStatus, MappedPolicy, PolicyDocument, UserIdentity};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct CacheInner {
    pub policies: HashMap<String, PolicyDocument>,
    pub users: HashMap<(String, MappingKind), UserIdentity>,
    pub groups: HashMap<String, GroupInfo>,
    pub mappings: HashMap<(String, MappingKind), MappedPolicy>,
    /// Derived: user name -> set of group names (§3 I3).
    pub user_groups: HashMap<String, BTreeSet<String>>,
}

impl CacheInner {
    /// `removeGroupFromMembershipsMap` (§4.2): drop every reverse-index
    /// entry pointing at `group`. Always call this before
    /// `update_group_memberships_map` for the same group so a shrinking
    /// membership list doesn't leave stale entries behind.
    pub fn remove_group_from_memberships_map(&mut self, group: &str) {
        for members in self.user_groups.values_mut() {
            members.remove(group);
        }
    }

    /// `updateGroupMembershipsMap` (§4.2): re-insert `group` into the
    /// reverse index for each of its current members.
    pub fn update_group_memberships_map(&mut self, group: &GroupInfo) {
        for member in &group.members {
            self.user_groups
                .entry(member.clone())
                .or_default()
                .insert(group.name.clone());
        }
    }

    /// Apply a full membership delta for `group` in the correct order
    /// (§4.2): the only correct sequence is remove-then-rebuild.
    pub fn reindex_group(&mut self, group: &GroupInfo) {
        self.remove_group_from_memberships_map(&group.name);
        self.update_group_memberships_map(group);
    }

    pub fn groups_for_user(&self, user: &str) -> BTreeSet<String> {
        self.user_groups.get(user).cloned().unwrap_or_default()
    }
}

/// The Identity Cache. Wraps `CacheInner` in a single `tokio::sync::Mutex`
/// per §4.2 — fine-grained relative to the store lock, but still one lock
/// for all five maps, matching the reference's single-mutex cache.
pub struct IdentityCache {
    inner: Mutex<CacheInner>,
}

impl IdentityCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().await
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GroupInfo;

    #[tokio::test]
    async fn reverse_index_matches_group_membership() {
        let cache = IdentityCache::new();
        let mut group = GroupInfo::new("g1");
        group.union_members(&["bob".to_string(), "carol".to_string()]);

        {
            let mut inner = cache.lock().await;
            inner.groups.insert(group.name.clone(), group.clone());
            inner.reindex_group(&group);
        }

        let inner = cache.lock().await;
        assert!(inner.groups_for_user("bob").contains("g1"));
        assert!(inner.groups_for_user("carol").contains("g1"));
        assert!(inner.groups_for_user("dave").is_empty());
    }

    #[tokio::test]
    async fn reindex_after_shrinking_membership_drops_stale_entries() {
        let cache = IdentityCache::new();
        let mut group = GroupInfo::new("g1");
        group.union_members(&["bob".to_string()]);

        {
            let mut inner = cache.lock().await;
            inner.reindex_group(&group);
        }

        group.subtract_members(&["bob".to_string()]);
        {
            let mut inner = cache.lock().await;
            inner.reindex_group(&group);
        }

        let inner = cache.lock().await;
        assert!(inner.groups_for_user("bob").is_empty());
    }

    #[tokio::test]
    async fn disabled_group_still_appears_in_reverse_index() {
        let cache = IdentityCache::new();
        let mut group = GroupInfo::new("g1");
        group.union_members(&["bob".to_string()]);
        group.status = GroupStatus::Disabled;

        {
            let mut inner = cache.lock().await;
            inner.reindex_group(&group);
        }

        let inner = cache.lock().await;
        // I3: the index is the transpose of membership for enabled AND
        // disabled groups; evaluation-time filtering happens elsewhere.
        assert!(inner.groups_for_user("bob").contains("g1"));
    }
}
