//! Default in-memory Store Adapter, used by tests and by callers who have
//! no durable backend wired up. Implements the same contract a real
//! object-store-backed adapter would (§4.1), including idempotent deletes
//! and "container missing" semantics — here the container is never
//! missing, since maps default to empty rather than absent.

use super::{IamStore, Ttl};
use crate::domain::mapping::MappingKind;
use crate::domain::{GroupInfo, MappedPolicy, PolicyDocument, UserIdentity};
use crate::error::{IamError, IamResult};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct Tables {
    policies: HashMap<String, PolicyDocument>,
    users: HashMap<(String, MappingKind), UserIdentity>,
    groups: HashMap<String, GroupInfo>,
    mappings: HashMap<(String, MappingKind), MappedPolicy>,
    format_migrated: bool,
}

/// A process-local, map-backed `IamStore`. Not persisted across restarts;
/// intended as the reference adapter and as a realistic test double.
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IamStore for InMemoryStore {
    async fn load_policy_doc(&self, name: &str) -> IamResult<PolicyDocument> {
        let tables = self.tables.lock().await;
        tables
            .policies
            .get(name)
            .cloned()
            .ok_or_else(|| IamError::NoSuchPolicy(name.to_string()))
    }

    async fn load_policy_docs(&self) -> IamResult<Vec<PolicyDocument>> {
        let tables = self.tables.lock().await;
        Ok(tables.policies.values().cloned().collect())
    }

    async fn get_user_credentials(
        &self,
        access_key: &str,
        kind: MappingKind,
    ) -> IamResult<UserIdentity> {
        let tables = self.tables.lock().await;
        tables
            .users
            .get(&(access_key.to_string(), kind))
            .cloned()
            .ok_or_else(|| IamError::NoSuchUser(access_key.to_string()))
    }

    async fn load_users(&self, kind: MappingKind) -> IamResult<Vec<UserIdentity>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_group_info(&self, name: &str) -> IamResult<GroupInfo> {
        let tables = self.tables.lock().await;
        tables
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| IamError::NoSuchGroup(name.to_string()))
    }

    async fn load_groups(&self) -> IamResult<Vec<GroupInfo>> {
        let tables = self.tables.lock().await;
        Ok(tables.groups.values().cloned().collect())
    }

    async fn get_mapped_policy(&self, name: &str, kind: MappingKind) -> IamResult<MappedPolicy> {
        let tables = self.tables.lock().await;
        tables
            .mappings
            .get(&(name.to_string(), kind))
            .cloned()
            .ok_or_else(|| IamError::NoSuchPolicy(name.to_string()))
    }

    async fn load_mapped_policies(
        &self,
        kind: MappingKind,
    ) -> IamResult<Vec<(String, MappedPolicy)>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .mappings
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|((name, _), v)| (name.clone(), v.clone()))
            .collect())
    }

    async fn save_policy_doc(&self, doc: &PolicyDocument) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        tables.policies.insert(doc.name.clone(), doc.clone());
        Ok(())
    }

    async fn save_user_identity(
        &self,
        identity: &UserIdentity,
        kind: MappingKind,
        _ttl: Ttl,
    ) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .users
            .insert((identity.credentials.access_key.clone(), kind), identity.clone());
        Ok(())
    }

    async fn save_group_info(&self, group: &GroupInfo) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        tables.groups.insert(group.name.clone(), group.clone());
        Ok(())
    }

    async fn save_mapped_policy(
        &self,
        name: &str,
        kind: MappingKind,
        mapped: &MappedPolicy,
        _ttl: Ttl,
    ) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .mappings
            .insert((name.to_string(), kind), mapped.clone());
        Ok(())
    }

    async fn delete_policy_doc(&self, name: &str) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.policies.remove(name) {
            Some(_) => Ok(()),
            None => Err(IamError::NoSuchPolicy(name.to_string())),
        }
    }

    async fn delete_user_identity(&self, access_key: &str, kind: MappingKind) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.users.remove(&(access_key.to_string(), kind)) {
            Some(_) => Ok(()),
            None => Err(IamError::NoSuchUser(access_key.to_string())),
        }
    }

    async fn delete_group_info(&self, name: &str) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.groups.remove(name) {
            Some(_) => Ok(()),
            None => Err(IamError::NoSuchGroup(name.to_string())),
        }
    }

    async fn delete_mapped_policy(&self, name: &str, kind: MappingKind) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.mappings.remove(&(name.to_string(), kind)) {
            Some(_) => Ok(()),
            None => Err(IamError::NoSuchPolicy(name.to_string())),
        }
    }

    async fn migrate_backend_format(&self) -> IamResult<()> {
        let mut tables = self.tables.lock().await;
        tables.format_migrated = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PolicyNameSet;

    #[tokio::test]
    async fn save_then_load_policy_doc_round_trips() {
        let store = InMemoryStore::new();
        let doc = PolicyDocument::new("readonly", "permit(principal, action, resource);");
        store.save_policy_doc(&doc).await.unwrap();
        let loaded = store.load_policy_doc("readonly").await.unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn missing_policy_is_no_such_policy() {
        let store = InMemoryStore::new();
        let err = store.load_policy_doc("nope").await.unwrap_err();
        assert_eq!(err, IamError::NoSuchPolicy("nope".to_string()));
    }

    #[tokio::test]
    async fn delete_is_idempotent_via_no_such_error() {
        let store = InMemoryStore::new();
        let doc = PolicyDocument::new("readonly", "permit(principal, action, resource);");
        store.save_policy_doc(&doc).await.unwrap();
        store.delete_policy_doc("readonly").await.unwrap();
        let err = store.delete_policy_doc("readonly").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn mapped_policy_filters_by_kind() {
        let store = InMemoryStore::new();
        let mapped = MappedPolicy::from_set(&PolicyNameSet::parse("readonly"));
        store
            .save_mapped_policy("alice", MappingKind::User, &mapped, Ttl::default())
            .await
            .unwrap();
        let sts_result = store.get_mapped_policy("alice", MappingKind::StsUser).await;
        assert!(sts_result.is_err());
        let user_result = store.get_mapped_policy("alice", MappingKind::User).await;
        assert!(user_result.is_ok());
    }
}
