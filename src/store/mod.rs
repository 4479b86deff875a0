//! Store Adapter: the durable side of the IAM core (§4.1).
//!
//! `IamStore` is the trait boundary to the (out-of-scope) durable object
//! layer. The coarse store lock lives alongside it rather than inside an
//! implementation, because §5 requires exactly one lock instance shared by
//! every mutation and by the full-load path, regardless of which backend
//! is plugged in.

pub mod in_memory;

use crate::domain::{GroupInfo, MappedPolicy, PolicyDocument, UserIdentity};
use crate::domain::mapping::MappingKind;
use crate::error::IamResult;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fixed path schema (§4.1). Kept even though the in-memory adapter does
/// not need paths, so that a future object-store-backed adapter is
/// tool-compatible by construction.
pub mod paths {
    pub const FORMAT: &str = "iam/format.json";

    pub fn policy(name: &str) -> String {
        format!("iam/policies/{name}/policy.json")
    }
    pub fn user(access_key: &str) -> String {
        format!("iam/users/{access_key}/identity.json")
    }
    pub fn sts_user(access_key: &str) -> String {
        format!("iam/sts/{access_key}/identity.json")
    }
    pub fn service_account(access_key: &str) -> String {
        format!("iam/service-accounts/{access_key}/identity.json")
    }
    pub fn group(name: &str) -> String {
        format!("iam/groups/{name}/members.json")
    }
    pub fn policydb_users(name: &str) -> String {
        format!("iam/policydb/users/{name}.json")
    }
    pub fn policydb_sts_users(name: &str) -> String {
        format!("iam/policydb/sts-users/{name}.json")
    }
    pub fn policydb_service_accounts(name: &str) -> String {
        format!("iam/policydb/service-accounts/{name}.json")
    }
    pub fn policydb_groups(name: &str) -> String {
        format!("iam/policydb/groups/{name}.json")
    }
}

/// Optional time-to-live for STS identities and their mappings (§4.1).
#[derive(Debug, Clone, Copy, Default)]
pub struct Ttl(pub Option<Duration>);

/// The Store Adapter contract (§4.1). Implementations own serialization and
/// the fixed path schema; the core never constructs a path itself outside
/// of this trait's implementors.
#[async_trait]
pub trait IamStore: Send + Sync {
    async fn load_policy_doc(&self, name: &str) -> IamResult<PolicyDocument>;
    async fn load_policy_docs(&self) -> IamResult<Vec<PolicyDocument>>;

    async fn get_user_credentials(
        &self,
        access_key: &str,
        kind: MappingKind,
    ) -> IamResult<UserIdentity>;
    async fn load_users(&self, kind: MappingKind) -> IamResult<Vec<UserIdentity>>;

    async fn get_group_info(&self, name: &str) -> IamResult<GroupInfo>;
    async fn load_groups(&self) -> IamResult<Vec<GroupInfo>>;

    async fn get_mapped_policy(
        &self,
        name: &str,
        kind: MappingKind,
    ) -> IamResult<MappedPolicy>;
    async fn load_mapped_policies(&self, kind: MappingKind) -> IamResult<Vec<(String, MappedPolicy)>>;

    async fn save_policy_doc(&self, doc: &PolicyDocument) -> IamResult<()>;
    async fn save_user_identity(
        &self,
        identity: &UserIdentity,
        kind: MappingKind,
        ttl: Ttl,
    ) -> IamResult<()>;
    async fn save_group_info(&self, group: &GroupInfo) -> IamResult<()>;
    async fn save_mapped_policy(
        &self,
        name: &str,
        kind: MappingKind,
        mapped: &MappedPolicy,
        ttl: Ttl,
    ) -> IamResult<()>;

    /// Idempotent: absence is reported as `NoSuchPolicy`, not propagated as
    /// a hard failure, so callers can suppress it for idempotency (§4.1).
    async fn delete_policy_doc(&self, name: &str) -> IamResult<()>;
    async fn delete_user_identity(&self, access_key: &str, kind: MappingKind) -> IamResult<()>;
    async fn delete_group_info(&self, name: &str) -> IamResult<()>;
    async fn delete_mapped_policy(&self, name: &str, kind: MappingKind) -> IamResult<()>;

    /// Idempotent format upgrade to version 1 (§4.5 step 2).
    async fn migrate_backend_format(&self) -> IamResult<()>;
}

/// Coarse, store-scoped reader/writer lock (§4.1, §5). One instance is
/// shared by the whole `IamSys`; it is orthogonal to the Identity Cache
/// mutex and must never be held across a cache-mutex acquisition.
#[derive(Default)]
pub struct StoreLock(RwLock<()>);

impl StoreLock {
    pub fn new() -> Self {
        Self(RwLock::new(()))
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, ()> {
        self.0.write().await
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, ()> {
        self.0.read().await
    }
}
