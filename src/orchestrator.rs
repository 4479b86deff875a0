//! Mutation Orchestrator (§4.3): every public write operation follows the
//! same discipline — check initialized, acquire the store write lock,
//! reload whatever slice is needed to validate inputs, write through the
//! store, then apply the cache delta before releasing the lock. Cascades
//! that need to call back into another orchestrator method release the
//! lock first and let that method re-acquire it (§5's nesting rule).

use crate::domain::claims::{Claims, SessionPolicy, PARENT_CLAIM, SA_POLICY_CLAIM, SESSION_POLICY_CLAIM};
use crate::domain::group::{GroupInfo, GroupStatus};
use crate::domain::mapping::{MappedPolicy, MappingKind};
use crate::domain::policy::PolicyNameSet;
use crate::domain::user::{AccountStatus, Credentials, PrincipalKind, UserIdentity};
use crate::domain::PolicyDocument;
use crate::error::{IamError, IamResult};
use crate::store::Ttl;
use crate::sys::IamSys;
use serde_json::Value;
use tracing::instrument;

/// Optional fields for `NewServiceAccount` (§4.3).
#[derive(Default)]
pub struct NewServiceAccountOpts {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub session_policy: Option<SessionPolicy>,
}

/// Optional fields for `UpdateServiceAccount` (§4.3).
#[derive(Default)]
pub struct UpdateServiceAccountOpts {
    pub secret_key: Option<String>,
    pub status: Option<AccountStatus>,
    pub session_policy: Option<SessionPolicy>,
}

impl IamSys {
    #[instrument(skip(self, policy), fields(name = %name))]
    pub async fn set_policy(&self, name: &str, policy: PolicyDocument) -> IamResult<()> {
        self.check_initialized()?;
        if name.is_empty() || policy.statement.is_empty() {
            return Err(IamError::InvalidArgument(
                "policy name and statement must be non-empty".to_string(),
            ));
        }
        let _guard = self.lock.write().await;
        self.store.save_policy_doc(&policy).await?;
        let mut cache = self.cache.lock().await;
        cache.policies.insert(name.to_string(), policy);
        Ok(())
    }

    /// `DeletePolicy` (§4.3): delete the doc, then rewrite every mapping
    /// that referenced it. The rewrite goes through `policy_db_set_kind`,
    /// which takes its own store-lock, so the delete's own lock is
    /// released first.
    #[instrument(skip(self), fields(name = %name))]
    pub async fn delete_policy(&self, name: &str) -> IamResult<()> {
        self.check_initialized()?;
        if name.is_empty() {
            return Err(IamError::InvalidArgument("policy name must be non-empty".to_string()));
        }
        {
            let _guard = self.lock.write().await;
            match self.store.delete_policy_doc(name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            let mut cache = self.cache.lock().await;
            cache.policies.remove(name);
        }

        let user_mappings = self.store.load_mapped_policies(MappingKind::User).await.unwrap_or_default();
        let sts_mappings = self.store.load_mapped_policies(MappingKind::StsUser).await.unwrap_or_default();
        let group_mappings = self.store.load_mapped_policies(MappingKind::Group).await.unwrap_or_default();

        for (principal, mapped) in user_mappings {
            let mut names = mapped.names();
            if names.remove(name) {
                self.policy_db_set_kind(&principal, &names.to_joined_string(), MappingKind::User)
                    .await?;
            }
        }
        for (principal, mapped) in sts_mappings {
            let mut names = mapped.names();
            if names.remove(name) {
                self.policy_db_set_kind(&principal, &names.to_joined_string(), MappingKind::StsUser)
                    .await?;
            }
        }
        for (principal, mapped) in group_mappings {
            let mut names = mapped.names();
            if names.remove(name) {
                self.policy_db_set_kind(&principal, &names.to_joined_string(), MappingKind::Group)
                    .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, credentials), fields(access_key = %access_key))]
    pub async fn create_user(
        &self,
        access_key: &str,
        mut credentials: Credentials,
        policy_name: Option<&str>,
    ) -> IamResult<()> {
        self.check_initialized()?;
        if self.directory_mode {
            return Err(IamError::InvalidArgument(
                "CreateUser is forbidden in directory mode".to_string(),
            ));
        }
        if access_key.is_empty() {
            return Err(IamError::InvalidArgument("access key must be non-empty".to_string()));
        }
        credentials.access_key = access_key.to_string();

        {
            let _guard = self.lock.write().await;
            if self.store.get_user_credentials(access_key, MappingKind::StsUser).await.is_ok() {
                return Err(IamError::InvalidArgument(format!(
                    "{access_key} is already occupied by an STS principal"
                )));
            }
            let identity = UserIdentity::new(credentials, PrincipalKind::Regular);
            self.store.save_user_identity(&identity, MappingKind::User, Ttl::default()).await?;
            let mut cache = self.cache.lock().await;
            cache.users.insert((access_key.to_string(), MappingKind::User), identity);
        }

        if let Some(policy) = policy_name.filter(|p| !p.is_empty()) {
            self.policy_db_set(access_key, policy, false).await?;
        }
        Ok(())
    }

    #[instrument(skip(self, credentials), fields(access_key = %access_key))]
    pub async fn set_temp_user(
        &self,
        access_key: &str,
        mut credentials: Credentials,
        policy_name: Option<&str>,
    ) -> IamResult<()> {
        self.check_initialized()?;
        credentials.access_key = access_key.to_string();
        let ttl = Ttl(credentials.expiration.map(|expiration| {
            (expiration - chrono::Utc::now()).to_std().unwrap_or_default()
        }));
        let has_external_evaluator = self.evaluator.external.is_some();

        let _guard = self.lock.write().await;
        if !has_external_evaluator {
            if let Some(policy) = policy_name.filter(|p| !p.is_empty()) {
                let names = PolicyNameSet::parse(policy);
                for name in names.iter() {
                    self.store.load_policy_doc(name).await?;
                }
                if names.is_empty() {
                    return Err(IamError::InvalidArgument(
                        "resolved policy must be non-empty".to_string(),
                    ));
                }
                let mapped = MappedPolicy::from_set(&names);
                self.store
                    .save_mapped_policy(access_key, MappingKind::StsUser, &mapped, ttl)
                    .await?;
                let mut cache = self.cache.lock().await;
                cache.mappings.insert((access_key.to_string(), MappingKind::StsUser), mapped);
            }
        }

        let identity = UserIdentity::new(credentials, PrincipalKind::Sts);
        self.store.save_user_identity(&identity, MappingKind::StsUser, ttl).await?;
        let mut cache = self.cache.lock().await;
        cache.users.insert((access_key.to_string(), MappingKind::StsUser), identity);
        Ok(())
    }

    #[instrument(skip(self), fields(access_key = %access_key))]
    pub async fn set_user_status(&self, access_key: &str, status: AccountStatus) -> IamResult<()> {
        self.check_initialized()?;
        let _guard = self.lock.write().await;
        let mut identity = self.store.get_user_credentials(access_key, MappingKind::User).await?;
        if identity.kind != PrincipalKind::Regular {
            return Err(IamError::InvalidArgument(
                "SetUserStatus only applies to regular users".to_string(),
            ));
        }
        identity.credentials.status = status;
        self.store.save_user_identity(&identity, MappingKind::User, Ttl::default()).await?;
        let mut cache = self.cache.lock().await;
        cache.users.insert((access_key.to_string(), MappingKind::User), identity);
        Ok(())
    }

    #[instrument(skip(self, secret_key), fields(access_key = %access_key))]
    pub async fn set_user_secret_key(&self, access_key: &str, secret_key: &str) -> IamResult<()> {
        self.check_initialized()?;
        if secret_key.is_empty() {
            return Err(IamError::InvalidArgument("secret key must be non-empty".to_string()));
        }
        let _guard = self.lock.write().await;
        let mut identity = self.store.get_user_credentials(access_key, MappingKind::User).await?;
        if identity.kind != PrincipalKind::Regular {
            return Err(IamError::InvalidArgument(
                "SetUserSecretKey only applies to regular users".to_string(),
            ));
        }
        identity.credentials.secret_key = secret_key.to_string();
        self.store.save_user_identity(&identity, MappingKind::User, Ttl::default()).await?;
        let mut cache = self.cache.lock().await;
        cache.users.insert((access_key.to_string(), MappingKind::User), identity);
        Ok(())
    }

    /// `DeleteUser` (§4.3): group membership, service accounts and STS
    /// users are cascaded through their own orchestrator methods (each
    /// acquiring its own lock) before the identity itself is removed.
    #[instrument(skip(self), fields(access_key = %access_key))]
    pub async fn delete_user(&self, access_key: &str) -> IamResult<()> {
        self.check_initialized()?;
        {
            let identity = self.store.get_user_credentials(access_key, MappingKind::User).await?;
            if identity.kind != PrincipalKind::Regular {
                return Err(IamError::InvalidArgument(
                    "DeleteUser only applies to regular users".to_string(),
                ));
            }
        }

        let groups = self.store.load_groups().await.unwrap_or_default();
        for group in &groups {
            if group.members.contains(access_key) {
                self.remove_users_from_group(&group.name, &[access_key.to_string()]).await?;
            }
        }

        let service_accounts = self.store.load_users(MappingKind::ServiceAccount).await.unwrap_or_default();
        for sa in service_accounts {
            if sa.credentials.parent_user.as_deref() == Some(access_key) {
                self.delete_service_account(&sa.credentials.access_key).await?;
            }
        }

        let sts_users = self.store.load_users(MappingKind::StsUser).await.unwrap_or_default();
        for sts in sts_users {
            if sts.credentials.parent_user.as_deref() == Some(access_key) {
                self.delete_sts_user(&sts.credentials.access_key).await?;
            }
        }

        let _guard = self.lock.write().await;
        match self.store.delete_mapped_policy(access_key, MappingKind::User).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        match self.store.delete_user_identity(access_key, MappingKind::User).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut cache = self.cache.lock().await;
        cache.mappings.remove(&(access_key.to_string(), MappingKind::User));
        cache.users.remove(&(access_key.to_string(), MappingKind::User));
        Ok(())
    }

    async fn delete_sts_user(&self, access_key: &str) -> IamResult<()> {
        let _guard = self.lock.write().await;
        match self.store.delete_mapped_policy(access_key, MappingKind::StsUser).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        match self.store.delete_user_identity(access_key, MappingKind::StsUser).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut cache = self.cache.lock().await;
        cache.mappings.remove(&(access_key.to_string(), MappingKind::StsUser));
        cache.users.remove(&(access_key.to_string(), MappingKind::StsUser));
        Ok(())
    }

    /// `NewServiceAccount` (§4.3): validates the parent, builds the claim
    /// set, signs a session token and persists the resulting identity.
    #[instrument(skip(self, groups, opts), fields(parent = %parent))]
    pub async fn new_service_account(
        &self,
        parent: &str,
        groups: Vec<String>,
        opts: NewServiceAccountOpts,
    ) -> IamResult<UserIdentity> {
        self.check_initialized()?;

        if let Some(admin) = self.admin_access_key.lock().unwrap_or_else(|e| e.into_inner()).clone() {
            if admin == parent {
                return Err(IamError::InvalidArgument(
                    "parent may not be the server's administrative access key".to_string(),
                ));
            }
        }
        if self.store.get_user_credentials(parent, MappingKind::ServiceAccount).await.is_ok() {
            return Err(IamError::InvalidArgument(
                "parent may not itself be a service account".to_string(),
            ));
        }

        if self.directory_mode {
            let has_user_mapping = self.store.get_mapped_policy(parent, MappingKind::User).await.is_ok()
                || self.store.get_mapped_policy(parent, MappingKind::StsUser).await.is_ok();
            let mut has_group_mapping = false;
            for group in &groups {
                if self.store.get_mapped_policy(group, MappingKind::Group).await.is_ok() {
                    has_group_mapping = true;
                    break;
                }
            }
            if !has_user_mapping && !has_group_mapping {
                return Err(IamError::NoSuchUser(parent.to_string()));
            }
        } else {
            let exists = self.store.get_user_credentials(parent, MappingKind::User).await.is_ok()
                || self.store.get_user_credentials(parent, MappingKind::StsUser).await.is_ok();
            if !exists {
                return Err(IamError::NoSuchUser(parent.to_string()));
            }
        }

        let mut claims = Claims::new().with(PARENT_CLAIM, Value::String(parent.to_string()));
        if let Some(session_policy) = &opts.session_policy {
            let encoded = Claims::encode_session_policy(session_policy)?;
            claims = claims
                .with(SA_POLICY_CLAIM, Value::String("embedded-policy".to_string()))
                .with(SESSION_POLICY_CLAIM, Value::String(encoded));
        } else {
            claims = claims.with(SA_POLICY_CLAIM, Value::String("inherited-policy".to_string()));
        }
        let session_token = self.signer.sign(&claims)?;

        let access_key = opts.access_key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let secret_key = opts.secret_key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut credentials = Credentials::new(access_key.clone(), secret_key);
        credentials.parent_user = Some(parent.to_string());
        credentials.session_token = Some(session_token);
        let identity = UserIdentity::new(credentials, PrincipalKind::ServiceAccount);

        let _guard = self.lock.write().await;
        self.store
            .save_user_identity(&identity, MappingKind::ServiceAccount, Ttl::default())
            .await?;
        let mut cache = self.cache.lock().await;
        cache
            .users
            .insert((access_key, MappingKind::ServiceAccount), identity.clone());
        Ok(identity)
    }

    #[instrument(skip(self, opts), fields(access_key = %access_key))]
    pub async fn update_service_account(
        &self,
        access_key: &str,
        opts: UpdateServiceAccountOpts,
    ) -> IamResult<()> {
        self.check_initialized()?;
        let _guard = self.lock.write().await;
        let mut identity = self
            .store
            .get_user_credentials(access_key, MappingKind::ServiceAccount)
            .await?;
        if identity.kind != PrincipalKind::ServiceAccount {
            return Err(IamError::InvalidArgument(
                "UpdateServiceAccount only applies to service accounts".to_string(),
            ));
        }

        if let Some(secret) = opts.secret_key {
            if secret.is_empty() {
                return Err(IamError::InvalidArgument("secret key must be non-empty".to_string()));
            }
            identity.credentials.secret_key = secret;
        }
        if let Some(status) = opts.status {
            identity.credentials.status = status;
        }
        if let Some(session_policy) = opts.session_policy {
            let parent = identity
                .credentials
                .parent_user
                .clone()
                .ok_or_else(|| IamError::Internal("service account missing parent".to_string()))?;
            let encoded = Claims::encode_session_policy(&session_policy)?;
            let claims = Claims::new()
                .with(PARENT_CLAIM, Value::String(parent))
                .with(SA_POLICY_CLAIM, Value::String("embedded-policy".to_string()))
                .with(SESSION_POLICY_CLAIM, Value::String(encoded));
            identity.credentials.session_token = Some(self.signer.sign(&claims)?);
        }

        self.store
            .save_user_identity(&identity, MappingKind::ServiceAccount, Ttl::default())
            .await?;
        let mut cache = self.cache.lock().await;
        cache
            .users
            .insert((access_key.to_string(), MappingKind::ServiceAccount), identity);
        Ok(())
    }

    #[instrument(skip(self), fields(access_key = %access_key))]
    pub async fn delete_service_account(&self, access_key: &str) -> IamResult<()> {
        self.check_initialized()?;
        let _guard = self.lock.write().await;
        match self.store.delete_user_identity(access_key, MappingKind::ServiceAccount).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        let mut cache = self.cache.lock().await;
        cache.users.remove(&(access_key.to_string(), MappingKind::ServiceAccount));
        Ok(())
    }

    #[instrument(skip(self, members), fields(group = %group_name))]
    pub async fn add_users_to_group(&self, group_name: &str, members: &[String]) -> IamResult<()> {
        self.check_initialized()?;
        if self.directory_mode {
            return Err(IamError::InvalidArgument(
                "AddUsersToGroup is forbidden in directory mode".to_string(),
            ));
        }
        if members.is_empty() {
            return Err(IamError::InvalidArgument("members must be non-empty".to_string()));
        }

        let _guard = self.lock.write().await;
        for member in members {
            if self.store.get_user_credentials(member, MappingKind::StsUser).await.is_ok() {
                return Err(IamError::InvalidArgument(format!(
                    "{member} is an STS principal and cannot join a group"
                )));
            }
            self.store.get_user_credentials(member, MappingKind::User).await?;
        }

        let mut group = match self.store.get_group_info(group_name).await {
            Ok(group) => group,
            Err(e) if e.is_not_found() => GroupInfo::new(group_name),
            Err(e) => return Err(e),
        };
        group.union_members(members);
        self.store.save_group_info(&group).await?;

        let mut cache = self.cache.lock().await;
        cache.groups.insert(group.name.clone(), group.clone());
        cache.reindex_group(&group);
        Ok(())
    }

    /// `RemoveUsersFromGroup` (§4.3): an empty `members` list means "delete
    /// the group", which is only legal when it's already empty.
    #[instrument(skip(self, members), fields(group = %group_name))]
    pub async fn remove_users_from_group(&self, group_name: &str, members: &[String]) -> IamResult<()> {
        self.check_initialized()?;
        if self.directory_mode {
            return Err(IamError::InvalidArgument(
                "RemoveUsersFromGroup is forbidden in directory mode".to_string(),
            ));
        }

        let _guard = self.lock.write().await;
        let mut group = self.store.get_group_info(group_name).await?;

        if members.is_empty() {
            if !group.is_empty() {
                return Err(IamError::GroupNotEmpty(group_name.to_string()));
            }
            match self.store.delete_mapped_policy(group_name, MappingKind::Group).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            match self.store.delete_group_info(group_name).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            let mut cache = self.cache.lock().await;
            cache.mappings.remove(&(group_name.to_string(), MappingKind::Group));
            cache.groups.remove(group_name);
            cache.remove_group_from_memberships_map(group_name);
            return Ok(());
        }

        group.subtract_members(members);
        self.store.save_group_info(&group).await?;
        let mut cache = self.cache.lock().await;
        cache.groups.insert(group.name.clone(), group.clone());
        cache.reindex_group(&group);
        Ok(())
    }

    #[instrument(skip(self), fields(group = %group_name))]
    pub async fn set_group_status(&self, group_name: &str, enabled: bool) -> IamResult<()> {
        self.check_initialized()?;
        if self.directory_mode {
            return Err(IamError::InvalidArgument(
                "SetGroupStatus is forbidden in directory mode".to_string(),
            ));
        }
        let _guard = self.lock.write().await;
        let mut group = self.store.get_group_info(group_name).await?;
        group.status = if enabled { GroupStatus::Enabled } else { GroupStatus::Disabled };
        self.store.save_group_info(&group).await?;
        let mut cache = self.cache.lock().await;
        cache.groups.insert(group.name.clone(), group);
        Ok(())
    }

    /// `PolicyDBSet` (§4.3): the public entry point, which resolves the
    /// mapping kind from `is_group` and directory mode and delegates to
    /// `policy_db_set_kind`.
    #[instrument(skip(self, policy), fields(name = %name, is_group = is_group))]
    pub async fn policy_db_set(&self, name: &str, policy: &str, is_group: bool) -> IamResult<()> {
        self.check_initialized()?;
        let kind = if is_group {
            MappingKind::Group
        } else {
            MappingKind::for_principal(PrincipalKind::Regular, self.directory_mode)
        };
        self.policy_db_set_kind(name, policy, kind).await
    }

    /// The actual `policyDBSet` helper (§4.3), parameterized over the exact
    /// mapping kind so cascades (e.g. from `DeletePolicy`) can target STS
    /// vs. regular kinds explicitly instead of re-deriving them.
    async fn policy_db_set_kind(&self, name: &str, policy: &str, kind: MappingKind) -> IamResult<()> {
        let _guard = self.lock.write().await;

        if policy.is_empty() {
            match self.store.delete_mapped_policy(name, kind).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
            {
                let mut cache = self.cache.lock().await;
                cache.mappings.remove(&(name.to_string(), kind));
            }
            if self.directory_mode && kind == MappingKind::StsUser {
                match self.store.delete_mapped_policy(name, MappingKind::User).await {
                    Ok(()) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
                let mut cache = self.cache.lock().await;
                cache.mappings.remove(&(name.to_string(), MappingKind::User));
            }
            return Ok(());
        }

        let names = PolicyNameSet::parse(policy);
        for policy_name in names.iter() {
            self.store.load_policy_doc(policy_name).await?;
        }
        let mapped = MappedPolicy::from_set(&names);
        self.store.save_mapped_policy(name, kind, &mapped, Ttl::default()).await?;
        let mut cache = self.cache.lock().await;
        cache.mappings.insert((name.to_string(), kind), mapped);
        Ok(())
    }
}
