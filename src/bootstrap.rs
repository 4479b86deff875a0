//! Bootstrap & Watcher (§4.5): the one-time migration-election/full-load
//! sequence that runs once per process, plus the long-lived watcher that
//! keeps the cache warm afterward.

use crate::cache::CacheInner;
use crate::domain::mapping::MappingKind;
use crate::domain::{GroupInfo, PolicyDocument};
use crate::error::{IamError, IamResult};
use crate::sys::IamSys;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Canned policies auto-installed on first load if absent (§6).
const CANNED_POLICIES: &[(&str, &str)] = &[
    (
        "writeonly",
        "permit(principal, action == Action::\"s3:PutObject\", resource);",
    ),
    (
        "readonly",
        "permit(principal, action == Action::\"s3:GetObject\", resource);",
    ),
    (
        "readwrite",
        "permit(principal, action in [Action::\"s3:GetObject\", Action::\"s3:PutObject\"], resource);",
    ),
    (
        "consoleAdmin",
        "permit(principal, action, resource);",
    ),
];

/// The named distributed lock used to elect a single migrator (§4.5 step
/// 2). Grounded on the reference's `bucket=meta, object=iam-lock` lock,
/// generalized to a trait so the in-tree adapter and a real distributed
/// lock (etcd, object-store conditional put, …) share one seam.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn acquire(&self, timeout: Duration) -> IamResult<bool>;
    async fn release(&self);
}

/// A single-process stand-in for the distributed lock: acquisition always
/// succeeds immediately, since there is only one process to elect. Real
/// deployments plug in an object-store- or etcd-backed implementation.
pub struct LocalDistributedLock {
    held: tokio::sync::Mutex<bool>,
}

impl LocalDistributedLock {
    pub fn new() -> Self {
        Self {
            held: tokio::sync::Mutex::new(false),
        }
    }
}

impl Default for LocalDistributedLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DistributedLock for LocalDistributedLock {
    async fn acquire(&self, _timeout: Duration) -> IamResult<bool> {
        let mut held = self.held.lock().await;
        if *held {
            return Ok(false);
        }
        *held = true;
        Ok(true)
    }

    async fn release(&self) {
        let mut held = self.held.lock().await;
        *held = false;
    }
}

/// Sleep a bounded random fraction of `ceiling` (§4.5 steps 2 and 3).
async fn jittered_backoff(ceiling: Duration) {
    let millis = rand::rng().random_range(0..=ceiling.as_millis() as u64);
    tokio::time::sleep(Duration::from_millis(millis)).await;
}

impl IamSys {
    /// `InitStore`/migration-election/load-loop sequence (§4.5 steps 1-6),
    /// run once by whichever task calls it.
    #[instrument(skip(self, lock))]
    pub async fn bootstrap(self: &Arc<Self>, lock: Arc<dyn DistributedLock>) -> IamResult<CancellationToken> {
        if !self.config().read_only {
            self.run_migration_election(lock.as_ref()).await;
        }

        loop {
            match self.load_all().await {
                Ok(()) => break,
                Err(e) if e.is_retryable() => {
                    warn!(error = %e, "full load failed, retrying");
                    jittered_backoff(Duration::from_secs(5)).await;
                }
                Err(e) => {
                    warn!(error = %e, "full load failed with a terminal error, aborting bootstrap");
                    break;
                }
            }
        }

        self.set_admin_access_key(None);

        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(64);
        let watcher_token = token.clone();
        let watcher_sys = Arc::clone(self);
        tokio::spawn(async move {
            watcher_sys.run_watcher(rx, watcher_token).await;
        });
        self.set_watcher_sender(tx);

        info!("bootstrap complete");
        Ok(token)
    }

    async fn run_migration_election(&self, lock: &dyn DistributedLock) {
        let mut timeout = self.config().lock_initial_timeout();
        loop {
            match lock.acquire(timeout).await {
                Ok(true) => {
                    let result = self.store().migrate_backend_format().await;
                    lock.release().await;
                    match result {
                        Ok(()) => break,
                        Err(e) if e.is_retryable() => {
                            warn!(error = %e, "format migration failed, retrying");
                            continue;
                        }
                        Err(IamError::MaliciousData(reason)) => {
                            tracing::error!(reason = %reason, "malicious data detected during migration, aborting");
                            return;
                        }
                        Err(e) => {
                            warn!(error = %e, "format migration failed, continuing with partial init");
                            return;
                        }
                    }
                }
                Ok(false) => {
                    jittered_backoff(Duration::from_secs(5)).await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to acquire migration lock, retrying");
                    jittered_backoff(Duration::from_secs(5)).await;
                }
            }
            timeout = self.config().lock_reset_timeout();
        }
    }

    /// `loadAll` (§4.5): executed under the store's read lock. Loads every
    /// slice, installs default canned policies, sweeps expired
    /// credentials (cascading to their service accounts), rebuilds the
    /// reverse index, and fires the ready signal exactly once.
    #[instrument(skip(self))]
    pub async fn load_all(&self) -> IamResult<()> {
        let _guard = self.lock.read().await;

        let mut policies = self.store.load_policy_docs().await.unwrap_or_default();
        for (name, statement) in CANNED_POLICIES {
            if !policies.iter().any(|p| p.name == *name) {
                let doc = PolicyDocument::new(*name, *statement);
                self.store.save_policy_doc(&doc).await?;
                policies.push(doc);
            }
        }

        let mut regular_users = Vec::new();
        let mut groups: Vec<GroupInfo> = Vec::new();
        if !self.directory_mode {
            regular_users = self.store.load_users(MappingKind::User).await.unwrap_or_default();
            groups = self.store.load_groups().await.unwrap_or_default();
        }
        let mut service_accounts = self.store.load_users(MappingKind::ServiceAccount).await.unwrap_or_default();
        let mut sts_users = self.store.load_users(MappingKind::StsUser).await.unwrap_or_default();

        let user_mappings = self.store.load_mapped_policies(MappingKind::User).await.unwrap_or_default();
        let sts_mappings = self.store.load_mapped_policies(MappingKind::StsUser).await.unwrap_or_default();
        let sa_mappings = self.store.load_mapped_policies(MappingKind::ServiceAccount).await.unwrap_or_default();
        let group_mappings = self.store.load_mapped_policies(MappingKind::Group).await.unwrap_or_default();

        // Expiration sweep (§4.5, §8 P5): drop expired STS identities from
        // what gets loaded into memory; durable deletion of the STS record
        // itself is deferred to the next cycle, per §5. Service accounts
        // whose parent just expired are deleted durably now, not just
        // dropped from memory, so no orphaned service-account row survives.
        let expired_sts: Vec<String> = sts_users
            .iter()
            .filter(|u| u.credentials.is_expired())
            .map(|u| u.credentials.access_key.clone())
            .collect();
        sts_users.retain(|u| !u.credentials.is_expired());

        let mut orphaned_service_accounts = Vec::new();
        service_accounts.retain(|sa| {
            let orphaned = sa
                .credentials
                .parent_user
                .as_deref()
                .map(|parent| expired_sts.contains(&parent.to_string()))
                .unwrap_or(false);
            if orphaned {
                orphaned_service_accounts.push(sa.credentials.access_key.clone());
            }
            !orphaned
        });
        for access_key in &orphaned_service_accounts {
            match self.store.delete_user_identity(access_key, MappingKind::ServiceAccount).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(error = %e, access_key, "failed to durably delete orphaned service account"),
            }
        }

        {
            let mut cache = self.cache.lock().await;
            apply_full_load(&mut cache, policies, regular_users, &groups, service_accounts, sts_users, user_mappings, sts_mappings, sa_mappings, group_mappings);
        }

        self.ready_signal().set();
        Ok(())
    }

    fn set_watcher_sender(&self, tx: mpsc::Sender<WatchEvent>) {
        *self
            .watcher_tx
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(tx);
    }

    /// Dispatch a targeted reload to the watcher, if one is running.
    pub async fn notify_watcher(&self, event: WatchEvent) {
        let tx = self.watcher_tx.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// The long-lived watcher loop (§4.5): applies targeted reloads as
    /// events arrive, and never terminates on a single reload's failure.
    async fn run_watcher(self: Arc<Self>, mut rx: mpsc::Receiver<WatchEvent>, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("watcher shutting down");
                    return;
                }
                event = rx.recv() => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.apply_watch_event(event).await {
                                warn!(error = %e, "watcher reload failed, continuing");
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    async fn apply_watch_event(&self, event: WatchEvent) -> IamResult<()> {
        match event {
            WatchEvent::Policy(name) => {
                let doc = self.store.load_policy_doc(&name).await?;
                let mut cache = self.cache.lock().await;
                cache.policies.insert(name, doc);
            }
            WatchEvent::User(access_key, kind) => {
                let identity = self.store.get_user_credentials(&access_key, kind).await?;
                let mut cache = self.cache.lock().await;
                cache.users.insert((access_key, kind), identity);
            }
            WatchEvent::Group(name) => {
                let group = self.store.get_group_info(&name).await?;
                let mut cache = self.cache.lock().await;
                cache.groups.insert(name, group.clone());
                cache.reindex_group(&group);
            }
            WatchEvent::PolicyMapping(name, kind) => {
                let mapped = self.store.get_mapped_policy(&name, kind).await?;
                let mut cache = self.cache.lock().await;
                cache.mappings.insert((name, kind), mapped);
            }
        }
        Ok(())
    }
}

/// An external change notification consumed by the watcher (§4.5).
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Policy(String),
    User(String, MappingKind),
    Group(String),
    PolicyMapping(String, MappingKind),
}

#[allow(clippy::too_many_arguments)]
fn apply_full_load(
    cache: &mut CacheInner,
    policies: Vec<PolicyDocument>,
    regular_users: Vec<crate::domain::UserIdentity>,
    groups: &[GroupInfo],
    service_accounts: Vec<crate::domain::UserIdentity>,
    sts_users: Vec<crate::domain::UserIdentity>,
    user_mappings: Vec<(String, crate::domain::MappedPolicy)>,
    sts_mappings: Vec<(String, crate::domain::MappedPolicy)>,
    sa_mappings: Vec<(String, crate::domain::MappedPolicy)>,
    group_mappings: Vec<(String, crate::domain::MappedPolicy)>,
) {
    cache.policies.clear();
    for doc in policies {
        cache.policies.insert(doc.name.clone(), doc);
    }

    cache.users.clear();
    for user in regular_users {
        cache
            .users
            .insert((user.credentials.access_key.clone(), MappingKind::User), user);
    }
    for sa in service_accounts {
        cache
            .users
            .insert((sa.credentials.access_key.clone(), MappingKind::ServiceAccount), sa);
    }
    for sts in sts_users {
        cache
            .users
            .insert((sts.credentials.access_key.clone(), MappingKind::StsUser), sts);
    }

    cache.groups.clear();
    for group in groups {
        cache.groups.insert(group.name.clone(), group.clone());
    }

    cache.mappings.clear();
    for (name, mapped) in user_mappings {
        cache.mappings.insert((name, MappingKind::User), mapped);
    }
    for (name, mapped) in sts_mappings {
        cache.mappings.insert((name, MappingKind::StsUser), mapped);
    }
    for (name, mapped) in sa_mappings {
        cache.mappings.insert((name, MappingKind::ServiceAccount), mapped);
    }
    for (name, mapped) in group_mappings {
        cache.mappings.insert((name, MappingKind::Group), mapped);
    }

    cache.user_groups.clear();
    for group in groups {
        cache.update_group_memberships_map(group);
    }
}
