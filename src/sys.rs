//! `IamSys`: the single struct every other module hangs off of. Wires the
//! Store Adapter, the Identity Cache, the coarse store lock, the ready
//! signal and the evaluator together, and implements the read-path half of
//! §5's peek-vs-wait rule. Mutations live in `orchestrator.rs` as a second
//! `impl` block on the same type.

use crate::bootstrap::WatchEvent;
use crate::cache::IdentityCache;
use crate::config::Config;
use crate::domain::mapping::MappingKind;
use crate::domain::{GroupInfo, PolicyDocument, UserIdentity};
use crate::error::{IamError, IamResult};
use crate::evaluator::{AuthArgs, Evaluator, ExternalPolicyEvaluator};
use crate::ready::ReadySignal;
use crate::store::{IamStore, StoreLock};
use crate::token::{ClaimsSigner, HmacClaimsSigner};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;

/// The IAM core. Cheap to clone via `Arc<IamSys>` — every field is already
/// interior-mutable or immutable after construction.
pub struct IamSys {
    pub(crate) store: Arc<dyn IamStore>,
    pub(crate) lock: StoreLock,
    pub(crate) cache: IdentityCache,
    pub(crate) ready: ReadySignal,
    pub(crate) directory_mode: bool,
    pub(crate) admin_access_key: std::sync::Mutex<Option<String>>,
    pub(crate) evaluator: Evaluator,
    pub(crate) config: Config,
    pub(crate) signer: Arc<dyn ClaimsSigner>,
    /// Set once the store is constructed (§4.3 step 1's "Store non-nil").
    store_initialized: AtomicBool,
    pub(crate) watcher_tx: std::sync::Mutex<Option<mpsc::Sender<WatchEvent>>>,
}

impl IamSys {
    /// Builds with an HMAC claims signer seeded from `signing_secret`. Pass
    /// a real secret in production; any fixed bytes are fine in tests,
    /// since verification of these tokens is out of scope for the core.
    pub fn new(store: Arc<dyn IamStore>, directory_mode: bool, config: Config, signing_secret: &[u8]) -> Self {
        Self::with_external_evaluator(store, directory_mode, config, signing_secret, None)
    }

    pub fn with_external_evaluator(
        store: Arc<dyn IamStore>,
        directory_mode: bool,
        config: Config,
        signing_secret: &[u8],
        external: Option<Arc<dyn ExternalPolicyEvaluator>>,
    ) -> Self {
        Self {
            store,
            lock: StoreLock::new(),
            cache: IdentityCache::new(),
            ready: ReadySignal::new(),
            directory_mode,
            admin_access_key: std::sync::Mutex::new(None),
            evaluator: Evaluator::new(external),
            config,
            signer: Arc::new(HmacClaimsSigner::new(signing_secret)),
            store_initialized: AtomicBool::new(true),
            watcher_tx: std::sync::Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn IamStore> {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directory_mode(&self) -> bool {
        self.directory_mode
    }

    pub fn is_ready(&self) -> bool {
        self.ready.is_ready()
    }

    pub fn ready_signal(&self) -> &ReadySignal {
        &self.ready
    }

    pub fn set_admin_access_key(&self, key: Option<String>) {
        *self.admin_access_key.lock().unwrap_or_else(|e| e.into_inner()) = key;
    }

    /// §4.3 step 1: the ready signal OR a non-nil store counts as
    /// initialized. Since the store is required at construction, this only
    /// ever fails if a caller deliberately tears it down.
    pub(crate) fn check_initialized(&self) -> IamResult<()> {
        if self.ready.is_ready() || self.store_initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        Err(IamError::ServerNotInitialized)
    }

    /// `IsAllowed` (§4.4), entered through the core so callers never touch
    /// the cache lock or the evaluator directly.
    #[instrument(skip(self, args), fields(account = %args.account, action = %args.action))]
    pub async fn is_allowed(&self, args: &AuthArgs) -> IamResult<bool> {
        self.check_initialized()?;
        let cache = self.cache.lock().await;
        self.evaluator.is_allowed(args, &cache, self.directory_mode).await
    }

    /// `GetUser` (§5): tolerates a cold cache by falling back to a targeted
    /// store load when the ready signal hasn't fired yet.
    pub async fn get_user(&self, access_key: &str) -> IamResult<UserIdentity> {
        self.check_initialized()?;
        if !self.ready.is_ready() {
            if let Ok(identity) = self.load_user_targeted(access_key, MappingKind::User).await {
                return Ok(identity);
            }
        }
        let cache = self.cache.lock().await;
        cache
            .users
            .get(&(access_key.to_string(), MappingKind::User))
            .cloned()
            .ok_or_else(|| IamError::NoSuchUser(access_key.to_string()))
    }

    /// `GetUserInfo`: same peek-or-load tolerance as `get_user`, kept as a
    /// distinct entry point because callers ask for it under a different
    /// name in the interfaces this mirrors.
    pub async fn get_user_info(&self, access_key: &str) -> IamResult<UserIdentity> {
        self.get_user(access_key).await
    }

    async fn load_user_targeted(&self, access_key: &str, kind: MappingKind) -> IamResult<UserIdentity> {
        let identity = self.store.get_user_credentials(access_key, kind).await?;
        let mut cache = self.cache.lock().await;
        cache
            .users
            .insert((access_key.to_string(), kind), identity.clone());
        Ok(identity)
    }

    /// `ListUsers`/`ListPolicies`/`ListGroups`/`ListServiceAccounts` (§5):
    /// block on the ready latch since these need a warm cache to be
    /// meaningful at all.
    pub async fn list_users(&self) -> IamResult<Vec<UserIdentity>> {
        self.check_initialized()?;
        self.ready.wait().await;
        let cache = self.cache.lock().await;
        Ok(cache
            .users
            .iter()
            .filter(|((_, kind), _)| *kind == MappingKind::User)
            .map(|(_, identity)| identity.clone())
            .collect())
    }

    pub async fn list_policies(&self) -> IamResult<Vec<PolicyDocument>> {
        self.check_initialized()?;
        self.ready.wait().await;
        let cache = self.cache.lock().await;
        Ok(cache.policies.values().cloned().collect())
    }

    pub async fn list_groups(&self) -> IamResult<Vec<GroupInfo>> {
        self.check_initialized()?;
        self.ready.wait().await;
        let cache = self.cache.lock().await;
        Ok(cache.groups.values().cloned().collect())
    }

    pub async fn list_service_accounts(&self) -> IamResult<Vec<UserIdentity>> {
        self.check_initialized()?;
        self.ready.wait().await;
        let cache = self.cache.lock().await;
        Ok(cache
            .users
            .iter()
            .filter(|((_, kind), _)| *kind == MappingKind::ServiceAccount)
            .map(|(_, identity)| identity.clone())
            .collect())
    }
}
