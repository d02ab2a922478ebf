//! Identity → device token registry.
//!
//! A token belongs to at most one identity at a time. Every mutation runs
//! under one write lock: the in-memory change is applied, written to the
//! backing store, and undone if the store rejects it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::error::{RelayError, require_non_empty};
use crate::storage::{Record, RecordKey, RegistryStore, StoreError, StoreWrite};

use super::types::{DeviceToken, Identity, Platform, TokenSet, token_prefix};

/// Result of reporting a failed push for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The token is not registered (already removed or never seen).
    Unknown,
    /// Failure recorded; holds the consecutive failure count.
    Counted(u32),
    /// The failure threshold was exceeded and the token was unregistered
    /// from this identity.
    Evicted(Identity),
}

#[derive(Debug, Clone)]
struct TokenOwner {
    identity: Identity,
    /// Consecutive push failures. In memory only.
    failures: u32,
}

/// State needed to undo one mutation.
struct Undo {
    sets: Vec<(Identity, Option<TokenSet>)>,
    token: String,
    owner: Option<TokenOwner>,
}

#[derive(Default)]
struct DeviceIndex {
    by_identity: HashMap<Identity, TokenSet>,
    owners: HashMap<String, TokenOwner>,
}

impl DeviceIndex {
    fn snapshot(&self, token: &str, identities: &[&str]) -> Undo {
        Undo {
            sets: identities
                .iter()
                .map(|id| ((*id).to_string(), self.by_identity.get(*id).cloned()))
                .collect(),
            token: token.to_string(),
            owner: self.owners.get(token).cloned(),
        }
    }

    fn restore(&mut self, undo: Undo) {
        for (identity, set) in undo.sets {
            match set {
                Some(set) => {
                    self.by_identity.insert(identity, set);
                }
                None => {
                    self.by_identity.remove(&identity);
                }
            }
        }
        match undo.owner {
            Some(owner) => {
                self.owners.insert(undo.token, owner);
            }
            None => {
                self.owners.remove(&undo.token);
            }
        }
    }

    /// Remove a token from whichever identity holds it. The identity keeps
    /// its (possibly empty) entry.
    fn detach(&mut self, token: &str) -> Option<Identity> {
        let owner = self.owners.remove(token)?;
        if let Some(set) = self.by_identity.get_mut(&owner.identity) {
            set.remove(token);
        }
        Some(owner.identity)
    }

    fn attach(&mut self, identity: &str, device: DeviceToken) {
        self.owners.insert(
            device.token.clone(),
            TokenOwner {
                identity: identity.to_string(),
                failures: 0,
            },
        );
        self.by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(device);
    }

    /// The store write that mirrors the current token set of `identity`.
    fn write_for(&self, identity: &str) -> StoreWrite {
        let key = RecordKey::Device(identity.to_string());
        match self.by_identity.get(identity) {
            Some(set) if !set.is_empty() => StoreWrite::Put(key, Record::Devices(set.to_vec())),
            _ => StoreWrite::Delete(key),
        }
    }
}

/// Thread-safe registry of device tokens keyed by identity.
pub struct DeviceRegistry {
    index: RwLock<DeviceIndex>,
    store: Arc<dyn RegistryStore>,
    max_push_failures: u32,
}

impl DeviceRegistry {
    pub const DEFAULT_MAX_PUSH_FAILURES: u32 = 5;

    /// Create an empty registry writing through to `store`.
    pub fn new(store: Arc<dyn RegistryStore>, max_push_failures: u32) -> Self {
        Self {
            index: RwLock::new(DeviceIndex::default()),
            store,
            max_push_failures,
        }
    }

    /// Rebuild the registry from the device records in `store`.
    ///
    /// A token stored under several identities ends up with the one loaded
    /// last. The records of identities that lost a token are rewritten
    /// before the registry is returned.
    pub async fn load(
        store: Arc<dyn RegistryStore>,
        max_push_failures: u32,
    ) -> Result<Self, StoreError> {
        let mut index = DeviceIndex::default();
        let mut stale = BTreeSet::new();

        for (key, record) in store.load_all().await? {
            let (RecordKey::Device(identity), Record::Devices(tokens)) = (key, record) else {
                continue;
            };
            for device in tokens {
                match index.detach(&device.token) {
                    Some(previous) if previous != identity => {
                        warn!(
                            token_prefix = %token_prefix(&device.token),
                            previous = %previous,
                            identity = %identity,
                            "Token stored under two identities, keeping the later one"
                        );
                        stale.insert(previous);
                    }
                    _ => {}
                }
                index.attach(&identity, device);
            }
            index.by_identity.entry(identity).or_default();
        }

        if !stale.is_empty() {
            let writes: Vec<StoreWrite> = stale.iter().map(|id| index.write_for(id)).collect();
            store.write_batch(&writes).await?;
            warn!(identities = stale.len(), "Rewrote device records with duplicate tokens");
        }

        info!(
            identities = index.by_identity.len(),
            tokens = index.owners.len(),
            "Device registry loaded"
        );

        Ok(Self {
            index: RwLock::new(index),
            store,
            max_push_failures,
        })
    }

    /// Register `token` for `identity`.
    ///
    /// Idempotent. A token held by another identity is moved, and both
    /// identities' records are written in one batch. Re-registering resets
    /// the token's failure count.
    #[instrument(skip(self, token), fields(token_prefix = %token_prefix(token)))]
    pub async fn register(
        &self,
        identity: &str,
        token: &str,
        platform: Platform,
    ) -> Result<(), RelayError> {
        require_non_empty("identity", identity)?;
        require_non_empty("token", token)?;

        let mut index = self.index.write().await;

        let previous = index.owners.get(token).map(|o| o.identity.clone());
        let unchanged = previous.as_deref() == Some(identity)
            && index
                .by_identity
                .get(identity)
                .and_then(|set| set.platform_of(token))
                == Some(platform);
        if unchanged {
            if let Some(owner) = index.owners.get_mut(token) {
                owner.failures = 0;
            }
            debug!("Token already registered");
            return Ok(());
        }

        let mut touched = vec![identity];
        if let Some(prev) = previous.as_deref().filter(|prev| *prev != identity) {
            touched.push(prev);
        }

        let undo = index.snapshot(token, &touched);
        index.detach(token);
        index.attach(identity, DeviceToken::new(token, platform));

        let writes: Vec<StoreWrite> = touched.iter().map(|id| index.write_for(id)).collect();
        if let Err(e) = self.commit(&writes).await {
            index.restore(undo);
            warn!(error = %e, "Failed to persist device registration, rolled back");
            return Err(e.into());
        }

        match previous {
            Some(prev) if prev != identity => {
                info!(previous = %prev, platform = %platform, "Device token moved to new identity");
            }
            Some(_) => debug!(platform = %platform, "Device token platform updated"),
            None => info!(platform = %platform, "Device token registered"),
        }
        Ok(())
    }

    /// Remove `token` from whichever identity holds it.
    ///
    /// Returns that identity, or `None` if the token was unknown.
    #[instrument(skip(self, token), fields(token_prefix = %token_prefix(token)))]
    pub async fn unregister(&self, token: &str) -> Result<Option<Identity>, RelayError> {
        require_non_empty("token", token)?;

        let mut index = self.index.write().await;
        let removed = self.remove_locked(&mut index, token).await?;
        match &removed {
            Some(identity) => info!(identity = %identity, "Device token unregistered"),
            None => debug!("Device token not found (already removed)"),
        }
        Ok(removed)
    }

    /// Token set of `identity`; empty when the identity is unknown.
    pub async fn lookup(&self, identity: &str) -> TokenSet {
        self.index
            .read()
            .await
            .by_identity
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Token sets of several identities, read under one lock.
    pub async fn lookup_many<S: AsRef<str>>(&self, identities: &[S]) -> Vec<TokenSet> {
        let index = self.index.read().await;
        identities
            .iter()
            .map(|id| {
                index
                    .by_identity
                    .get(id.as_ref())
                    .cloned()
                    .unwrap_or_default()
            })
            .collect()
    }

    /// Identity currently holding `token`.
    pub async fn owner_of(&self, token: &str) -> Option<Identity> {
        self.index
            .read()
            .await
            .owners
            .get(token)
            .map(|o| o.identity.clone())
    }

    /// Record a failed push to `token`, unregistering it once the count
    /// exceeds the configured threshold.
    pub async fn record_push_failure(&self, token: &str) -> Result<FailureOutcome, RelayError> {
        let mut index = self.index.write().await;

        let Some(owner) = index.owners.get_mut(token) else {
            return Ok(FailureOutcome::Unknown);
        };
        owner.failures = owner.failures.saturating_add(1);
        let failures = owner.failures;

        if failures <= self.max_push_failures {
            debug!(
                token_prefix = %token_prefix(token),
                failures,
                "Push failure recorded"
            );
            return Ok(FailureOutcome::Counted(failures));
        }

        match self.remove_locked(&mut index, token).await? {
            Some(identity) => {
                warn!(
                    token_prefix = %token_prefix(token),
                    identity = %identity,
                    failures,
                    "Too many push failures, device token dropped"
                );
                Ok(FailureOutcome::Evicted(identity))
            }
            None => Ok(FailureOutcome::Unknown),
        }
    }

    /// Reset the failure count of `token` after a successful push.
    pub async fn record_push_success(&self, token: &str) {
        if let Some(owner) = self.index.write().await.owners.get_mut(token) {
            owner.failures = 0;
        }
    }

    /// Consecutive failure count of `token`, if registered.
    pub async fn failure_count(&self, token: &str) -> Option<u32> {
        self.index
            .read()
            .await
            .owners
            .get(token)
            .map(|o| o.failures)
    }

    /// Number of identities with an entry (including empty ones).
    pub async fn identity_count(&self) -> usize {
        self.index.read().await.by_identity.len()
    }

    /// Number of registered tokens.
    pub async fn token_count(&self) -> usize {
        self.index.read().await.owners.len()
    }

    async fn remove_locked(
        &self,
        index: &mut DeviceIndex,
        token: &str,
    ) -> Result<Option<Identity>, RelayError> {
        let Some(identity) = index.owners.get(token).map(|o| o.identity.clone()) else {
            return Ok(None);
        };

        let undo = index.snapshot(token, &[identity.as_str()]);
        index.detach(token);

        let write = index.write_for(&identity);
        if let Err(e) = self.commit(std::slice::from_ref(&write)).await {
            index.restore(undo);
            warn!(error = %e, "Failed to persist device removal, rolled back");
            return Err(e.into());
        }
        Ok(Some(identity))
    }

    async fn commit(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        match writes {
            [StoreWrite::Put(key, record)] => self.store.persist(key, record).await,
            [StoreWrite::Delete(key)] => self.store.delete(key).await,
            _ => self.store.write_batch(writes).await,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn registry() -> (DeviceRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = DeviceRegistry::new(
            Arc::clone(&store) as Arc<dyn RegistryStore>,
            DeviceRegistry::DEFAULT_MAX_PUSH_FAILURES,
        );
        (registry, store)
    }

    #[tokio::test]
    async fn register_then_lookup_contains_token() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();

        let set = devices.lookup("id-a").await;
        assert!(set.contains("t1"));
        assert_eq!(set.platform_of("t1"), Some(Platform::Android));
    }

    #[tokio::test]
    async fn register_twice_is_idempotent() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        let once = devices.lookup("id-a").await;

        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        assert_eq!(devices.lookup("id-a").await, once);
        assert_eq!(devices.token_count().await, 1);
    }

    #[tokio::test]
    async fn register_moves_token_between_identities() {
        let (devices, store) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        devices.register("id-b", "t1", Platform::Android).await.unwrap();

        assert!(!devices.lookup("id-a").await.contains("t1"));
        assert!(devices.lookup("id-b").await.contains("t1"));
        assert_eq!(devices.owner_of("t1").await.as_deref(), Some("id-b"));

        // The emptied identity's record is gone from the store.
        assert!(
            store
                .load(&RecordKey::Device("id-a".into()))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn register_updates_platform() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Unknown).await.unwrap();
        devices.register("id-a", "t1", Platform::Ios).await.unwrap();

        let set = devices.lookup("id-a").await;
        assert_eq!(set.len(), 1);
        assert_eq!(set.platform_of("t1"), Some(Platform::Ios));
    }

    #[tokio::test]
    async fn register_rejects_empty_fields() {
        let (devices, _) = registry();
        let err = devices.register("", "t1", Platform::Unknown).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(ref m) if m.contains("identity")));
        let err = devices.register("id-a", "", Platform::Unknown).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(ref m) if m.contains("token")));
        assert_eq!(devices.identity_count().await, 0);
    }

    #[tokio::test]
    async fn unregister_reports_previous_owner() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        devices.register("id-a", "t2", Platform::Android).await.unwrap();

        let owner = devices.unregister("t2").await.unwrap();
        assert_eq!(owner.as_deref(), Some("id-a"));

        let set = devices.lookup("id-a").await;
        assert_eq!(set.len(), 1);
        assert!(!set.contains("t2"));
        assert!(devices.owner_of("t2").await.is_none());
    }

    #[tokio::test]
    async fn unregister_unknown_token_is_noop() {
        let (devices, _) = registry();
        assert_eq!(devices.unregister("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn lookup_unknown_identity_is_empty() {
        let (devices, _) = registry();
        assert!(devices.lookup("nobody").await.is_empty());
    }

    #[tokio::test]
    async fn identity_entry_survives_losing_all_tokens() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        devices.unregister("t1").await.unwrap();

        assert!(devices.lookup("id-a").await.is_empty());
        assert_eq!(devices.identity_count().await, 1);
    }

    #[tokio::test]
    async fn failed_store_write_rolls_back_register() {
        let (devices, store) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        let before_a = devices.lookup("id-a").await;

        store.set_unavailable(true);
        let err = devices.register("id-b", "t1", Platform::Ios).await.unwrap_err();
        assert!(matches!(err, RelayError::StorageUnavailable(_)));

        assert_eq!(devices.lookup("id-a").await, before_a);
        assert!(devices.lookup("id-b").await.is_empty());
        assert_eq!(devices.owner_of("t1").await.as_deref(), Some("id-a"));
        assert_eq!(devices.identity_count().await, 1);
    }

    #[tokio::test]
    async fn failed_store_write_rolls_back_unregister() {
        let (devices, store) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();

        store.set_unavailable(true);
        assert!(devices.unregister("t1").await.is_err());
        assert!(devices.lookup("id-a").await.contains("t1"));
        assert_eq!(devices.owner_of("t1").await.as_deref(), Some("id-a"));
    }

    #[tokio::test]
    async fn failures_evict_after_threshold() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();

        assert_eq!(
            devices.record_push_failure("t1").await.unwrap(),
            FailureOutcome::Counted(1)
        );
        for _ in 0..4 {
            devices.record_push_failure("t1").await.unwrap();
        }
        assert_eq!(devices.failure_count("t1").await, Some(5));
        assert!(devices.lookup("id-a").await.contains("t1"));

        assert_eq!(
            devices.record_push_failure("t1").await.unwrap(),
            FailureOutcome::Evicted("id-a".into())
        );
        assert!(!devices.lookup("id-a").await.contains("t1"));
        assert_eq!(
            devices.record_push_failure("t1").await.unwrap(),
            FailureOutcome::Unknown
        );
    }

    #[tokio::test]
    async fn register_and_success_reset_failures() {
        let (devices, _) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        for _ in 0..3 {
            devices.record_push_failure("t1").await.unwrap();
        }
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        assert_eq!(devices.failure_count("t1").await, Some(0));

        devices.record_push_failure("t1").await.unwrap();
        devices.record_push_success("t1").await;
        assert_eq!(devices.failure_count("t1").await, Some(0));
    }

    #[tokio::test]
    async fn load_rebuilds_from_store() {
        let (devices, store) = registry();
        devices.register("id-a", "t1", Platform::Android).await.unwrap();
        devices.register("id-b", "t2", Platform::Ios).await.unwrap();

        let reloaded = DeviceRegistry::load(
            Arc::clone(&store) as Arc<dyn RegistryStore>,
            DeviceRegistry::DEFAULT_MAX_PUSH_FAILURES,
        )
        .await
        .unwrap();
        assert_eq!(reloaded.lookup("id-a").await, devices.lookup("id-a").await);
        assert_eq!(reloaded.lookup("id-b").await, devices.lookup("id-b").await);
        assert_eq!(reloaded.owner_of("t2").await.as_deref(), Some("id-b"));
    }

    #[tokio::test]
    async fn load_resolves_duplicate_tokens() {
        let store = Arc::new(MemoryStore::new());
        let dup = |t: &str| Record::Devices(vec![DeviceToken::new(t, Platform::Android)]);
        store
            .persist(&RecordKey::Device("id-a".into()), &dup("t1"))
            .await
            .unwrap();
        store
            .persist(&RecordKey::Device("id-b".into()), &dup("t1"))
            .await
            .unwrap();

        let devices = DeviceRegistry::load(store, 5).await.unwrap();
        assert_eq!(devices.token_count().await, 1);
        assert!(!devices.lookup("id-a").await.contains("t1"));
        assert!(devices.lookup("id-b").await.contains("t1"));
    }

    #[tokio::test]
    async fn duplicate_token_stays_gone_after_unregister_and_reload() {
        let store = Arc::new(MemoryStore::new());
        let shared = Arc::clone(&store) as Arc<dyn RegistryStore>;
        let record = Record::Devices(vec![DeviceToken::new("t1", Platform::Android)]);
        store
            .persist(&RecordKey::Device("id-a".into()), &record)
            .await
            .unwrap();
        store
            .persist(&RecordKey::Device("id-b".into()), &record)
            .await
            .unwrap();

        let devices = DeviceRegistry::load(Arc::clone(&shared), 5).await.unwrap();
        assert!(
            store
                .load(&RecordKey::Device("id-a".into()))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(devices.unregister("t1").await.unwrap().as_deref(), Some("id-b"));

        let reloaded = DeviceRegistry::load(shared, 5).await.unwrap();
        assert_eq!(reloaded.owner_of("t1").await, None);
        assert!(reloaded.lookup("id-a").await.is_empty());
        assert_eq!(reloaded.token_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_registers_leave_one_owner() {
        let (devices, _) = registry();
        let devices = Arc::new(devices);

        let mut handles = Vec::new();
        for i in 0..32 {
            let devices = Arc::clone(&devices);
            handles.push(tokio::spawn(async move {
                devices
                    .register(&format!("id-{i}"), "shared", Platform::Android)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let ids: Vec<String> = (0..32).map(|i| format!("id-{i}")).collect();
        let holders = devices
            .lookup_many(&ids)
            .await
            .iter()
            .filter(|set| set.contains("shared"))
            .count();
        assert_eq!(holders, 1);

        let owner = devices.owner_of("shared").await.unwrap();
        assert!(devices.lookup(&owner).await.contains("shared"));
    }
}
