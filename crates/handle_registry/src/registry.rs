//! Identity registry implementation
//!
//! Keeps the `id → handle` and `handle → id` keys in step. All state lives
//! in the injected store; the registry itself only holds configuration.

use crate::config::RegistryConfig;
use crate::errors::*;
use crate::types::*;
use portfoliofy_storage::KeyValueStore;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct IdentityRegistry {
    store: Arc<dyn KeyValueStore>,
    config: RegistryConfig,
    reserved: HashSet<String>,
}

impl fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("backend", &self.store.backend())
            .field("config", &self.config)
            .finish()
    }
}

impl IdentityRegistry {
    /// Create a registry over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let reserved = config.folded_reserved().collect();
        Ok(Self {
            store,
            config,
            reserved,
        })
    }

    /// Registry with the default reserved list and length limit.
    pub fn with_defaults(store: Arc<dyn KeyValueStore>) -> Self {
        let config = RegistryConfig::default();
        let reserved = config.folded_reserved().collect();
        Self {
            store,
            config,
            reserved,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    /// Case-insensitive reserved-word check. Never touches the store.
    pub fn is_reserved(&self, raw: &str) -> bool {
        self.reserved.contains(&fold_handle(raw))
    }

    /// Key holding the handle bound to `identity`.
    pub fn identity_key(&self, identity: &str) -> String {
        format!("{}:id:{}", self.config.key_prefix, identity)
    }

    /// Key holding the identity bound to `handle`.
    pub fn handle_key(&self, handle: &str) -> String {
        format!("{}:name:{}", self.config.key_prefix, handle)
    }

    /// Whether `raw` could be claimed right now.
    pub async fn is_available(&self, raw: &str) -> Result<Availability> {
        if self.is_reserved(raw) {
            debug!("Handle {:?} is reserved", raw);
            return Ok(Availability::unavailable());
        }
        let Ok(handle) = Handle::parse(raw, self.config.max_handle_length) else {
            return Ok(Availability::unavailable());
        };

        let taken = self
            .store
            .exists(&self.handle_key(handle.as_str()))
            .await
            .map_err(|err| self.store_fault("is_available", err))?;

        Ok(if taken {
            Availability::unavailable()
        } else {
            Availability::available()
        })
    }

    /// Bind `handle` to an identity that has no handle yet.
    ///
    /// The existence checks and the write are separate round-trips. Two
    /// concurrent claims of one handle can both succeed; the later write
    /// owns `handle → id` and the earlier identity is left holding a dangling
    /// `id → handle` key.
    pub async fn claim(&self, identity: &str, handle: &str) -> Result<Outcome> {
        let outcome = self.claim_inner(identity, handle).await;
        record("claim", &outcome);
        outcome
    }

    async fn claim_inner(&self, identity: &str, raw: &str) -> Result<Outcome> {
        if self.is_reserved(raw) {
            return Ok(Rejection::Reserved.into());
        }
        let Some(identity) = Identity::parse(identity) else {
            return Ok(Rejection::InvalidIdentity.into());
        };
        let handle = match Handle::parse(raw, self.config.max_handle_length) {
            Ok(handle) => handle,
            Err(err) => {
                debug!("Rejecting claim of {:?}: {}", raw, err);
                return Ok(Rejection::InvalidHandle.into());
            }
        };

        let handle_key = self.handle_key(handle.as_str());
        let identity_key = self.identity_key(identity.as_str());

        let (handle_taken, identity_bound) = futures::try_join!(
            self.store.exists(&handle_key),
            self.store.exists(&identity_key)
        )
        .map_err(|err| self.store_fault("claim", err))?;

        if handle_taken {
            debug!("Handle {} already taken", handle);
            return Ok(Rejection::Taken.into());
        }
        if identity_bound {
            debug!("Identity {} already holds a handle", identity);
            return Ok(Rejection::AlreadyBound.into());
        }

        let results = self
            .store
            .transaction()
            .set(identity_key.clone(), handle.as_str())
            .set(handle_key.clone(), identity.as_str())
            .exec()
            .await
            .map_err(|err| self.store_fault("claim", err))?;

        if all_succeeded(&results) {
            info!("Claimed handle {} for {}", handle, identity);
            Ok(Outcome::Applied)
        } else {
            warn!(
                identity_key = %identity_key,
                handle_key = %handle_key,
                results = ?results,
                "Partial write while claiming handle {}",
                handle
            );
            Ok(Rejection::PartialWrite.into())
        }
    }

    /// Move an identity's binding to `new_handle`, freeing the old handle.
    ///
    /// Same check-then-act caveat as [`IdentityRegistry::claim`]. Renaming to
    /// the handle the identity already holds is reported as `Taken`.
    pub async fn rename(&self, identity: &str, new_handle: &str) -> Result<Outcome> {
        let outcome = self.rename_inner(identity, new_handle).await;
        record("rename", &outcome);
        outcome
    }

    async fn rename_inner(&self, identity: &str, raw: &str) -> Result<Outcome> {
        if self.is_reserved(raw) {
            return Ok(Rejection::Reserved.into());
        }
        let Some(identity) = Identity::parse(identity) else {
            return Ok(Rejection::InvalidIdentity.into());
        };
        let new_handle = match Handle::parse(raw, self.config.max_handle_length) {
            Ok(handle) => handle,
            Err(err) => {
                debug!("Rejecting rename to {:?}: {}", raw, err);
                return Ok(Rejection::InvalidHandle.into());
            }
        };

        let identity_key = self.identity_key(identity.as_str());
        let Some(current) = self
            .store
            .get(&identity_key)
            .await
            .map_err(|err| self.store_fault("rename", err))?
        else {
            debug!("Identity {} has no handle to rename", identity);
            return Ok(Rejection::NotBound.into());
        };

        let new_key = self.handle_key(new_handle.as_str());
        let taken = self
            .store
            .exists(&new_key)
            .await
            .map_err(|err| self.store_fault("rename", err))?;
        if taken {
            debug!("Handle {} already taken", new_handle);
            return Ok(Rejection::Taken.into());
        }

        let old_key = self.handle_key(&current);
        let results = self
            .store
            .transaction()
            .del(old_key.clone())
            .set(identity_key.clone(), new_handle.as_str())
            .set(new_key.clone(), identity.as_str())
            .exec()
            .await
            .map_err(|err| self.store_fault("rename", err))?;

        if all_succeeded(&results) {
            info!("Renamed {} from {} to {}", identity, current, new_handle);
            Ok(Outcome::Applied)
        } else {
            warn!(
                old_key = %old_key,
                identity_key = %identity_key,
                new_key = %new_key,
                results = ?results,
                "Partial write while renaming {} to {}",
                current,
                new_handle
            );
            Ok(Rejection::PartialWrite.into())
        }
    }

    /// Handle currently bound to `identity`.
    pub async fn lookup_handle(&self, identity: &str) -> Result<Option<Handle>> {
        if Identity::parse(identity).is_none() {
            return Ok(None);
        }
        let value = self
            .store
            .get(&self.identity_key(identity))
            .await
            .map_err(|err| self.store_fault("lookup_handle", err))?;
        Ok(value.map(Handle::from_stored))
    }

    /// Identity currently bound to `handle`. Input is case-folded first.
    pub async fn lookup_identity(&self, handle: &str) -> Result<Option<Identity>> {
        let folded = fold_handle(handle);
        if folded.is_empty() {
            return Ok(None);
        }
        let value = self
            .store
            .get(&self.handle_key(&folded))
            .await
            .map_err(|err| self.store_fault("lookup_identity", err))?;
        Ok(value.and_then(|raw| Identity::parse(&raw)))
    }

    /// Remove a binding addressed from either side. Both keys are deleted in
    /// one batch; the outcome is applied only if both deletes removed a key.
    pub async fn release(&self, key: BindingKey) -> Result<Outcome> {
        let outcome = self.release_inner(key).await;
        record("release", &outcome);
        outcome
    }

    async fn release_inner(&self, key: BindingKey) -> Result<Outcome> {
        let (identity_key, handle_key) = match key {
            BindingKey::Identity(identity) => {
                if Identity::parse(&identity).is_none() {
                    return Ok(Rejection::InvalidIdentity.into());
                }
                let identity_key = self.identity_key(&identity);
                let Some(handle) = self
                    .store
                    .get(&identity_key)
                    .await
                    .map_err(|err| self.store_fault("release", err))?
                else {
                    return Ok(Rejection::NotBound.into());
                };
                (identity_key, self.handle_key(&handle))
            }
            BindingKey::Handle(raw) => {
                let folded = fold_handle(&raw);
                if folded.is_empty() {
                    return Ok(Rejection::InvalidHandle.into());
                }
                let handle_key = self.handle_key(&folded);
                let Some(identity) = self
                    .store
                    .get(&handle_key)
                    .await
                    .map_err(|err| self.store_fault("release", err))?
                else {
                    return Ok(Rejection::NotBound.into());
                };
                (self.identity_key(&identity), handle_key)
            }
        };

        let results = self
            .store
            .transaction()
            .del(identity_key.clone())
            .del(handle_key.clone())
            .exec()
            .await
            .map_err(|err| self.store_fault("release", err))?;

        if all_succeeded(&results) {
            info!("Released binding {} <-> {}", identity_key, handle_key);
            Ok(Outcome::Applied)
        } else {
            warn!(
                identity_key = %identity_key,
                handle_key = %handle_key,
                results = ?results,
                "Partial delete while releasing binding"
            );
            Ok(Rejection::PartialWrite.into())
        }
    }

    fn store_fault(&self, op: &'static str, err: portfoliofy_storage::StoreError) -> RegistryError {
        warn!(
            backend = self.store.backend(),
            "Store failure during {}: {}",
            op,
            err
        );
        RegistryError::StoreUnavailable(err)
    }
}

fn all_succeeded(results: &[bool]) -> bool {
    !results.is_empty() && results.iter().all(|ok| *ok)
}

fn record(op: &'static str, outcome: &Result<Outcome>) {
    let label = match outcome {
        Ok(outcome) => outcome.label(),
        Err(_) => "store_error",
    };
    metrics::counter!("handle_registry_operations_total", "op" => op, "outcome" => label)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use portfoliofy_storage::{BatchOp, MemoryStore, SetOptions, StoreError};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn registry_with(store: MemoryStore) -> IdentityRegistry {
        IdentityRegistry::with_defaults(Arc::new(store))
    }

    /// Wraps a memory store and can be told to fail every call, or to report
    /// the second step of every batch as failed after applying it.
    #[derive(Default)]
    struct FaultyStore {
        inner: MemoryStore,
        offline: AtomicBool,
        fail_second_step: AtomicBool,
    }

    impl FaultyStore {
        fn check(&self) -> portfoliofy_storage::Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                Err(StoreError::Connection("connection refused".into()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl KeyValueStore for FaultyStore {
        fn backend(&self) -> &'static str {
            "faulty"
        }

        async fn get(&self, key: &str) -> portfoliofy_storage::Result<Option<String>> {
            self.check()?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, opts: SetOptions) -> portfoliofy_storage::Result<()> {
            self.check()?;
            self.inner.set(key, value, opts).await
        }

        async fn exists(&self, key: &str) -> portfoliofy_storage::Result<bool> {
            self.check()?;
            self.inner.exists(key).await
        }

        async fn del(&self, key: &str) -> portfoliofy_storage::Result<bool> {
            self.check()?;
            self.inner.del(key).await
        }

        async fn exec_batch(&self, ops: Vec<BatchOp>) -> portfoliofy_storage::Result<Vec<bool>> {
            self.check()?;
            let mut results = self.inner.exec_batch(ops).await?;
            if self.fail_second_step.load(Ordering::SeqCst) && results.len() > 1 {
                results[1] = false;
            }
            Ok(results)
        }
    }

    #[tokio::test]
    async fn test_claim_and_round_trip() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());

        let outcome = registry.claim("a@example.com", "alice").await.unwrap();
        assert_eq!(outcome, Outcome::Applied);

        let handle = registry.lookup_handle("a@example.com").await.unwrap().unwrap();
        assert_eq!(handle.as_str(), "alice");
        let identity = registry.lookup_identity("alice").await.unwrap().unwrap();
        assert_eq!(identity.as_str(), "a@example.com");

        assert_eq!(
            store.keys(),
            vec![
                "user:id:a@example.com".to_string(),
                "user:name:alice".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_reserved_handles_never_touch_store() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());

        for name in ["admin", "API", " Settings ", "signup"] {
            assert_eq!(
                registry.is_available(name).await.unwrap(),
                Availability::unavailable()
            );
            assert_eq!(
                registry.claim("a@example.com", name).await.unwrap(),
                Outcome::Rejected(Rejection::Reserved)
            );
        }
        assert!(store.is_empty());

        // Reserved beats store faults: the check is purely local.
        let faulty = Arc::new(FaultyStore::default());
        faulty.offline.store(true, Ordering::SeqCst);
        let registry = IdentityRegistry::with_defaults(faulty);
        assert_eq!(
            registry.claim("a@example.com", "admin").await.unwrap(),
            Outcome::Rejected(Rejection::Reserved)
        );
        assert!(!registry.is_available("admin").await.unwrap().available);
    }

    #[tokio::test]
    async fn test_uniqueness_keeps_first_owner() {
        let registry = registry_with(MemoryStore::new());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());
        assert_eq!(
            registry.claim("id2", "alice").await.unwrap(),
            Outcome::Rejected(Rejection::Taken)
        );
        assert_eq!(
            registry.claim("id2", "ALICE").await.unwrap(),
            Outcome::Rejected(Rejection::Taken)
        );
        assert_eq!(
            registry.lookup_identity("alice").await.unwrap().unwrap().as_str(),
            "id1"
        );
        assert_eq!(registry.lookup_handle("id2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_claim_when_already_bound_fails() {
        let registry = registry_with(MemoryStore::new());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());
        assert_eq!(
            registry.claim("id1", "alice2").await.unwrap(),
            Outcome::Rejected(Rejection::AlreadyBound)
        );
        assert!(registry.is_available("alice2").await.unwrap().available);
        assert_eq!(
            registry.lookup_handle("id1").await.unwrap().unwrap().as_str(),
            "alice"
        );
    }

    #[tokio::test]
    async fn test_case_folding_is_consistent() {
        let registry = registry_with(MemoryStore::new());
        assert!(registry.claim("fudail@example.com", "FuDaIl").await.unwrap().is_applied());
        assert!(!registry.is_available("fudail").await.unwrap().available);
        assert!(!registry.is_available("FUDAIL").await.unwrap().available);
        assert_eq!(
            registry.lookup_handle("fudail@example.com").await.unwrap().unwrap().as_str(),
            "fudail"
        );
        assert!(registry.lookup_identity("FuDaIl").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_invalid_inputs_are_rejected() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());

        assert_eq!(
            registry.claim("id1", "ab").await.unwrap(),
            Outcome::Rejected(Rejection::InvalidHandle)
        );
        assert_eq!(
            registry.claim("id1", "has space").await.unwrap(),
            Outcome::Rejected(Rejection::InvalidHandle)
        );
        assert_eq!(
            registry.claim("   ", "valid-name").await.unwrap(),
            Outcome::Rejected(Rejection::InvalidIdentity)
        );
        assert!(!registry.is_available("x").await.unwrap().available);
        assert!(!registry.is_available(&"a".repeat(40)).await.unwrap().available);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_rename_releases_old_handle() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());

        assert_eq!(registry.rename("id1", "Bob").await.unwrap(), Outcome::Applied);

        assert_eq!(registry.lookup_identity("alice").await.unwrap(), None);
        assert!(registry.is_available("alice").await.unwrap().available);
        assert_eq!(
            registry.lookup_handle("id1").await.unwrap().unwrap().as_str(),
            "bob"
        );
        assert_eq!(
            registry.lookup_identity("bob").await.unwrap().unwrap().as_str(),
            "id1"
        );
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_rejections() {
        let registry = registry_with(MemoryStore::new());
        assert_eq!(
            registry.rename("nobody", "bob").await.unwrap(),
            Outcome::Rejected(Rejection::NotBound)
        );

        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());
        assert!(registry.claim("id2", "bob").await.unwrap().is_applied());

        assert_eq!(
            registry.rename("id1", "bob").await.unwrap(),
            Outcome::Rejected(Rejection::Taken)
        );
        assert_eq!(
            registry.rename("id1", "alice").await.unwrap(),
            Outcome::Rejected(Rejection::Taken)
        );
        assert_eq!(
            registry.rename("id1", "dashboard").await.unwrap(),
            Outcome::Rejected(Rejection::Reserved)
        );
        assert_eq!(
            registry.rename("id1", "a!").await.unwrap(),
            Outcome::Rejected(Rejection::InvalidHandle)
        );
        assert_eq!(
            registry.lookup_identity("alice").await.unwrap().unwrap().as_str(),
            "id1"
        );
    }

    #[tokio::test]
    async fn test_release_twice() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());

        let first = registry
            .release(BindingKey::Identity("id1".into()))
            .await
            .unwrap();
        assert_eq!(first, Outcome::Applied);
        assert!(store.is_empty());

        let second = registry
            .release(BindingKey::Identity("id1".into()))
            .await
            .unwrap();
        assert_eq!(second, Outcome::Rejected(Rejection::NotBound));
    }

    #[tokio::test]
    async fn test_release_by_handle() {
        let store = MemoryStore::new();
        let registry = registry_with(store.clone());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());

        let outcome = registry
            .release(BindingKey::Handle("ALICE".into()))
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert!(store.is_empty());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());
    }

    #[tokio::test]
    async fn test_store_faults_propagate_as_errors() {
        let faulty = Arc::new(FaultyStore::default());
        let registry = IdentityRegistry::with_defaults(faulty.clone());
        assert!(registry.claim("id1", "alice").await.unwrap().is_applied());

        faulty.offline.store(true, Ordering::SeqCst);
        assert!(matches!(
            registry.is_available("alice").await,
            Err(RegistryError::StoreUnavailable(_))
        ));
        assert!(matches!(
            registry.claim("id2", "bob").await,
            Err(RegistryError::StoreUnavailable(_))
        ));
        assert!(matches!(
            registry.rename("id1", "bob").await,
            Err(RegistryError::StoreUnavailable(_))
        ));
        assert!(matches!(
            registry.lookup_handle("id1").await,
            Err(RegistryError::StoreUnavailable(_))
        ));
        assert!(matches!(
            registry.lookup_identity("alice").await,
            Err(RegistryError::StoreUnavailable(_))
        ));
        assert!(matches!(
            registry.release(BindingKey::Identity("id1".into())).await,
            Err(RegistryError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_write_is_reported_without_rollback() {
        let faulty = Arc::new(FaultyStore::default());
        faulty.fail_second_step.store(true, Ordering::SeqCst);
        let registry = IdentityRegistry::with_defaults(faulty.clone());

        let outcome = registry.claim("id1", "alice").await.unwrap();
        assert_eq!(outcome, Outcome::Rejected(Rejection::PartialWrite));

        // Known gap: the steps that did land are left behind. Both keys stay
        // in the store here because the fake only misreports the second step.
        assert_eq!(faulty.inner.len(), 2);
        assert!(registry.lookup_handle("id1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_custom_config() {
        let config = RegistryConfig {
            reserved_handles: vec!["Portfoliofy".into()],
            max_handle_length: 5,
            key_prefix: "acct".into(),
        };
        let store = MemoryStore::new();
        let registry = IdentityRegistry::new(Arc::new(store.clone()), config).unwrap();

        assert_eq!(
            registry.claim("id1", "PORTFOLIOFY").await.unwrap(),
            Outcome::Rejected(Rejection::Reserved)
        );
        assert_eq!(
            registry.claim("id1", "toolong").await.unwrap(),
            Outcome::Rejected(Rejection::InvalidHandle)
        );
        assert!(registry.claim("id1", "admin").await.unwrap().is_applied());
        assert_eq!(
            store.keys(),
            vec!["acct:id:id1".to_string(), "acct:name:admin".to_string()]
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RegistryConfig {
            max_handle_length: 1,
            ..Default::default()
        };
        let err = IdentityRegistry::new(Arc::new(MemoryStore::new()), config).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidConfig(_)));
    }
}
