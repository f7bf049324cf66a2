//! Credential persistence for the session layer.
//!
//! Credentials are stored as opaque string secrets addressed by
//! `(service, account)`. The session client serializes its credential
//! bundle into a single secret per device, so one cleared entry is a
//! complete logout.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;

/// Errors surfaced by credential store backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialStoreError {
    /// No secret stored under the requested key.
    #[error("credential not found")]
    NotFound,
    /// The backing store is not usable right now.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    /// The backing store failed.
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Storage backend for persisted credentials.
///
/// `clear` is idempotent: clearing an absent entry succeeds, so session
/// teardown can always run it unconditionally.
pub trait CredentialStore: Send + Sync {
    /// Store one secret.
    fn set(&self, service: &str, account: &str, value: &str) -> Result<(), CredentialStoreError>;

    /// Fetch one secret.
    fn get(&self, service: &str, account: &str) -> Result<String, CredentialStoreError>;

    /// Remove one secret if present.
    fn clear(&self, service: &str, account: &str) -> Result<(), CredentialStoreError>;
}

/// Process-local store used by tests and demos.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    data: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn set(&self, service: &str, account: &str, value: &str) -> Result<(), CredentialStoreError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((service.to_owned(), account.to_owned()), value.to_owned());
        Ok(())
    }

    fn get(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(service.to_owned(), account.to_owned()))
            .cloned()
            .ok_or(CredentialStoreError::NotFound)
    }

    fn clear(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(service.to_owned(), account.to_owned()));
        Ok(())
    }
}

/// OS-keyring-backed store.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl CredentialStore for OsKeyringCredentialStore {
    fn set(&self, service: &str, account: &str, value: &str) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry
            .set_password(value)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))
    }

    fn get(&self, service: &str, account: &str) -> Result<String, CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        entry.get_password().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialStoreError::NotFound,
            other => CredentialStoreError::Backend(other.to_string()),
        })
    }

    fn clear(&self, service: &str, account: &str) -> Result<(), CredentialStoreError> {
        let entry = keyring::Entry::new(service, account)
            .map_err(|err| CredentialStoreError::Backend(err.to_string()))?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(other) => Err(CredentialStoreError::Backend(other.to_string())),
        }
    }
}

/// A store bound to one service name.
#[derive(Clone)]
pub struct ScopedCredentialStore<S: CredentialStore> {
    inner: S,
    service: String,
}

impl<S: CredentialStore> ScopedCredentialStore<S> {
    /// Bind `inner` to a fixed service name.
    pub fn new(inner: S, service: impl Into<String>) -> Self {
        Self {
            inner,
            service: service.into(),
        }
    }

    /// Store one secret under this service.
    pub fn set(&self, account: &str, value: &str) -> Result<(), CredentialStoreError> {
        self.inner.set(&self.service, account, value)
    }

    /// Fetch one secret under this service.
    pub fn get(&self, account: &str) -> Result<String, CredentialStoreError> {
        self.inner.get(&self.service, account)
    }

    /// Remove one secret under this service if present.
    pub fn clear(&self, account: &str) -> Result<(), CredentialStoreError> {
        self.inner.clear(&self.service, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_roundtrip() {
        let store = InMemoryCredentialStore::default();
        store
            .set("fernchat", "current-session", "{\"access_token\":\"t\"}")
            .expect("set should work");

        assert_eq!(
            store
                .get("fernchat", "current-session")
                .expect("get should work"),
            "{\"access_token\":\"t\"}"
        );

        store
            .clear("fernchat", "current-session")
            .expect("clear should work");
        assert_eq!(
            store.get("fernchat", "current-session"),
            Err(CredentialStoreError::NotFound)
        );
    }

    #[test]
    fn clearing_an_absent_entry_succeeds() {
        let store = InMemoryCredentialStore::default();
        store
            .clear("fernchat", "never-stored")
            .expect("clear must be idempotent");
    }

    #[test]
    fn scoped_store_isolates_services() {
        let base = InMemoryCredentialStore::default();
        let a = ScopedCredentialStore::new(base.clone(), "fernchat-a");
        let b = ScopedCredentialStore::new(base.clone(), "fernchat-b");

        a.set("alice", "one").expect("set a");
        b.set("alice", "two").expect("set b");

        assert_eq!(a.get("alice").expect("get a"), "one");
        assert_eq!(b.get("alice").expect("get b"), "two");

        a.clear("alice").expect("clear a");
        assert_eq!(a.get("alice"), Err(CredentialStoreError::NotFound));
        assert_eq!(b.get("alice").expect("get b again"), "two");
    }

    #[derive(Default)]
    struct FailingStore;

    impl CredentialStore for FailingStore {
        fn set(&self, _: &str, _: &str, _: &str) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn get(&self, _: &str, _: &str) -> Result<String, CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }

        fn clear(&self, _: &str, _: &str) -> Result<(), CredentialStoreError> {
            Err(CredentialStoreError::Unavailable("mock outage".to_owned()))
        }
    }

    #[test]
    fn backend_failure_propagates_through_scoped_store() {
        let scoped = ScopedCredentialStore::new(FailingStore, "fernchat");
        let err = scoped.set("alice", "secret").expect_err("set must fail");
        assert_eq!(
            err,
            CredentialStoreError::Unavailable("mock outage".to_owned())
        );
    }
}
