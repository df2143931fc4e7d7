use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::TypeResolutionStore;
use crate::error::DevirtError;

/// Scoped access to metadata that other compilation or class-loading threads may mutate.
///
/// Each call to [`MetadataAccess::with_access`] is one bounded critical section. The
/// store reference handed to `query` cannot escape it, so no IR mutation ever runs
/// while the handshake is held.
pub trait MetadataAccess {
    type Store: TypeResolutionStore + ?Sized;

    /// Run `query` with the metadata handshake held.
    ///
    /// # Errors
    ///
    /// Returns [`DevirtError::MetadataUnavailable`] when the handshake cannot be acquired.
    fn with_access<R>(&self, query: impl FnOnce(&Self::Store) -> R) -> Result<R, DevirtError>;

    /// Number of scopes currently held by any thread.
    fn active_scopes(&self) -> usize;
}

/// Reader/writer handshake around an owned metadata store.
///
/// Resolution queries take the shared side; class loading goes through
/// [`MetadataHandshake::update`], which waits for in-flight queries to finish.
#[derive(Debug, Default)]
pub struct MetadataHandshake<S> {
    store: RwLock<S>,
    active: AtomicUsize,
    acquisitions: AtomicU64,
}

impl<S> MetadataHandshake<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: RwLock::new(store),
            active: AtomicUsize::new(0),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Mutate the store exclusively, e.g. when new types are loaded.
    ///
    /// # Errors
    ///
    /// Returns [`DevirtError::MetadataUnavailable`] when the lock is poisoned.
    pub fn update<R>(&self, mutate: impl FnOnce(&mut S) -> R) -> Result<R, DevirtError> {
        let mut guard = self
            .store
            .write()
            .map_err(|_| DevirtError::MetadataUnavailable)?;
        Ok(mutate(&mut guard))
    }

    /// Total number of scoped acquisitions since construction.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

struct ScopeMarker<'a> {
    active: &'a AtomicUsize,
}

impl<'a> ScopeMarker<'a> {
    fn enter(active: &'a AtomicUsize) -> Self {
        active.fetch_add(1, Ordering::AcqRel);
        Self { active }
    }
}

impl Drop for ScopeMarker<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<S: TypeResolutionStore> MetadataAccess for MetadataHandshake<S> {
    type Store = S;

    fn with_access<R>(&self, query: impl FnOnce(&S) -> R) -> Result<R, DevirtError> {
        let guard = self
            .store
            .read()
            .map_err(|_| DevirtError::MetadataUnavailable)?;
        let _scope = ScopeMarker::enter(&self.active);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        Ok(query(&guard))
    }

    fn active_scopes(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
