//! Saga storage with optimistic concurrency control.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use common::{SagaId, Version};

use crate::error::{Result, SagaError};
use crate::saga::Saga;

/// Storage for saga instances.
///
/// Every write names the version it was based on. If the stored version has
/// moved on, the write fails with [`SagaError::ConcurrencyConflict`] and the
/// stored saga is left untouched. This serializes writes per saga id without
/// holding a lock across the caller's transition.
pub trait SagaRepository: Send + Sync {
    /// Stores a new saga at [`Version::first`].
    fn insert(&self, saga: Saga) -> Result<Version>;

    /// Loads a saga and the version it is stored at.
    fn load(&self, saga_id: SagaId) -> Result<Option<(Saga, Version)>>;

    /// Replaces a stored saga if it is still at `expected`.
    fn save(&self, saga: Saga, expected: Version) -> Result<Version>;

    /// Removes a saga, returning it if it existed.
    fn remove(&self, saga_id: SagaId) -> Result<Option<Saga>>;
}

#[derive(Debug)]
struct StoredSaga {
    saga: Saga,
    version: Version,
}

/// In-memory saga repository. Sagas do not survive the process.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaRepository {
    sagas: Arc<RwLock<HashMap<SagaId, StoredSaga>>>,
}

impl InMemorySagaRepository {
    /// Creates an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sagas.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Returns true if no saga is stored.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.read()?.is_empty())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<SagaId, StoredSaga>>> {
        self.sagas.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<SagaId, StoredSaga>>> {
        self.sagas.write().map_err(|_| poisoned())
    }
}

impl SagaRepository for InMemorySagaRepository {
    fn insert(&self, saga: Saga) -> Result<Version> {
        let mut sagas = self.write()?;
        let saga_id = saga.id();

        if let Some(existing) = sagas.get(&saga_id) {
            return Err(SagaError::ConcurrencyConflict {
                saga_id,
                expected: Version::initial(),
                actual: existing.version,
            });
        }

        let version = Version::first();
        sagas.insert(saga_id, StoredSaga { saga, version });
        Ok(version)
    }

    fn load(&self, saga_id: SagaId) -> Result<Option<(Saga, Version)>> {
        let sagas = self.read()?;
        Ok(sagas
            .get(&saga_id)
            .map(|stored| (stored.saga.clone(), stored.version)))
    }

    fn save(&self, saga: Saga, expected: Version) -> Result<Version> {
        let mut sagas = self.write()?;
        let saga_id = saga.id();

        let stored = sagas
            .get_mut(&saga_id)
            .ok_or(SagaError::NotFound(saga_id))?;
        if stored.version != expected {
            return Err(SagaError::ConcurrencyConflict {
                saga_id,
                expected,
                actual: stored.version,
            });
        }

        stored.version = expected.next();
        stored.saga = saga;
        Ok(stored.version)
    }

    fn remove(&self, saga_id: SagaId) -> Result<Option<Saga>> {
        let mut sagas = self.write()?;
        Ok(sagas.remove(&saga_id).map(|stored| stored.saga))
    }
}

fn poisoned() -> SagaError {
    SagaError::Storage("saga repository lock poisoned".to_string())
}
