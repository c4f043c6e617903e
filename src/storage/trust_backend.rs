//! Trust record backends
//!
//! A backend offers one optimistic read-modify-write attempt per call. The
//! in-memory backend never contends; the sled backend uses
//! `compare_and_swap` and reports `Contention` when another writer got in
//! between its read and its write. Retrying is the ledger's job.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use sled::Tree;
use tracing::{info, warn};

use super::trust::TrustError;
use crate::types::{SpecialistId, TrustRecord};

/// Storage for per-specialist trust records.
pub trait TrustBackend: Send + Sync {
    /// Every stored record.
    fn load_all(&self) -> Result<BTreeMap<SpecialistId, TrustRecord>, TrustError>;

    fn load(&self, specialist: SpecialistId) -> Result<Option<TrustRecord>, TrustError>;

    /// Apply `update` to the current record (if any) and store the result.
    ///
    /// Returns `TrustError::Contention` if the record changed underneath.
    fn try_update(
        &self,
        specialist: SpecialistId,
        update: &(dyn Fn(Option<TrustRecord>) -> TrustRecord + Sync),
    ) -> Result<TrustRecord, TrustError>;

    /// Drop a record so the specialist reverts to neutral defaults.
    fn remove(&self, specialist: SpecialistId) -> Result<(), TrustError>;
}

// ============================================================================
// In-Memory
// ============================================================================

/// Process-local records behind one lock; updates are serialized by it.
#[derive(Debug, Default)]
pub struct InMemoryTrustBackend {
    records: RwLock<BTreeMap<SpecialistId, TrustRecord>>,
}

impl InMemoryTrustBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustBackend for InMemoryTrustBackend {
    fn load_all(&self) -> Result<BTreeMap<SpecialistId, TrustRecord>, TrustError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.clone())
    }

    fn load(&self, specialist: SpecialistId) -> Result<Option<TrustRecord>, TrustError> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&specialist).cloned())
    }

    fn try_update(
        &self,
        specialist: SpecialistId,
        update: &(dyn Fn(Option<TrustRecord>) -> TrustRecord + Sync),
    ) -> Result<TrustRecord, TrustError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let next = update(records.get(&specialist).cloned());
        records.insert(specialist, next.clone());
        Ok(next)
    }

    fn remove(&self, specialist: SpecialistId) -> Result<(), TrustError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(&specialist);
        Ok(())
    }
}

// ============================================================================
// Sled
// ============================================================================

const TRUST_TREE: &str = "trust";

/// Durable records as JSON in a named sled tree, keyed by specialist wire name.
#[derive(Clone)]
pub struct SledTrustBackend {
    tree: Tree,
}

impl SledTrustBackend {
    /// Open or create the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TrustError> {
        let path = path.as_ref();
        let db = sled::open(path)?;
        info!(path = %path.display(), "Trust store opened");
        Self::from_db(&db)
    }

    /// Use the `trust` tree of an already-open database.
    pub fn from_db(db: &sled::Db) -> Result<Self, TrustError> {
        Ok(Self {
            tree: db.open_tree(TRUST_TREE)?,
        })
    }

    fn decode(bytes: &[u8]) -> Result<TrustRecord, TrustError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl TrustBackend for SledTrustBackend {
    fn load_all(&self) -> Result<BTreeMap<SpecialistId, TrustRecord>, TrustError> {
        let mut records = BTreeMap::new();
        for item in self.tree.iter() {
            let (key, value) = item?;
            let name = String::from_utf8_lossy(&key);
            match SpecialistId::parse(&name) {
                Some(id) => {
                    records.insert(id, Self::decode(&value)?);
                }
                None => warn!(key = %name, "Skipping trust record for unknown specialist"),
            }
        }
        Ok(records)
    }

    fn load(&self, specialist: SpecialistId) -> Result<Option<TrustRecord>, TrustError> {
        self.tree
            .get(specialist.as_str())?
            .map(|bytes| Self::decode(&bytes))
            .transpose()
    }

    fn try_update(
        &self,
        specialist: SpecialistId,
        update: &(dyn Fn(Option<TrustRecord>) -> TrustRecord + Sync),
    ) -> Result<TrustRecord, TrustError> {
        let key = specialist.as_str();
        let current = self.tree.get(key)?;
        let decoded = current.as_ref().map(|bytes| Self::decode(bytes)).transpose()?;

        let next = update(decoded);
        let encoded = serde_json::to_vec(&next)?;

        match self.tree.compare_and_swap(key, current, Some(encoded))? {
            Ok(()) => Ok(next),
            Err(_) => Err(TrustError::Contention(specialist)),
        }
    }

    fn remove(&self, specialist: SpecialistId) -> Result<(), TrustError> {
        self.tree.remove(specialist.as_str())?;
        Ok(())
    }
}
