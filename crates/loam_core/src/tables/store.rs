//! Transactional store contract for the table facades.

use crate::error::EngineResult;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A duplicate-tolerant transactional key/value store.
///
/// The table facades never interpret the transaction handle; they only
/// thread it through so that every index update of one logical
/// operation lands in the same environment transaction. Atomicity is
/// inherited from the implementor.
pub trait LinkStore {
    /// Read/write transaction handle of the backing environment.
    type Txn;

    /// Associates `value` with `key`.
    ///
    /// Returns `true` when the pair was not present before.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn put(&self, txn: &mut Self::Txn, key: &[u8], value: &[u8]) -> EngineResult<bool>;

    /// Removes the exact `(key, value)` pair.
    ///
    /// Returns `true` when the pair existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store fails.
    fn delete_pair(&self, txn: &mut Self::Txn, key: &[u8], value: &[u8]) -> EngineResult<bool>;
}

type Pairs = BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>;

/// An in-memory [`LinkStore`] for tests and ephemeral tables.
///
/// Mutations apply immediately and record an undo entry on the
/// transaction; [`MemoryTxn::abort`] rolls everything back in reverse
/// order, which is what makes multi-store operations atomic.
#[derive(Debug, Default)]
pub struct MemoryLinkStore {
    data: Arc<RwLock<Pairs>>,
}

impl MemoryLinkStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all values associated with `key`, in byte order.
    #[must_use]
    pub fn values(&self, key: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .read()
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns whether the exact pair is present.
    #[must_use]
    pub fn contains_pair(&self, key: &[u8], value: &[u8]) -> bool {
        self.data
            .read()
            .get(key)
            .is_some_and(|set| set.contains(value))
    }

    /// Returns the total number of stored pairs.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.data.read().values().map(BTreeSet::len).sum()
    }
}

impl LinkStore for MemoryLinkStore {
    type Txn = MemoryTxn;

    fn put(&self, txn: &mut MemoryTxn, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        let mut data = self.data.write();
        let added = data
            .entry(key.to_vec())
            .or_default()
            .insert(value.to_vec());
        if added {
            txn.undo.push(Undo {
                data: Arc::clone(&self.data),
                key: key.to_vec(),
                value: value.to_vec(),
                reinsert: false,
            });
        }
        Ok(added)
    }

    fn delete_pair(&self, txn: &mut MemoryTxn, key: &[u8], value: &[u8]) -> EngineResult<bool> {
        let mut data = self.data.write();
        let Some(set) = data.get_mut(key) else {
            return Ok(false);
        };
        let removed = set.remove(value);
        if set.is_empty() {
            data.remove(key);
        }
        if removed {
            txn.undo.push(Undo {
                data: Arc::clone(&self.data),
                key: key.to_vec(),
                value: value.to_vec(),
                reinsert: true,
            });
        }
        Ok(removed)
    }
}

struct Undo {
    data: Arc<RwLock<Pairs>>,
    key: Vec<u8>,
    value: Vec<u8>,
    /// `true` undoes a delete, `false` undoes a put.
    reinsert: bool,
}

/// Transaction handle of [`MemoryLinkStore`].
///
/// One handle may span any number of stores.
#[derive(Default)]
pub struct MemoryTxn {
    undo: Vec<Undo>,
}

impl MemoryTxn {
    /// Starts a transaction.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes all mutations performed under this handle permanent.
    pub fn commit(mut self) {
        self.undo.clear();
    }

    /// Rolls back all mutations performed under this handle.
    pub fn abort(mut self) {
        while let Some(op) = self.undo.pop() {
            let mut data = op.data.write();
            if op.reinsert {
                data.entry(op.key).or_default().insert(op.value);
            } else if let Some(set) = data.get_mut(&op.key) {
                set.remove(&op.value);
                if set.is_empty() {
                    data.remove(&op.key);
                }
            }
        }
    }
}

impl std::fmt::Debug for MemoryTxn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTxn")
            .field("pending_undos", &self.undo.len())
            .finish()
    }
}
