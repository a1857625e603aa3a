//! Two-column table: a pair of mutually inverted stores.

use crate::error::EngineResult;
use crate::tables::store::LinkStore;

/// A table that maintains both directions of a binary relation.
///
/// Every `(first, second)` pair is written to the first index as
/// `first → second` and to the second index as `second → first`, inside
/// the same environment transaction. Either column can then be scanned
/// by its owner.
#[derive(Debug)]
pub struct TwoColumnTable<S: LinkStore> {
    first: S,
    second: S,
}

impl<S: LinkStore> TwoColumnTable<S> {
    /// Creates a table over the two backing stores.
    pub fn new(first: S, second: S) -> Self {
        Self { first, second }
    }

    /// Inserts a pair into both columns.
    ///
    /// Returns `true` when either column changed.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails; the caller aborts the
    /// transaction to keep the columns consistent.
    pub fn put(&self, txn: &mut S::Txn, first: &[u8], second: &[u8]) -> EngineResult<bool> {
        let a = self.first.put(txn, first, second)?;
        let b = self.second.put(txn, second, first)?;
        Ok(a | b)
    }

    /// Deletes a pair from both columns.
    ///
    /// Returns `true` when either column changed.
    ///
    /// # Errors
    ///
    /// Returns an error if either store fails; the caller aborts the
    /// transaction to keep the columns consistent.
    pub fn delete(&self, txn: &mut S::Txn, first: &[u8], second: &[u8]) -> EngineResult<bool> {
        let a = self.first.delete_pair(txn, first, second)?;
        let b = self.second.delete_pair(txn, second, first)?;
        Ok(a | b)
    }

    /// Returns the `first → second` index.
    pub fn first_index(&self) -> &S {
        &self.first
    }

    /// Returns the `second → first` index.
    pub fn second_index(&self) -> &S {
        &self.second
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::store::{MemoryLinkStore, MemoryTxn};

    fn table() -> TwoColumnTable<MemoryLinkStore> {
        TwoColumnTable::new(MemoryLinkStore::new(), MemoryLinkStore::new())
    }

    #[test]
    fn put_writes_both_directions() {
        let table = table();
        let mut txn = MemoryTxn::new();

        assert!(table.put(&mut txn, b"src", b"dst").unwrap());
        txn.commit();

        assert!(table.first_index().contains_pair(b"src", b"dst"));
        assert!(table.second_index().contains_pair(b"dst", b"src"));
    }

    #[test]
    fn delete_clears_both_directions() {
        let table = table();
        let mut txn = MemoryTxn::new();
        table.put(&mut txn, b"src", b"dst").unwrap();

        assert!(table.delete(&mut txn, b"src", b"dst").unwrap());
        assert!(!table.delete(&mut txn, b"src", b"dst").unwrap());
        txn.commit();

        assert_eq!(table.first_index().pair_count(), 0);
        assert_eq!(table.second_index().pair_count(), 0);
    }
}
