//! Link table: entity links with an all-links inverted index.

use crate::error::EngineResult;
use crate::tables::store::LinkStore;
use crate::tables::two_column::TwoColumnTable;

/// Identifies one link slot: which entity, which link name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkKey {
    local_id: u64,
    link_id: u32,
}

impl LinkKey {
    /// Creates a link key.
    #[must_use]
    pub const fn new(local_id: u64, link_id: u32) -> Self {
        Self { local_id, link_id }
    }

    /// Returns the source entity's local id.
    #[must_use]
    pub const fn local_id(self) -> u64 {
        self.local_id
    }

    /// Returns the link id.
    #[must_use]
    pub const fn link_id(self) -> u32 {
        self.link_id
    }

    /// Encodes the key as fixed-width big-endian bytes, so byte order
    /// matches `(local_id, link_id)` order.
    #[must_use]
    pub fn to_bytes(self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..8].copy_from_slice(&self.local_id.to_be_bytes());
        bytes[8..].copy_from_slice(&self.link_id.to_be_bytes());
        bytes
    }

    /// Decodes a key previously produced by
    /// [`to_bytes`](Self::to_bytes).
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 12 {
            return None;
        }
        let mut local = [0u8; 8];
        local.copy_from_slice(&bytes[..8]);
        let mut link = [0u8; 4];
        link.copy_from_slice(&bytes[8..]);
        Some(Self {
            local_id: u64::from_be_bytes(local),
            link_id: u32::from_be_bytes(link),
        })
    }
}

/// Entity link storage.
///
/// Links live in a [`TwoColumnTable`] keyed by the encoded
/// `(local_id, link_id)` pair, plus an `all_links` inverted index from
/// `link_id` to the source `local_id`. The inverted index is only
/// touched when the caller asserts the link slot transitioned between
/// empty and non-empty: `no_old_value` on insert, `no_new_value` on
/// delete. All writes of one call share the environment transaction, so
/// atomicity comes from the store.
#[derive(Debug)]
pub struct LinksTable<S: LinkStore> {
    table: TwoColumnTable<S>,
    all_links_index: S,
}

impl<S: LinkStore> LinksTable<S> {
    /// Creates a links table over its backing stores.
    pub fn new(table: TwoColumnTable<S>, all_links_index: S) -> Self {
        Self {
            table,
            all_links_index,
        }
    }

    /// Inserts a link to `target`.
    ///
    /// `no_old_value` asserts the slot held no target before this call;
    /// only then is the all-links index updated.
    ///
    /// Returns `true` when anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails; the caller aborts the
    /// transaction.
    pub fn put(
        &self,
        txn: &mut S::Txn,
        local_id: u64,
        target: &[u8],
        no_old_value: bool,
        link_id: u32,
    ) -> EngineResult<bool> {
        let key = LinkKey::new(local_id, link_id).to_bytes();
        let mut success = self.table.put(txn, &key, target)?;
        if no_old_value {
            success |= self.all_links_index.put(
                txn,
                &link_id.to_be_bytes(),
                &local_id.to_be_bytes(),
            )?;
        }
        Ok(success)
    }

    /// Deletes the link to `target`.
    ///
    /// `no_new_value` asserts no other target remains in the slot; only
    /// then is the all-links index entry removed.
    ///
    /// Returns `true` when anything changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a store write fails; the caller aborts the
    /// transaction.
    pub fn delete(
        &self,
        txn: &mut S::Txn,
        local_id: u64,
        target: &[u8],
        no_new_value: bool,
        link_id: u32,
    ) -> EngineResult<bool> {
        let key = LinkKey::new(local_id, link_id).to_bytes();
        let mut success = self.table.delete(txn, &key, target)?;
        if no_new_value {
            success |= self.delete_all_index(txn, link_id, local_id)?;
        }
        Ok(success)
    }

    /// Removes one all-links index entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the index store fails.
    pub fn delete_all_index(
        &self,
        txn: &mut S::Txn,
        link_id: u32,
        local_id: u64,
    ) -> EngineResult<bool> {
        self.all_links_index
            .delete_pair(txn, &link_id.to_be_bytes(), &local_id.to_be_bytes())
    }

    /// Returns the underlying two-column table.
    pub fn table(&self) -> &TwoColumnTable<S> {
        &self.table
    }

    /// Returns the all-links inverted index.
    pub fn all_links_index(&self) -> &S {
        &self.all_links_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::store::{MemoryLinkStore, MemoryTxn};

    fn links() -> LinksTable<MemoryLinkStore> {
        LinksTable::new(
            TwoColumnTable::new(MemoryLinkStore::new(), MemoryLinkStore::new()),
            MemoryLinkStore::new(),
        )
    }

    #[test]
    fn link_key_round_trip() {
        let key = LinkKey::new(42, 7);
        let decoded = LinkKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(decoded, key);
        assert_eq!(decoded.local_id(), 42);
        assert_eq!(decoded.link_id(), 7);
        assert!(LinkKey::from_bytes(b"short").is_none());
    }

    #[test]
    fn link_key_bytes_sort_like_ids() {
        let a = LinkKey::new(1, 9).to_bytes();
        let b = LinkKey::new(2, 0).to_bytes();
        let c = LinkKey::new(2, 1).to_bytes();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn first_link_updates_all_links_index() {
        let links = links();
        let mut txn = MemoryTxn::new();

        assert!(links.put(&mut txn, 5, b"target", true, 3).unwrap());
        txn.commit();

        let key = LinkKey::new(5, 3).to_bytes();
        assert!(links.table().first_index().contains_pair(&key, b"target"));
        assert!(links.table().second_index().contains_pair(b"target", &key));
        assert!(links
            .all_links_index()
            .contains_pair(&3u32.to_be_bytes(), &5u64.to_be_bytes()));
    }

    #[test]
    fn additional_target_skips_all_links_index() {
        let links = links();
        let mut txn = MemoryTxn::new();

        links.put(&mut txn, 5, b"first", true, 3).unwrap();
        links.put(&mut txn, 5, b"second", false, 3).unwrap();
        txn.commit();

        // Two targets, one inverted-index entry.
        let key = LinkKey::new(5, 3).to_bytes();
        assert_eq!(links.table().first_index().values(&key).len(), 2);
        assert_eq!(
            links.all_links_index().values(&3u32.to_be_bytes()),
            vec![5u64.to_be_bytes().to_vec()]
        );
    }

    #[test]
    fn delete_keeps_index_until_last_target_goes() {
        let links = links();
        let mut txn = MemoryTxn::new();
        links.put(&mut txn, 5, b"first", true, 3).unwrap();
        links.put(&mut txn, 5, b"second", false, 3).unwrap();

        assert!(links.delete(&mut txn, 5, b"first", false, 3).unwrap());
        assert!(links
            .all_links_index()
            .contains_pair(&3u32.to_be_bytes(), &5u64.to_be_bytes()));

        assert!(links.delete(&mut txn, 5, b"second", true, 3).unwrap());
        txn.commit();

        assert_eq!(links.table().first_index().pair_count(), 0);
        assert_eq!(links.all_links_index().pair_count(), 0);
    }

    #[test]
    fn delete_of_missing_link_reports_false() {
        let links = links();
        let mut txn = MemoryTxn::new();
        assert!(!links.delete(&mut txn, 9, b"nothing", true, 1).unwrap());
        txn.commit();
    }

    #[test]
    fn abort_undoes_primary_and_index_together() {
        let links = links();

        let mut txn = MemoryTxn::new();
        links.put(&mut txn, 5, b"target", true, 3).unwrap();
        txn.abort();

        assert_eq!(links.table().first_index().pair_count(), 0);
        assert_eq!(links.table().second_index().pair_count(), 0);
        assert_eq!(links.all_links_index().pair_count(), 0);
    }
}
