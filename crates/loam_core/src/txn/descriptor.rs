//! Transaction descriptors.

use crate::types::ThreadToken;

/// The view of a transaction the dispatcher needs for admission.
///
/// The dispatcher treats transactions as opaque except for these
/// accessors: the identity of the thread that created the transaction,
/// the (mutable) exclusive flag, whether the transaction was created
/// exclusive, whether it belongs to the garbage collector, and a slot
/// for the permits charged at admission.
pub trait TransactionDescriptor {
    /// Returns the token of the thread that created the transaction.
    fn creating_thread(&self) -> ThreadToken;

    /// Returns whether the transaction currently wants exclusivity.
    fn is_exclusive(&self) -> bool;

    /// Sets the exclusive flag.
    ///
    /// The dispatcher clears it when a bounded exclusive acquire fails
    /// and the transaction downgrades to shared.
    fn set_exclusive(&mut self, exclusive: bool);

    /// Returns whether the transaction was created exclusive.
    ///
    /// Unlike [`is_exclusive`](Self::is_exclusive) this never changes
    /// after construction.
    fn was_created_exclusive(&self) -> bool;

    /// Returns whether this is a garbage-collection transaction.
    fn is_gc_transaction(&self) -> bool;

    /// Returns the permits recorded at admission.
    fn acquired_permits(&self) -> usize;

    /// Records the permits charged at admission.
    fn set_acquired_permits(&mut self, permits: usize);
}

/// A plain transaction descriptor owned by the engine.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    creating_thread: ThreadToken,
    exclusive: bool,
    created_exclusive: bool,
    gc: bool,
    acquired_permits: usize,
}

impl TransactionHandle {
    /// Creates a shared transaction for `creating_thread`.
    #[must_use]
    pub fn new(creating_thread: ThreadToken) -> Self {
        Self {
            creating_thread,
            exclusive: false,
            created_exclusive: false,
            gc: false,
            acquired_permits: 0,
        }
    }

    /// Creates an exclusive transaction for `creating_thread`.
    #[must_use]
    pub fn new_exclusive(creating_thread: ThreadToken) -> Self {
        Self {
            creating_thread,
            exclusive: true,
            created_exclusive: true,
            gc: false,
            acquired_permits: 0,
        }
    }

    /// Creates an exclusive garbage-collection transaction for
    /// `creating_thread`.
    #[must_use]
    pub fn new_gc(creating_thread: ThreadToken) -> Self {
        Self {
            creating_thread,
            exclusive: true,
            created_exclusive: true,
            gc: true,
            acquired_permits: 0,
        }
    }
}

impl TransactionDescriptor for TransactionHandle {
    fn creating_thread(&self) -> ThreadToken {
        self.creating_thread
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    fn set_exclusive(&mut self, exclusive: bool) {
        self.exclusive = exclusive;
    }

    fn was_created_exclusive(&self) -> bool {
        self.created_exclusive
    }

    fn is_gc_transaction(&self) -> bool {
        self.gc
    }

    fn acquired_permits(&self) -> usize {
        self.acquired_permits
    }

    fn set_acquired_permits(&mut self, permits: usize) {
        self.acquired_permits = permits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_handle_flags() {
        let txn = TransactionHandle::new(ThreadToken::new(1));
        assert!(!txn.is_exclusive());
        assert!(!txn.was_created_exclusive());
        assert!(!txn.is_gc_transaction());
        assert_eq!(txn.acquired_permits(), 0);
    }

    #[test]
    fn exclusive_flag_is_mutable_but_origin_is_not() {
        let mut txn = TransactionHandle::new_exclusive(ThreadToken::new(1));
        assert!(txn.is_exclusive());
        txn.set_exclusive(false);
        assert!(!txn.is_exclusive());
        assert!(txn.was_created_exclusive());
    }

    #[test]
    fn gc_handle_is_exclusive() {
        let txn = TransactionHandle::new_gc(ThreadToken::new(1));
        assert!(txn.is_exclusive());
        assert!(txn.was_created_exclusive());
        assert!(txn.is_gc_transaction());
    }
}
