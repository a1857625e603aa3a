//! Environment configuration.

use std::time::Duration;

/// Configuration consulted when admitting transactions onto the engine.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Maximum number of transactions running in parallel.
    ///
    /// This is the permit budget of the transaction dispatcher and must
    /// be at least 1.
    pub max_simultaneous_transactions: usize,

    /// How long a garbage-collection transaction may wait when upgrading
    /// to exclusive before giving up and running shared.
    pub gc_transaction_acquire_timeout: Duration,

    /// How long a replayed transaction may wait when upgrading to
    /// exclusive before giving up and running shared.
    pub txn_replay_timeout: Duration,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            max_simultaneous_transactions: 16,
            gc_transaction_acquire_timeout: Duration::from_secs(1),
            txn_replay_timeout: Duration::from_secs(2),
        }
    }
}

impl EnvironmentConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of simultaneous transactions.
    #[must_use]
    pub const fn with_max_simultaneous_transactions(mut self, max: usize) -> Self {
        self.max_simultaneous_transactions = max;
        self
    }

    /// Sets the GC transaction acquire timeout.
    #[must_use]
    pub const fn with_gc_transaction_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.gc_transaction_acquire_timeout = timeout;
        self
    }

    /// Sets the transaction replay timeout.
    #[must_use]
    pub const fn with_txn_replay_timeout(mut self, timeout: Duration) -> Self {
        self.txn_replay_timeout = timeout;
        self
    }
}
