//! Core type definitions for the Loam engine.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity of the thread (or executor task) that owns a
/// transaction.
///
/// The dispatcher keys its reentrant permit accounting by this token.
/// The engine owns the mapping from execution contexts to tokens; the
/// dispatcher only relies on tokens being cheap to copy, compare and
/// hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadToken(pub u64);

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_TOKEN: ThreadToken =
        ThreadToken(NEXT_TOKEN.fetch_add(1, Ordering::SeqCst));
}

impl ThreadToken {
    /// Creates a token from a raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the token of the calling OS thread.
    ///
    /// Tokens are assigned lazily and are unique per thread for the
    /// lifetime of the process.
    #[must_use]
    pub fn current() -> Self {
        CURRENT_TOKEN.with(|t| *t)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_stable_within_a_thread() {
        assert_eq!(ThreadToken::current(), ThreadToken::current());
    }

    #[test]
    fn current_differs_across_threads() {
        let here = ThreadToken::current();
        let there = std::thread::spawn(ThreadToken::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn token_display() {
        let t = ThreadToken::new(7);
        assert_eq!(format!("{t}"), "thread:7");
    }
}
