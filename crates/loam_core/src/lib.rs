//! # Loam Core
//!
//! Core concurrency primitives of the Loam storage engine.
//!
//! This crate provides:
//! - Transaction admission under a fixed permit budget ([`txn`])
//! - Persistent, structurally shared ordered maps ([`persistent`])
//! - Link table facades over a transactional store ([`tables`])
//! - Environment configuration ([`config`])
//!
//! The engine's B-tree store, table schemas and outer surfaces are
//! external collaborators; this crate only encodes the contracts it
//! consumes from them.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod persistent;
pub mod tables;
pub mod txn;
mod types;

pub use config::EnvironmentConfig;
pub use error::{EngineError, EngineResult};
pub use types::ThreadToken;
