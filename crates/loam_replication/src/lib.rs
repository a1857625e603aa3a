//! # Loam Replication
//!
//! Log page replication for the Loam storage engine.
//!
//! When a replica bootstraps, it catches its local log up from a remote
//! blob store. This crate streams one object into a local log file
//! while opportunistically capturing the trailing "last page" bytes the
//! in-memory log tail keeps hot, so no extra read is needed once the
//! download completes.
//!
//! The crate is not an HTTP client: it consumes byte chunks through the
//! back-pressured [`ChunkPublisher`] contract provided by the blob
//! store integration.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod replicator;
mod stream;

pub use error::{ReplicationError, ReplicationResult};
pub use replicator::{PageReplicator, ResponseMeta, WriteResult};
pub use stream::{ChunkPublisher, ChunkSubscriber, ChunkSubscription, StaticChunkPublisher};
