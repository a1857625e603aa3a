//! Persistent ordered maps.
//!
//! Transactions snapshot index state by capturing an immutable tree
//! root instead of copying. The map here is a 2-3 search tree of
//! `Arc`-shared immutable nodes: snapshots are O(1), mutations rebuild
//! only the search path, and an optimistic root swap on commit gives
//! snapshot isolation without locks on the read side.

mod map;
mod node;

pub use map::{LongMapBuilder, LongMapIter, LongMapSnapshot, PersistentLongMap};
