//! Persistent ordered map keyed by signed 64-bit integers.

use crate::persistent::node::{self, Child, Entry, Inserted, Node, Removed};
use parking_lot::RwLock;
use std::sync::Arc;

/// The live root of a map; size lives here, not in the nodes.
struct Root<V> {
    node: Child<V>,
    size: usize,
}

impl<V> Clone for Root<V> {
    fn clone(&self) -> Self {
        Self {
            node: self.node.clone(),
            size: self.size,
        }
    }
}

fn same_root<V>(a: &Child<V>, b: &Child<V>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// A persistent ordered map from `i64` to `V`.
///
/// All nodes are immutable and structurally shared, so snapshots and
/// clones are O(1) and safe to read from any thread without locks.
/// Writes go through a [`LongMapBuilder`] forked from the live root;
/// [`commit`](Self::commit) publishes the builder's root only if the
/// live root has not advanced since the fork, which gives optimistic
/// snapshot isolation over the map's contents.
///
/// # Example
///
/// ```
/// use loam_core::persistent::PersistentLongMap;
///
/// let map = PersistentLongMap::new();
/// let mut builder = map.begin_write();
/// builder.put(1, "one");
/// builder.put(2, "two");
/// assert!(map.commit(&mut builder));
///
/// let snapshot = map.begin_read();
/// assert_eq!(snapshot.get(1), Some(&"one"));
/// ```
pub struct PersistentLongMap<V> {
    root: RwLock<Root<V>>,
}

impl<V> PersistentLongMap<V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Root {
                node: None,
                size: 0,
            }),
        }
    }

    /// Captures an immutable snapshot of the current contents.
    #[must_use]
    pub fn begin_read(&self) -> LongMapSnapshot<V> {
        LongMapSnapshot {
            root: self.root.read().clone(),
        }
    }

    /// Forks a mutable builder off the current contents.
    #[must_use]
    pub fn begin_write(&self) -> LongMapBuilder<V> {
        let root = self.root.read().clone();
        LongMapBuilder {
            base: root.node.clone(),
            root,
        }
    }

    /// Publishes a builder's contents.
    ///
    /// Succeeds only if the live root is still the one the builder was
    /// forked from; on success the builder is re-based so it can keep
    /// mutating. Returns `false` when another commit won the race, in
    /// which case the caller forks a fresh builder and retries.
    pub fn commit(&self, builder: &mut LongMapBuilder<V>) -> bool {
        let mut live = self.root.write();
        if !same_root(&live.node, &builder.base) {
            return false;
        }
        *live = builder.root.clone();
        builder.base = builder.root.node.clone();
        true
    }

    /// Returns the number of entries in the live map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.read().size
    }

    /// Returns whether the live map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V> Clone for PersistentLongMap<V> {
    /// Cheap clone sharing the current root; the clones diverge
    /// independently afterwards.
    fn clone(&self) -> Self {
        Self {
            root: RwLock::new(self.root.read().clone()),
        }
    }
}

impl<V> Default for PersistentLongMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// An immutable snapshot of a [`PersistentLongMap`].
///
/// Reads are lock-free and the snapshot never observes later commits.
pub struct LongMapSnapshot<V> {
    root: Root<V>,
}

impl<V> LongMapSnapshot<V> {
    /// Looks up a key.
    #[must_use]
    pub fn get(&self, key: i64) -> Option<&V> {
        self.root.node.as_deref().and_then(|n| node::get(n, key))
    }

    /// Returns whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: i64) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.size
    }

    /// Returns whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.size == 0
    }

    /// Iterates entries in ascending key order.
    pub fn iter(&self) -> LongMapIter<'_, V> {
        LongMapIter::new(&self.root.node)
    }
}

/// A mutable view forked from a [`PersistentLongMap`].
///
/// Mutations rebuild only the search path; everything else is shared
/// with the forked root. Nothing is visible to readers until
/// [`PersistentLongMap::commit`] succeeds.
pub struct LongMapBuilder<V> {
    /// Root this builder was forked from; compared on commit.
    base: Child<V>,
    root: Root<V>,
}

impl<V> LongMapBuilder<V> {
    /// Looks up a key, observing this builder's pending mutations.
    #[must_use]
    pub fn get(&self, key: i64) -> Option<&V> {
        self.root.node.as_deref().and_then(|n| node::get(n, key))
    }

    /// Returns whether the key is present.
    #[must_use]
    pub fn contains_key(&self, key: i64) -> bool {
        self.get(key).is_some()
    }

    /// Returns the number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.size
    }

    /// Returns whether the builder is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.size == 0
    }

    /// Iterates entries in ascending key order.
    ///
    /// The iterator borrows the builder, so mutating while iterating is
    /// rejected at compile time.
    pub fn iter(&self) -> LongMapIter<'_, V> {
        LongMapIter::new(&self.root.node)
    }
}

impl<V: Clone> LongMapBuilder<V> {
    /// Inserts or replaces a mapping, returning the previous value.
    pub fn put(&mut self, key: i64, value: V) -> Option<V> {
        let entry = Entry { key, value };
        match self.root.node.as_deref() {
            None => {
                self.root.node = Some(node::leaf(entry));
                self.root.size = 1;
                None
            }
            Some(n) => {
                let (inserted, old) = node::insert(n, entry);
                self.root.node = Some(match inserted {
                    Inserted::Node(n) => n,
                    Inserted::Split(left, up, right) => Arc::new(Node::Two {
                        left: Some(left),
                        entry: up,
                        right: Some(right),
                    }),
                });
                if old.is_none() {
                    self.root.size += 1;
                }
                old
            }
        }
    }

    /// Removes a mapping, returning its value.
    pub fn remove(&mut self, key: i64) -> Option<V> {
        let removed = match self.root.node.as_deref() {
            None => return None,
            Some(n) => node::remove(n, key),
        };
        match removed {
            Removed::NotFound => None,
            Removed::Node(n, v) => {
                self.root.node = Some(n);
                self.root.size -= 1;
                Some(v)
            }
            // The tree lost a level at the root.
            Removed::Shrunk(child, v) => {
                self.root.node = child;
                self.root.size -= 1;
                Some(v)
            }
        }
    }
}

/// In-order iterator over a map view, yielding `(key, &value)` with
/// strictly increasing keys.
pub struct LongMapIter<'a, V> {
    stack: Vec<Visit<'a, V>>,
}

enum Visit<'a, V> {
    Node(&'a Node<V>),
    Entry(&'a Entry<V>),
}

impl<'a, V> LongMapIter<'a, V> {
    fn new(root: &'a Child<V>) -> Self {
        let mut stack = Vec::new();
        if let Some(n) = root {
            stack.push(Visit::Node(n));
        }
        Self { stack }
    }

    fn descend(&mut self, node: &'a Node<V>) {
        // Push in reverse so the leftmost work pops first.
        match node {
            Node::Two { left, entry, right } => {
                if let Some(r) = right {
                    self.stack.push(Visit::Node(r));
                }
                self.stack.push(Visit::Entry(entry));
                if let Some(l) = left {
                    self.stack.push(Visit::Node(l));
                }
            }
            Node::Three {
                left,
                first,
                middle,
                second,
                right,
            } => {
                if let Some(r) = right {
                    self.stack.push(Visit::Node(r));
                }
                self.stack.push(Visit::Entry(second));
                if let Some(m) = middle {
                    self.stack.push(Visit::Node(m));
                }
                self.stack.push(Visit::Entry(first));
                if let Some(l) = left {
                    self.stack.push(Visit::Node(l));
                }
            }
        }
    }
}

impl<'a, V> Iterator for LongMapIter<'a, V> {
    type Item = (i64, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(visit) = self.stack.pop() {
            match visit {
                Visit::Entry(e) => return Some((e.key, &e.value)),
                Visit::Node(n) => self.descend(n),
            }
        }
        None
    }
}
