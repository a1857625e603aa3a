//! 2-3 tree nodes and the path-copying algorithms over them.
//!
//! Nodes are immutable and shared by `Arc`. Every mutation rebuilds the
//! nodes along the search path and reuses every untouched subtree by
//! reference, so forks of the tree are cheap and safe to read from any
//! thread.
//!
//! Children are uniformly present (interior node) or absent (leaf);
//! all leaves sit at the same depth. Insertion splits overfull nodes on
//! the way up. Deletion propagates a one-level-short "shrunk" subtree
//! that is repaired by rotating an entry from a 3-node sibling or by
//! merging with a 2-node sibling; interior removals substitute the
//! successor pulled from the right subtree's minimum.

use std::sync::Arc;

/// A key/value pair stored in a node.
pub(super) struct Entry<V> {
    pub(super) key: i64,
    pub(super) value: V,
}

impl<V: Clone> Clone for Entry<V> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            value: self.value.clone(),
        }
    }
}

/// A subtree; `None` is the empty tree.
pub(super) type Child<V> = Option<Arc<Node<V>>>;

/// A 2-node (one entry) or 3-node (two ordered entries).
pub(super) enum Node<V> {
    Two {
        left: Child<V>,
        entry: Entry<V>,
        right: Child<V>,
    },
    Three {
        left: Child<V>,
        first: Entry<V>,
        middle: Child<V>,
        second: Entry<V>,
        right: Child<V>,
    },
}

fn two<V>(left: Child<V>, entry: Entry<V>, right: Child<V>) -> Arc<Node<V>> {
    Arc::new(Node::Two { left, entry, right })
}

fn three<V>(
    left: Child<V>,
    first: Entry<V>,
    middle: Child<V>,
    second: Entry<V>,
    right: Child<V>,
) -> Arc<Node<V>> {
    Arc::new(Node::Three {
        left,
        first,
        middle,
        second,
        right,
    })
}

pub(super) fn leaf<V>(entry: Entry<V>) -> Arc<Node<V>> {
    two(None, entry, None)
}

/// Looks up `key`, comparing keys as signed 64-bit integers.
pub(super) fn get<V>(mut node: &Node<V>, key: i64) -> Option<&V> {
    loop {
        let child = match node {
            Node::Two { left, entry, right } => {
                if key == entry.key {
                    return Some(&entry.value);
                }
                if key < entry.key {
                    left
                } else {
                    right
                }
            }
            Node::Three {
                left,
                first,
                middle,
                second,
                right,
            } => {
                if key == first.key {
                    return Some(&first.value);
                }
                if key == second.key {
                    return Some(&second.value);
                }
                if key < first.key {
                    left
                } else if key < second.key {
                    middle
                } else {
                    right
                }
            }
        };
        match child {
            Some(c) => node = c,
            None => return None,
        }
    }
}

/// Result of inserting into a subtree.
pub(super) enum Inserted<V> {
    /// New subtree of the same height.
    Node(Arc<Node<V>>),
    /// The subtree split; the entry moves up to the parent.
    Split(Arc<Node<V>>, Entry<V>, Arc<Node<V>>),
}

/// Inserts `entry`, returning the rebuilt subtree and the previous
/// value when the key was already present.
pub(super) fn insert<V: Clone>(node: &Node<V>, entry: Entry<V>) -> (Inserted<V>, Option<V>) {
    match node {
        Node::Two {
            left,
            entry: e,
            right,
        } => {
            if entry.key == e.key {
                let old = e.value.clone();
                (
                    Inserted::Node(two(left.clone(), entry, right.clone())),
                    Some(old),
                )
            } else if entry.key < e.key {
                match left {
                    None => (
                        Inserted::Node(three(None, entry, None, e.clone(), None)),
                        None,
                    ),
                    Some(l) => {
                        let (inserted, old) = insert(l, entry);
                        let node = match inserted {
                            Inserted::Node(n) => two(Some(n), e.clone(), right.clone()),
                            Inserted::Split(a, up, b) => {
                                three(Some(a), up, Some(b), e.clone(), right.clone())
                            }
                        };
                        (Inserted::Node(node), old)
                    }
                }
            } else {
                match right {
                    None => (
                        Inserted::Node(three(None, e.clone(), None, entry, None)),
                        None,
                    ),
                    Some(r) => {
                        let (inserted, old) = insert(r, entry);
                        let node = match inserted {
                            Inserted::Node(n) => two(left.clone(), e.clone(), Some(n)),
                            Inserted::Split(a, up, b) => {
                                three(left.clone(), e.clone(), Some(a), up, Some(b))
                            }
                        };
                        (Inserted::Node(node), old)
                    }
                }
            }
        }
        Node::Three {
            left,
            first,
            middle,
            second,
            right,
        } => {
            if entry.key == first.key {
                let old = first.value.clone();
                (
                    Inserted::Node(three(
                        left.clone(),
                        entry,
                        middle.clone(),
                        second.clone(),
                        right.clone(),
                    )),
                    Some(old),
                )
            } else if entry.key == second.key {
                let old = second.value.clone();
                (
                    Inserted::Node(three(
                        left.clone(),
                        first.clone(),
                        middle.clone(),
                        entry,
                        right.clone(),
                    )),
                    Some(old),
                )
            } else if entry.key < first.key {
                match left {
                    None => (
                        Inserted::Split(leaf(entry), first.clone(), leaf(second.clone())),
                        None,
                    ),
                    Some(l) => {
                        let (inserted, old) = insert(l, entry);
                        match inserted {
                            Inserted::Node(n) => (
                                Inserted::Node(three(
                                    Some(n),
                                    first.clone(),
                                    middle.clone(),
                                    second.clone(),
                                    right.clone(),
                                )),
                                old,
                            ),
                            Inserted::Split(a, up, b) => (
                                Inserted::Split(
                                    two(Some(a), up, Some(b)),
                                    first.clone(),
                                    two(middle.clone(), second.clone(), right.clone()),
                                ),
                                old,
                            ),
                        }
                    }
                }
            } else if entry.key < second.key {
                match middle {
                    None => (
                        Inserted::Split(leaf(first.clone()), entry, leaf(second.clone())),
                        None,
                    ),
                    Some(m) => {
                        let (inserted, old) = insert(m, entry);
                        match inserted {
                            Inserted::Node(n) => (
                                Inserted::Node(three(
                                    left.clone(),
                                    first.clone(),
                                    Some(n),
                                    second.clone(),
                                    right.clone(),
                                )),
                                old,
                            ),
                            Inserted::Split(a, up, b) => (
                                Inserted::Split(
                                    two(left.clone(), first.clone(), Some(a)),
                                    up,
                                    two(Some(b), second.clone(), right.clone()),
                                ),
                                old,
                            ),
                        }
                    }
                }
            } else {
                match right {
                    None => (
                        Inserted::Split(leaf(first.clone()), second.clone(), leaf(entry)),
                        None,
                    ),
                    Some(r) => {
                        let (inserted, old) = insert(r, entry);
                        match inserted {
                            Inserted::Node(n) => (
                                Inserted::Node(three(
                                    left.clone(),
                                    first.clone(),
                                    middle.clone(),
                                    second.clone(),
                                    Some(n),
                                )),
                                old,
                            ),
                            Inserted::Split(a, up, b) => (
                                Inserted::Split(
                                    two(left.clone(), first.clone(), middle.clone()),
                                    second.clone(),
                                    two(Some(a), up, Some(b)),
                                ),
                                old,
                            ),
                        }
                    }
                }
            }
        }
    }
}

/// Result of removing from a subtree.
pub(super) enum Removed<V> {
    /// Key absent; nothing changed.
    NotFound,
    /// New subtree of the same height.
    Node(Arc<Node<V>>, V),
    /// New subtree one level shorter (`None` when it became empty).
    Shrunk(Child<V>, V),
}

enum RemovedMin<V> {
    Node(Arc<Node<V>>, Entry<V>),
    Shrunk(Child<V>, Entry<V>),
}

/// Result of repairing a node whose child lost a level.
enum Balanced<V> {
    Node(Arc<Node<V>>),
    Shrunk(Arc<Node<V>>),
}

fn balanced_to_removed<V>(balanced: Balanced<V>, value: V) -> Removed<V> {
    match balanced {
        Balanced::Node(n) => Removed::Node(n, value),
        Balanced::Shrunk(n) => Removed::Shrunk(Some(n), value),
    }
}

/// Removes `key`, returning the rebuilt subtree and the removed value.
pub(super) fn remove<V: Clone>(node: &Node<V>, key: i64) -> Removed<V> {
    match node {
        Node::Two {
            left: Some(l),
            entry,
            right: Some(r),
        } => {
            if key < entry.key {
                match remove(l, key) {
                    Removed::NotFound => Removed::NotFound,
                    Removed::Node(n, v) => {
                        Removed::Node(two(Some(n), entry.clone(), Some(r.clone())), v)
                    }
                    Removed::Shrunk(h, v) => {
                        balanced_to_removed(fix_two_left(h, entry.clone(), r), v)
                    }
                }
            } else if key > entry.key {
                match remove(r, key) {
                    Removed::NotFound => Removed::NotFound,
                    Removed::Node(n, v) => {
                        Removed::Node(two(Some(l.clone()), entry.clone(), Some(n)), v)
                    }
                    Removed::Shrunk(h, v) => {
                        balanced_to_removed(fix_two_right(l, entry.clone(), h), v)
                    }
                }
            } else {
                // Substitute the successor for the removed entry.
                let removed = entry.value.clone();
                match remove_min(r) {
                    RemovedMin::Node(n, min) => {
                        Removed::Node(two(Some(l.clone()), min, Some(n)), removed)
                    }
                    RemovedMin::Shrunk(h, min) => {
                        balanced_to_removed(fix_two_right(l, min, h), removed)
                    }
                }
            }
        }
        Node::Two { entry, .. } => {
            if key == entry.key {
                Removed::Shrunk(None, entry.value.clone())
            } else {
                Removed::NotFound
            }
        }
        Node::Three {
            left: Some(l),
            first,
            middle: Some(m),
            second,
            right: Some(r),
        } => {
            if key < first.key {
                match remove(l, key) {
                    Removed::NotFound => Removed::NotFound,
                    Removed::Node(n, v) => Removed::Node(
                        three(
                            Some(n),
                            first.clone(),
                            Some(m.clone()),
                            second.clone(),
                            Some(r.clone()),
                        ),
                        v,
                    ),
                    Removed::Shrunk(h, v) => {
                        Removed::Node(fix_three_left(h, first.clone(), m, second.clone(), r), v)
                    }
                }
            } else if key == first.key {
                let removed = first.value.clone();
                match remove_min(m) {
                    RemovedMin::Node(n, min) => Removed::Node(
                        three(
                            Some(l.clone()),
                            min,
                            Some(n),
                            second.clone(),
                            Some(r.clone()),
                        ),
                        removed,
                    ),
                    RemovedMin::Shrunk(h, min) => {
                        Removed::Node(fix_three_middle(l, min, h, second.clone(), r), removed)
                    }
                }
            } else if key < second.key {
                match remove(m, key) {
                    Removed::NotFound => Removed::NotFound,
                    Removed::Node(n, v) => Removed::Node(
                        three(
                            Some(l.clone()),
                            first.clone(),
                            Some(n),
                            second.clone(),
                            Some(r.clone()),
                        ),
                        v,
                    ),
                    Removed::Shrunk(h, v) => {
                        Removed::Node(fix_three_middle(l, first.clone(), h, second.clone(), r), v)
                    }
                }
            } else if key == second.key {
                let removed = second.value.clone();
                match remove_min(r) {
                    RemovedMin::Node(n, min) => Removed::Node(
                        three(
                            Some(l.clone()),
                            first.clone(),
                            Some(m.clone()),
                            min,
                            Some(n),
                        ),
                        removed,
                    ),
                    RemovedMin::Shrunk(h, min) => {
                        Removed::Node(fix_three_right(l, first.clone(), m, min, h), removed)
                    }
                }
            } else {
                match remove(r, key) {
                    Removed::NotFound => Removed::NotFound,
                    Removed::Node(n, v) => Removed::Node(
                        three(
                            Some(l.clone()),
                            first.clone(),
                            Some(m.clone()),
                            second.clone(),
                            Some(n),
                        ),
                        v,
                    ),
                    Removed::Shrunk(h, v) => {
                        Removed::Node(fix_three_right(l, first.clone(), m, second.clone(), h), v)
                    }
                }
            }
        }
        Node::Three { first, second, .. } => {
            if key == first.key {
                Removed::Node(leaf(second.clone()), first.value.clone())
            } else if key == second.key {
                Removed::Node(leaf(first.clone()), second.value.clone())
            } else {
                Removed::NotFound
            }
        }
    }
}

/// Removes the smallest entry of a subtree.
fn remove_min<V: Clone>(node: &Node<V>) -> RemovedMin<V> {
    match node {
        Node::Two {
            left: Some(l),
            entry,
            right: Some(r),
        } => match remove_min(l) {
            RemovedMin::Node(n, min) => {
                RemovedMin::Node(two(Some(n), entry.clone(), Some(r.clone())), min)
            }
            RemovedMin::Shrunk(h, min) => match fix_two_left(h, entry.clone(), r) {
                Balanced::Node(n) => RemovedMin::Node(n, min),
                Balanced::Shrunk(n) => RemovedMin::Shrunk(Some(n), min),
            },
        },
        Node::Two { entry, .. } => RemovedMin::Shrunk(None, entry.clone()),
        Node::Three {
            left: Some(l),
            first,
            middle: Some(m),
            second,
            right: Some(r),
        } => match remove_min(l) {
            RemovedMin::Node(n, min) => RemovedMin::Node(
                three(
                    Some(n),
                    first.clone(),
                    Some(m.clone()),
                    second.clone(),
                    Some(r.clone()),
                ),
                min,
            ),
            RemovedMin::Shrunk(h, min) => {
                RemovedMin::Node(fix_three_left(h, first.clone(), m, second.clone(), r), min)
            }
        },
        Node::Three { first, second, .. } => {
            RemovedMin::Node(leaf(second.clone()), first.clone())
        }
    }
}

/// Repairs a 2-node whose left child lost a level.
fn fix_two_left<V: Clone>(
    hole: Child<V>,
    entry: Entry<V>,
    sibling: &Arc<Node<V>>,
) -> Balanced<V> {
    match sibling.as_ref() {
        Node::Three {
            left,
            first,
            middle,
            second,
            right,
        } => {
            // Rotate one entry through the parent.
            let new_left = two(hole, entry, left.clone());
            Balanced::Node(two(
                Some(new_left),
                first.clone(),
                Some(two(middle.clone(), second.clone(), right.clone())),
            ))
        }
        Node::Two {
            left,
            entry: sib,
            right,
        } => Balanced::Shrunk(three(
            hole,
            entry,
            left.clone(),
            sib.clone(),
            right.clone(),
        )),
    }
}

/// Repairs a 2-node whose right child lost a level.
fn fix_two_right<V: Clone>(
    sibling: &Arc<Node<V>>,
    entry: Entry<V>,
    hole: Child<V>,
) -> Balanced<V> {
    match sibling.as_ref() {
        Node::Three {
            left,
            first,
            middle,
            second,
            right,
        } => {
            let new_right = two(right.clone(), entry, hole);
            Balanced::Node(two(
                Some(two(left.clone(), first.clone(), middle.clone())),
                second.clone(),
                Some(new_right),
            ))
        }
        Node::Two {
            left,
            entry: sib,
            right,
        } => Balanced::Shrunk(three(
            left.clone(),
            sib.clone(),
            right.clone(),
            entry,
            hole,
        )),
    }
}

/// Repairs a 3-node whose left child lost a level. A 3-node always
/// absorbs the deficit without shrinking.
fn fix_three_left<V: Clone>(
    hole: Child<V>,
    first: Entry<V>,
    middle: &Arc<Node<V>>,
    second: Entry<V>,
    right: &Arc<Node<V>>,
) -> Arc<Node<V>> {
    match middle.as_ref() {
        Node::Three {
            left: ml,
            first: m1,
            middle: mm,
            second: m2,
            right: mr,
        } => {
            let new_left = two(hole, first, ml.clone());
            three(
                Some(new_left),
                m1.clone(),
                Some(two(mm.clone(), m2.clone(), mr.clone())),
                second,
                Some(right.clone()),
            )
        }
        Node::Two {
            left: ml,
            entry: me,
            right: mr,
        } => {
            let merged = three(hole, first, ml.clone(), me.clone(), mr.clone());
            two(Some(merged), second, Some(right.clone()))
        }
    }
}

/// Repairs a 3-node whose middle child lost a level.
fn fix_three_middle<V: Clone>(
    left: &Arc<Node<V>>,
    first: Entry<V>,
    hole: Child<V>,
    second: Entry<V>,
    right: &Arc<Node<V>>,
) -> Arc<Node<V>> {
    match left.as_ref() {
        Node::Three {
            left: ll,
            first: l1,
            middle: lm,
            second: l2,
            right: lr,
        } => {
            let new_middle = two(lr.clone(), first, hole);
            three(
                Some(two(ll.clone(), l1.clone(), lm.clone())),
                l2.clone(),
                Some(new_middle),
                second,
                Some(right.clone()),
            )
        }
        Node::Two {
            left: ll,
            entry: le,
            right: lr,
        } => {
            let merged = three(ll.clone(), le.clone(), lr.clone(), first, hole);
            two(Some(merged), second, Some(right.clone()))
        }
    }
}

/// Repairs a 3-node whose right child lost a level.
fn fix_three_right<V: Clone>(
    left: &Arc<Node<V>>,
    first: Entry<V>,
    middle: &Arc<Node<V>>,
    second: Entry<V>,
    hole: Child<V>,
) -> Arc<Node<V>> {
    match middle.as_ref() {
        Node::Three {
            left: ml,
            first: m1,
            middle: mm,
            second: m2,
            right: mr,
        } => {
            let new_right = two(mr.clone(), second, hole);
            three(
                Some(left.clone()),
                first,
                Some(two(ml.clone(), m1.clone(), mm.clone())),
                m2.clone(),
                Some(new_right),
            )
        }
        Node::Two {
            left: ml,
            entry: me,
            right: mr,
        } => {
            let merged = three(ml.clone(), me.clone(), mr.clone(), second, hole);
            two(Some(left.clone()), first, Some(merged))
        }
    }
}
