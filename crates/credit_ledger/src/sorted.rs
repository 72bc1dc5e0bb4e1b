//! Doubly-linked index of Active positions, descending by NICR
//!
//! The list stores only ids and links. Keys are read through a `key_of`
//! callback at insertion time, so the list itself stores no ratios. An entry
//! is placed after every existing entry with an equal key.
//!
//! Keys that move for every entry at once (interest, redistribution) are
//! handled by [`SortedIndex::rebuild`].

use std::collections::BTreeMap;

use crate::error::{LedgerError, Result};
use crate::math::Amount;
use crate::position::Owner;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Node {
    prev: Option<Owner>,
    next: Option<Owner>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SortedIndex {
    nodes: BTreeMap<Owner, Node>,
    /// Highest NICR
    head: Option<Owner>,
    /// Lowest NICR
    tail: Option<Owner>,
}

impl SortedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: Owner) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn head(&self) -> Option<Owner> {
        self.head
    }

    pub fn tail(&self) -> Option<Owner> {
        self.tail
    }

    pub fn next(&self, id: Owner) -> Option<Owner> {
        self.nodes.get(&id).and_then(|n| n.next)
    }

    pub fn prev(&self, id: Owner) -> Option<Owner> {
        self.nodes.get(&id).and_then(|n| n.prev)
    }

    /// Ids from head (highest key) to tail
    pub fn iter(&self) -> Iter<'_> {
        Iter { index: self, cursor: self.head }
    }

    /// Insert `id` with `key`, starting the search at `hint`.
    ///
    /// A missing or stale hint falls back to the head; a good hint makes the
    /// walk short. `key_of` must return the live key of any listed id.
    pub fn insert<K>(&mut self, id: Owner, key: Amount, hint: Option<Owner>, key_of: K) -> Result<()>
    where
        K: Fn(Owner) -> Amount,
    {
        if self.contains(id) {
            return Err(LedgerError::IndexConflict);
        }

        let start = match hint {
            Some(h) if self.contains(h) => Some(h),
            _ => self.head,
        };
        let (prev, next) = match start {
            None => (None, None),
            Some(start) => self.find_slot(start, key, &key_of),
        };
        self.link(id, prev, next);
        Ok(())
    }

    /// Neighbours between which `key` belongs, walking from `start`
    fn find_slot<K>(&self, start: Owner, key: Amount, key_of: &K) -> (Option<Owner>, Option<Owner>)
    where
        K: Fn(Owner) -> Amount,
    {
        if key_of(start) >= key {
            // walk toward the tail past every entry whose key is still >= key
            let mut cur = start;
            while let Some(next) = self.next(cur) {
                if key_of(next) < key {
                    break;
                }
                cur = next;
            }
            (Some(cur), self.next(cur))
        } else {
            // walk toward the head while the predecessor is still < key
            let mut cur = start;
            while let Some(prev) = self.prev(cur) {
                if key_of(prev) >= key {
                    break;
                }
                cur = prev;
            }
            (self.prev(cur), Some(cur))
        }
    }

    fn link(&mut self, id: Owner, prev: Option<Owner>, next: Option<Owner>) {
        self.nodes.insert(id, Node { prev, next });
        match prev {
            Some(p) => {
                if let Some(node) = self.nodes.get_mut(&p) {
                    node.next = Some(id);
                }
            }
            None => self.head = Some(id),
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes.get_mut(&n) {
                    node.prev = Some(id);
                }
            }
            None => self.tail = Some(id),
        }
    }

    /// Unlink `id` in O(1)
    pub fn remove(&mut self, id: Owner) -> Result<()> {
        let node = self.nodes.remove(&id).ok_or(LedgerError::IndexConflict)?;
        match node.prev {
            Some(p) => {
                if let Some(prev) = self.nodes.get_mut(&p) {
                    prev.next = node.next;
                }
            }
            None => self.head = node.next,
        }
        match node.next {
            Some(n) => {
                if let Some(next) = self.nodes.get_mut(&n) {
                    next.prev = node.prev;
                }
            }
            None => self.tail = node.prev,
        }
        Ok(())
    }

    /// Move `id` to the slot for its new key
    pub fn reinsert<K>(&mut self, id: Owner, key: Amount, hint: Option<Owner>, key_of: K) -> Result<()>
    where
        K: Fn(Owner) -> Amount,
    {
        self.remove(id)?;
        let hint = hint.filter(|h| *h != id);
        self.insert(id, key, hint, key_of)
    }

    /// Relink every entry by its current key. Entries with equal keys keep
    /// their relative order.
    pub fn rebuild<K>(&mut self, key_of: K)
    where
        K: Fn(Owner) -> Amount,
    {
        let mut entries: Vec<(Owner, Amount)> = self.iter().map(|id| (id, key_of(id))).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));

        self.nodes.clear();
        self.head = None;
        self.tail = None;
        let mut prev = None;
        for (id, _) in entries {
            self.link(id, prev, None);
            prev = Some(id);
        }
    }

    /// Keys never increase from head to tail
    pub fn is_sorted_by<K>(&self, key_of: K) -> bool
    where
        K: Fn(Owner) -> Amount,
    {
        let keys: Vec<Amount> = self.iter().map(key_of).collect();
        keys.windows(2).all(|w| w[0] >= w[1])
    }
}

pub struct Iter<'a> {
    index: &'a SortedIndex,
    cursor: Option<Owner>,
}

impl Iterator for Iter<'_> {
    type Item = Owner;

    fn next(&mut self) -> Option<Owner> {
        let current = self.cursor?;
        self.cursor = self.index.next(current);
        Some(current)
    }
}
