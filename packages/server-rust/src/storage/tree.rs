//! Record-index trees.
//!
//! A [`RecordTree`] is the ordered index backing one partition: record
//! digests mapped to their index entries. Trees are shared by reference
//! counting -- the `Arc` around a tree *is* its refcount. A partition holds
//! one handle for its lifetime; every reservation holds another for the
//! reservation's lifetime. A tree is destroyed only when the last handle
//! drops, which cannot happen while any reservation pins it.
//!
//! The [`TreeAllocator`] is the process-wide factory: it creates empty trees
//! on cold start, resumes them from persisted-root slots on warm restart,
//! and takes them back (recording the root into the slot) at shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use atoll_core::Digest;

// ---------------------------------------------------------------------------
// TreeSlot
// ---------------------------------------------------------------------------

/// Persisted-root slot for one tree of one partition.
///
/// The storage layer hands these in at warm restart and receives them back,
/// filled in, at shutdown. A zero root means the tree was never persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TreeSlot {
    pub root: u64,
}

// ---------------------------------------------------------------------------
// RecordTree
// ---------------------------------------------------------------------------

/// Per-record bookkeeping kept in the index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordEntry {
    /// Write generation, bumped on every update to the record.
    pub generation: u32,
}

/// Reference-counted ordered index of record digests.
pub struct RecordTree {
    root: u64,
    index: RwLock<BTreeMap<Digest, RecordEntry>>,
}

impl RecordTree {
    fn new(root: u64) -> Self {
        Self {
            root,
            index: RwLock::new(BTreeMap::new()),
        }
    }

    /// Root id this tree persists under.
    #[must_use]
    pub fn root(&self) -> u64 {
        self.root
    }

    /// Number of records in the index.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.index.read().len() as u64
    }

    /// Whether the index holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Inserts a record, returning `true` if the digest was not yet present.
    ///
    /// An existing record has its generation bumped instead.
    pub fn insert(&self, digest: Digest) -> bool {
        let mut index = self.index.write();
        match index.get_mut(&digest) {
            Some(entry) => {
                entry.generation = entry.generation.wrapping_add(1);
                false
            }
            None => {
                index.insert(digest, RecordEntry::default());
                true
            }
        }
    }

    /// Removes a record, returning its entry if it was present.
    pub fn remove(&self, digest: &Digest) -> Option<RecordEntry> {
        self.index.write().remove(digest)
    }

    /// Looks up a record's entry.
    #[must_use]
    pub fn get(&self, digest: &Digest) -> Option<RecordEntry> {
        self.index.read().get(digest).copied()
    }
}

impl std::fmt::Debug for RecordTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordTree")
            .field("root", &self.root)
            .field("size", &self.size())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TreeAllocator
// ---------------------------------------------------------------------------

/// Process-wide tree factory and restart stash.
///
/// Shutdown hands each partition's trees in here keyed by root id; a warm
/// restart takes them back out via the persisted slots. Partitions shut down
/// and resume concurrently, so the stash is a concurrent map.
pub struct TreeAllocator {
    next_root: AtomicU64,
    stash: DashMap<u64, Arc<RecordTree>>,
}

impl TreeAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_root: AtomicU64::new(1),
            stash: DashMap::new(),
        }
    }

    /// Creates an empty tree under a fresh root id (cold start).
    #[must_use]
    pub fn create(&self) -> Arc<RecordTree> {
        let root = self.next_root.fetch_add(1, Ordering::Relaxed);
        Arc::new(RecordTree::new(root))
    }

    /// Resumes the tree persisted under `slot` (warm restart).
    ///
    /// An unknown or never-persisted root yields a fresh empty tree; the
    /// partition starts cold in that case.
    #[must_use]
    pub fn resume(&self, slot: TreeSlot) -> Arc<RecordTree> {
        if slot.root != 0 {
            // Keep fresh root ids clear of everything already persisted.
            self.next_root.fetch_max(slot.root + 1, Ordering::Relaxed);
            if let Some((_, tree)) = self.stash.remove(&slot.root) {
                return tree;
            }
            return Arc::new(RecordTree::new(slot.root));
        }
        self.create()
    }

    /// Takes a tree back at shutdown, recording its root into `slot`.
    pub fn shutdown(&self, tree: &Arc<RecordTree>, slot: &mut TreeSlot) {
        slot.root = tree.root();
        self.stash.insert(tree.root(), Arc::clone(tree));
    }

    /// Number of trees currently stashed (shutdown but not yet resumed).
    #[must_use]
    pub fn stashed(&self) -> usize {
        self.stash.len()
    }
}

impl Default for TreeAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
