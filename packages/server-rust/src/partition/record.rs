//! The partition record: per-partition state behind its mutex.
//!
//! A [`Partition`] is the unit of mutual exclusion. Role derivation is a
//! predicate over several fields (replica list, origin, target), so every
//! multi-field read must happen under the lock; single-field atomics would
//! not be enough. The lock is held only long enough to compute a role, take
//! tree refcounts, and snapshot into a reservation -- never across network,
//! storage, or tree operations beyond refcount and size.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use atoll_core::{NodeId, PartitionVersion};

use crate::partition::types::{LegacyState, LegacyVersion, Regime, RegimeState};
use crate::storage::RecordTree;

// ---------------------------------------------------------------------------
// Partition
// ---------------------------------------------------------------------------

/// One partition of a namespace: an immutable id plus locked mutable state.
pub struct Partition {
    id: u32,
    inner: Mutex<PartitionInner>,
}

impl Partition {
    /// One-time setup: zeroed record under `regime`. Trees are attached by
    /// the namespace during init (created cold or resumed warm).
    pub(crate) fn new(id: u32, regime: Regime) -> Self {
        Self {
            id,
            inner: Mutex::new(PartitionInner {
                replicas: Vec::new(),
                origin: NodeId::ZERO,
                target: NodeId::ZERO,
                dupls: Vec::new(),
                pending_emigrations: 0,
                pending_immigrations: 0,
                cluster_key: 0,
                regime: RegimeState::initial(regime),
                tree: None,
                sub_tree: None,
                n_tombstones: 0,
                current_outgoing_ldt_version: 0,
            }),
        }
    }

    /// Partition id, immutable for the process lifetime.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Acquires the partition lock, blocking without a deadline.
    pub fn lock(&self) -> MutexGuard<'_, PartitionInner> {
        self.inner.lock()
    }

    /// Acquires the partition lock with a deadline.
    pub(crate) fn try_lock_for(&self, timeout: Duration) -> Option<MutexGuard<'_, PartitionInner>> {
        self.inner.try_lock_for(timeout)
    }
}

impl std::fmt::Debug for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Partition").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// PartitionInner
// ---------------------------------------------------------------------------

/// Mutable partition state, guarded by the partition mutex.
///
/// Mutations go through the setters below, which enforce the structural
/// invariants; inconsistencies they catch are fatal rather than carried
/// forward as corrupt state.
pub struct PartitionInner {
    /// Ordered replica list. Index 0 is the final master; entries above 0
    /// are proles. A zero entry means no node is assigned at that rank.
    replicas: Vec<NodeId>,
    /// Nonzero on a final master: the working master is that other node and
    /// this node is an eventual master awaiting handover.
    origin: NodeId,
    /// Nonzero: this node is an acting master on behalf of `target`, the
    /// eventual final master.
    target: NodeId,
    /// Nodes holding duplicate-resolution versions that must be consulted
    /// before returning authoritative data.
    dupls: Vec<NodeId>,
    pending_emigrations: u32,
    pending_immigrations: u32,
    /// Cluster-configuration epoch under which this state was set.
    cluster_key: u64,
    regime: RegimeState,
    tree: Option<Arc<RecordTree>>,
    sub_tree: Option<Arc<RecordTree>>,
    n_tombstones: u64,
    current_outgoing_ldt_version: u64,
}

impl PartitionInner {
    // -- accessors --

    #[must_use]
    pub fn replicas(&self) -> &[NodeId] {
        &self.replicas
    }

    #[must_use]
    pub fn n_replicas(&self) -> u32 {
        self.replicas.len() as u32
    }

    #[must_use]
    pub fn origin(&self) -> NodeId {
        self.origin
    }

    #[must_use]
    pub fn target(&self) -> NodeId {
        self.target
    }

    #[must_use]
    pub fn dupls(&self) -> &[NodeId] {
        &self.dupls
    }

    #[must_use]
    pub fn pending_emigrations(&self) -> u32 {
        self.pending_emigrations
    }

    #[must_use]
    pub fn pending_immigrations(&self) -> u32 {
        self.pending_immigrations
    }

    #[must_use]
    pub fn cluster_key(&self) -> u64 {
        self.cluster_key
    }

    #[must_use]
    pub fn regime(&self) -> &RegimeState {
        &self.regime
    }

    #[must_use]
    pub fn tree(&self) -> Option<&Arc<RecordTree>> {
        self.tree.as_ref()
    }

    #[must_use]
    pub fn sub_tree(&self) -> Option<&Arc<RecordTree>> {
        self.sub_tree.as_ref()
    }

    #[must_use]
    pub fn n_tombstones(&self) -> u64 {
        self.n_tombstones
    }

    #[must_use]
    pub fn current_outgoing_ldt_version(&self) -> u64 {
        self.current_outgoing_ldt_version
    }

    // -- role derivation --

    /// Index of `self_node` in the replica list, if present.
    #[must_use]
    pub fn find_self_in_replicas(&self, self_node: NodeId) -> Option<usize> {
        self.replicas.iter().position(|&n| n == self_node)
    }

    /// Whether `self_node` is the final master: the rank-0 replica.
    #[must_use]
    pub fn is_final_master(&self, self_node: NodeId) -> bool {
        self.replicas.first() == Some(&self_node)
    }

    /// Whether `self_node` currently serves writes for this partition:
    /// either the final master with no handover pending, or an acting
    /// master on behalf of the eventual final master.
    #[must_use]
    pub fn is_working_master(&self, self_node: NodeId) -> bool {
        (self.is_final_master(self_node) && self.origin.is_zero()) || !self.target.is_zero()
    }

    /// This node's usable replica rank, or `None` if it cannot serve.
    ///
    /// A working master resolves to rank 0 regardless of its list position.
    /// A prole resolves to its list rank only while no handover is pending
    /// and its rank is below the namespace's current replication factor;
    /// the guard tolerates the window where the replica list leads the
    /// replication factor during reconfiguration.
    #[must_use]
    pub fn self_replica_rank(&self, self_node: NodeId, replication_factor: u32) -> Option<u32> {
        let rank = self.find_self_in_replicas(self_node);
        if self.is_working_master(self_node) {
            return Some(0);
        }
        match rank {
            Some(r) if r > 0 && self.origin.is_zero() && (r as u32) < replication_factor => {
                Some(r as u32)
            }
            _ => None,
        }
    }

    /// The node best placed to handle a request on this partition.
    ///
    /// Writes funnel to the working master; reads may also be served by a
    /// sync prole; during handover both are redirected to the acting
    /// master. Anything else falls back to the final master.
    #[must_use]
    pub fn best_node(&self, self_node: NodeId, is_read: bool) -> NodeId {
        let rank = self.find_self_in_replicas(self_node);
        let is_final_master = rank == Some(0);
        let is_prole = rank.is_some_and(|r| r > 0);

        if self.is_working_master(self_node) {
            return self_node;
        }
        if is_final_master {
            // origin is nonzero here: the acting master is elsewhere.
            return self.origin;
        }
        if is_read && is_prole && self.origin.is_zero() {
            return self_node;
        }
        self.replicas.first().copied().unwrap_or(NodeId::ZERO)
    }

    // -- balancer mutation surface --

    /// Replaces the replica list.
    ///
    /// # Panics
    ///
    /// Panics if a nonzero node appears twice -- a replica plan in which a
    /// node holds two ranks is corrupt.
    pub fn set_replicas(&mut self, replicas: Vec<NodeId>) {
        for (i, &node) in replicas.iter().enumerate() {
            if !node.is_zero() {
                assert!(
                    !replicas[..i].contains(&node),
                    "node {node} appears twice in replica list for one partition"
                );
            }
        }
        self.replicas = replicas;
    }

    /// Sets the eventual-master redirection.
    ///
    /// # Panics
    ///
    /// Panics if `target` is also nonzero: a partition cannot be both an
    /// eventual master and an acting master.
    pub fn set_origin(&mut self, origin: NodeId) {
        assert!(
            origin.is_zero() || self.target.is_zero(),
            "origin {origin} set while target {} is live",
            self.target
        );
        self.origin = origin;
    }

    /// Sets the acting-master designation.
    ///
    /// # Panics
    ///
    /// Panics if `origin` is also nonzero (see [`Self::set_origin`]).
    pub fn set_target(&mut self, target: NodeId) {
        assert!(
            target.is_zero() || self.origin.is_zero(),
            "target {target} set while origin {} is live",
            self.origin
        );
        self.target = target;
    }

    pub fn set_dupls(&mut self, dupls: Vec<NodeId>) {
        self.dupls = dupls;
    }

    pub fn set_pending_emigrations(&mut self, n: u32) {
        self.pending_emigrations = n;
    }

    pub fn set_pending_immigrations(&mut self, n: u32) {
        self.pending_immigrations = n;
    }

    pub fn set_cluster_key(&mut self, cluster_key: u64) {
        self.cluster_key = cluster_key;
    }

    /// Sets the modern-regime version.
    ///
    /// # Panics
    ///
    /// Panics under the legacy regime.
    pub fn set_version(&mut self, new: PartitionVersion) {
        match &mut self.regime {
            RegimeState::Modern { version, .. } => *version = new,
            RegimeState::Legacy { .. } => panic!("version set on a legacy-regime partition"),
        }
    }

    /// Sets the modern-regime final version.
    ///
    /// # Panics
    ///
    /// Panics under the legacy regime.
    pub fn set_final_version(&mut self, new: PartitionVersion) {
        match &mut self.regime {
            RegimeState::Modern { final_version, .. } => *final_version = new,
            RegimeState::Legacy { .. } => panic!("final version set on a legacy-regime partition"),
        }
    }

    /// Sets the legacy-regime discrete state.
    ///
    /// # Panics
    ///
    /// Panics under the modern regime.
    pub fn set_legacy_state(&mut self, new: LegacyState) {
        match &mut self.regime {
            RegimeState::Legacy { state, .. } => *state = new,
            RegimeState::Modern { .. } => panic!("legacy state set on a modern-regime partition"),
        }
    }

    /// Sets the legacy-regime version info.
    ///
    /// # Panics
    ///
    /// Panics under the modern regime.
    pub fn set_version_info(&mut self, new: LegacyVersion) {
        match &mut self.regime {
            RegimeState::Legacy { version_info, .. } => *version_info = new,
            RegimeState::Modern { .. } => panic!("version info set on a modern-regime partition"),
        }
    }

    /// Sets the legacy-regime primary version info.
    ///
    /// # Panics
    ///
    /// Panics under the modern regime.
    pub fn set_primary_version_info(&mut self, new: LegacyVersion) {
        match &mut self.regime {
            RegimeState::Legacy {
                primary_version_info,
                ..
            } => *primary_version_info = new,
            RegimeState::Modern { .. } => {
                panic!("primary version info set on a modern-regime partition");
            }
        }
    }

    pub fn set_current_outgoing_ldt_version(&mut self, version: u64) {
        self.current_outgoing_ldt_version = version;
    }

    // -- tombstone bookkeeping --

    pub fn set_n_tombstones(&mut self, n: u64) {
        self.n_tombstones = n;
    }

    pub fn increment_tombstones(&mut self) {
        self.n_tombstones += 1;
    }

    pub fn decrement_tombstones(&mut self) {
        self.n_tombstones = self.n_tombstones.saturating_sub(1);
    }

    // -- tree lifecycle (namespace init/shutdown only) --

    pub(crate) fn attach_trees(
        &mut self,
        tree: Arc<RecordTree>,
        sub_tree: Option<Arc<RecordTree>>,
    ) {
        self.tree = Some(tree);
        self.sub_tree = sub_tree;
    }

    pub(crate) fn detach_trees(&mut self) -> (Option<Arc<RecordTree>>, Option<Arc<RecordTree>>) {
        (self.tree.take(), self.sub_tree.take())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
