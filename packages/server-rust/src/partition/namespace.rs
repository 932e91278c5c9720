//! The namespace: a fixed array of partitions plus shared partition state.
//!
//! Partitions are created once at namespace init and live for the process
//! lifetime. Cold start creates empty trees; warm restart resumes them from
//! the persisted roots carried in the config. Shutdown locks each partition,
//! hands its trees back to the storage layer with their root slots, and
//! deliberately leaves the lock held -- the process is terminating and late
//! callers must block rather than observe detached trees.

use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use atoll_core::{NodeId, PARTITION_COUNT};

use crate::config::{NamespaceConfig, TreeRoots};
use crate::partition::record::{Partition, PartitionInner};
use crate::partition::replica_map::ClientReplicaMaps;
use crate::partition::types::Regime;
use crate::storage::TreeAllocator;

/// One namespace's partition table and client replica maps.
pub struct Namespace {
    name: String,
    self_node: NodeId,
    regime: Regime,
    configured_replication_factor: u32,
    /// Current replication factor; may lag the configured value while the
    /// cluster reconfigures. Written by the balancer, read everywhere.
    replication_factor: AtomicU32,
    sub_tree_enabled: bool,
    tree_allocator: Arc<TreeAllocator>,
    partitions: Vec<Partition>,
    replica_maps: ClientReplicaMaps,
}

impl Namespace {
    /// Builds the namespace and its partition array from config.
    ///
    /// `self_node` is the process-wide node identity, passed in explicitly.
    pub fn new(
        config: &NamespaceConfig,
        self_node: NodeId,
        tree_allocator: Arc<TreeAllocator>,
    ) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        anyhow::ensure!(!self_node.is_zero(), "self node id must be nonzero");

        let ns = Self {
            name: config.name.clone(),
            self_node,
            regime: config.regime,
            configured_replication_factor: config.replication_factor,
            replication_factor: AtomicU32::new(config.replication_factor),
            sub_tree_enabled: config.sub_tree_enabled,
            tree_allocator: Arc::clone(&tree_allocator),
            partitions: (0..PARTITION_COUNT)
                .map(|pid| Partition::new(pid, config.regime))
                .collect(),
            replica_maps: ClientReplicaMaps::new(config.replication_factor),
        };

        let warm = config.tree_roots.is_some();
        for partition in &ns.partitions {
            let pid = partition.id() as usize;
            let tree = match &config.tree_roots {
                Some(roots) => tree_allocator.resume(roots.primary[pid]),
                None => tree_allocator.create(),
            };
            let sub_tree = ns.sub_tree_enabled.then(|| {
                match config.tree_roots.as_ref().and_then(|r| r.sub.as_ref()) {
                    Some(sub) => tree_allocator.resume(sub[pid]),
                    None => tree_allocator.create(),
                }
            });
            partition.lock().attach_trees(tree, sub_tree);
        }

        info!(
            namespace = %ns.name,
            node = %self_node,
            replication_factor = config.replication_factor,
            warm,
            "namespace partitions initialized"
        );
        Ok(Arc::new(ns))
    }

    // -- plain accessors --

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn self_node(&self) -> NodeId {
        self.self_node
    }

    #[must_use]
    pub fn regime(&self) -> Regime {
        self.regime
    }

    #[must_use]
    pub fn configured_replication_factor(&self) -> u32 {
        self.configured_replication_factor
    }

    #[must_use]
    pub fn replication_factor(&self) -> u32 {
        self.replication_factor.load(Ordering::Relaxed)
    }

    /// Balancer entry point for reconfiguring the current replication
    /// factor. Never exceeds the configured target.
    pub fn set_replication_factor(&self, replication_factor: u32) {
        assert!(
            (1..=self.configured_replication_factor).contains(&replication_factor),
            "replication factor {replication_factor} outside [1, {}]",
            self.configured_replication_factor
        );
        self.replication_factor
            .store(replication_factor, Ordering::Relaxed);
    }

    #[must_use]
    pub fn sub_tree_enabled(&self) -> bool {
        self.sub_tree_enabled
    }

    #[must_use]
    pub fn replica_maps(&self) -> &ClientReplicaMaps {
        &self.replica_maps
    }

    /// The partition record for `pid`.
    ///
    /// # Panics
    ///
    /// Panics if `pid` is out of range.
    #[must_use]
    pub fn partition(&self, pid: u32) -> &Partition {
        assert!(pid < PARTITION_COUNT, "partition id {pid} out of range");
        &self.partitions[pid as usize]
    }

    /// All partitions, in id order.
    #[must_use]
    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    // -- role derivation over locked state --

    /// This node's usable replica rank for a locked partition.
    #[must_use]
    pub fn self_replica_rank(&self, partition: &PartitionInner) -> Option<u32> {
        partition.self_replica_rank(self.self_node, self.replication_factor())
    }

    /// The node best placed to handle a request on a locked partition.
    #[must_use]
    pub fn best_node(&self, partition: &PartitionInner, is_read: bool) -> NodeId {
        partition.best_node(self.self_node, is_read)
    }

    /// Where a client routed here should really go: the acting master, when
    /// this node is the final master of `pid` with a handover pending.
    #[must_use]
    pub fn proxyee_redirect(&self, pid: u32) -> Option<NodeId> {
        let partition = self.partition(pid).lock();
        if partition.is_final_master(self.self_node) && !partition.origin().is_zero() {
            Some(partition.origin())
        } else {
            None
        }
    }

    /// Whether this node can answer queries for `pid` (rank-0 bit test).
    #[must_use]
    pub fn is_queryable(&self, pid: u32) -> bool {
        self.replica_maps.is_queryable(pid)
    }

    // -- balancer mutation surface --

    /// Runs a balancer mutation against `pid` under the partition lock, then
    /// refreshes the client replica maps for that partition while the lock
    /// is still held.
    ///
    /// # Panics
    ///
    /// Panics if the mutation leaves more replicas than the configured
    /// replication factor -- the plan is corrupt and must not be served.
    pub fn update_partition<R>(&self, pid: u32, mutate: impl FnOnce(&mut PartitionInner) -> R) -> R {
        let mut partition = self.partition(pid).lock();
        let result = mutate(&mut partition);

        assert!(
            partition.n_replicas() <= self.configured_replication_factor,
            "partition {pid} has {} replicas, configured factor is {}",
            partition.n_replicas(),
            self.configured_replication_factor
        );

        let rank = self.self_replica_rank(&partition);
        if self.replica_maps.update(pid, rank) {
            debug!(namespace = %self.name, pid, ?rank, "client replica map refreshed");
        }
        result
    }

    // -- shutdown --

    /// Hands every partition's trees back to the storage layer, recording
    /// their roots into `roots_out`. Partition locks are acquired and never
    /// released; the namespace is unusable afterwards.
    pub fn shutdown(&self, roots_out: &mut TreeRoots) {
        roots_out.primary = vec![Default::default(); PARTITION_COUNT as usize];
        if self.sub_tree_enabled {
            roots_out
                .sub
                .get_or_insert_with(|| vec![Default::default(); PARTITION_COUNT as usize]);
        }

        for partition in &self.partitions {
            let pid = partition.id() as usize;
            let mut inner = partition.lock();
            let (tree, sub_tree) = inner.detach_trees();
            if let Some(tree) = tree {
                self.tree_allocator
                    .shutdown(&tree, &mut roots_out.primary[pid]);
            }
            if let (Some(sub_tree), Some(sub_roots)) = (sub_tree, roots_out.sub.as_mut()) {
                self.tree_allocator.shutdown(&sub_tree, &mut sub_roots[pid]);
            }
            // The process is terminating: leave the partition locked so any
            // late caller blocks instead of observing detached trees.
            mem::forget(inner);
        }

        info!(namespace = %self.name, "namespace partitions shut down");
    }
}

impl std::fmt::Debug for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.name)
            .field("self_node", &self.self_node)
            .field("regime", &self.regime)
            .field(
                "configured_replication_factor",
                &self.configured_replication_factor,
            )
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
