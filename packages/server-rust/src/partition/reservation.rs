//! Partition reservations: pinning trees for the span of one operation.
//!
//! Request handlers never touch partition state directly. They acquire a
//! [`Reservation`], which snapshots the routing-relevant fields and pins the
//! backing trees by refcount, all inside one short critical section on the
//! partition lock. The lock is released before the handler runs; the pinned
//! trees stay valid until the reservation drops.
//!
//! Reservation failures are the caller's business and are not logged here:
//! `NotLocal` is answered by proxying to the reported best node, `Timeout`
//! by retrying or abandoning the migration, `Unavailable` by skipping the
//! partition.

use std::sync::Arc;
use std::time::Duration;

use atoll_core::{NodeId, PARTITION_COUNT};

use crate::partition::namespace::Namespace;
use crate::partition::record::PartitionInner;
use crate::storage::RecordTree;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a reservation was refused. No refcount is taken on any error path.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ReserveError {
    /// This node is not the best node for the partition; proxy to `node`.
    #[error("partition {partition_id} is not local; best node is {node}")]
    NotLocal {
        partition_id: u32,
        /// The node that would not refuse the same request.
        node: NodeId,
        /// Cluster epoch observed while deciding, reported unconditionally.
        cluster_key: u64,
    },
    /// The partition holds no data generation at all.
    #[error("partition {partition_id} holds no data")]
    Unavailable { partition_id: u32 },
    /// The partition lock could not be acquired within the deadline.
    #[error("partition {partition_id} lock not acquired within {timeout_ms} ms")]
    Timeout { partition_id: u32, timeout_ms: u64 },
}

// ---------------------------------------------------------------------------
// Reservation
// ---------------------------------------------------------------------------

/// A pinned view of one partition for the span of one operation.
///
/// Holds one refcount on the primary tree (and the sub tree, when the
/// namespace carries one) plus a snapshot of the fields a handler needs
/// without re-locking. Dropping the reservation releases the refcounts; no
/// lock is taken on release.
///
/// Cloning pins the trees again: a clone is an independent holder with its
/// own release obligation, safe to hand through a queue.
#[derive(Clone)]
pub struct Reservation {
    ns: Arc<Namespace>,
    partition_id: u32,
    tree: Arc<RecordTree>,
    sub_tree: Option<Arc<RecordTree>>,
    cluster_key: u64,
    reject_replica_write: bool,
    dupls: Vec<NodeId>,
}

impl PartialEq for Reservation {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.ns, &other.ns)
            && self.partition_id == other.partition_id
            && Arc::ptr_eq(&self.tree, &other.tree)
            && match (&self.sub_tree, &other.sub_tree) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
            && self.cluster_key == other.cluster_key
            && self.reject_replica_write == other.reject_replica_write
            && self.dupls == other.dupls
    }
}

impl Reservation {
    #[must_use]
    pub fn namespace(&self) -> &Arc<Namespace> {
        &self.ns
    }

    #[must_use]
    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    /// The pinned primary record tree.
    #[must_use]
    pub fn tree(&self) -> &Arc<RecordTree> {
        &self.tree
    }

    /// The pinned sub tree, when the namespace carries one.
    #[must_use]
    pub fn sub_tree(&self) -> Option<&Arc<RecordTree>> {
        self.sub_tree.as_ref()
    }

    /// Cluster epoch at reservation time.
    #[must_use]
    pub fn cluster_key(&self) -> u64 {
        self.cluster_key
    }

    /// Whether this replica should refuse incoming replication writes.
    #[must_use]
    pub fn reject_replica_write(&self) -> bool {
        self.reject_replica_write
    }

    /// Nodes holding duplicate-resolution versions that must be consulted
    /// before returning authoritative data.
    #[must_use]
    pub fn duplicates(&self) -> &[NodeId] {
        &self.dupls
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("namespace", &self.ns.name())
            .field("partition_id", &self.partition_id)
            .field("cluster_key", &self.cluster_key)
            .field("reject_replica_write", &self.reject_replica_write)
            .field("n_dupl", &self.dupls.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Prereserved query set
// ---------------------------------------------------------------------------

/// Result of [`Namespace::prereserve_query`]: per-partition reservations for
/// the partitions this node can answer queries on.
pub struct QueryReservations {
    reservations: Vec<Option<Reservation>>,
    n_reserved: usize,
}

impl QueryReservations {
    /// How many partitions were reserved.
    #[must_use]
    pub fn n_reserved(&self) -> usize {
        self.n_reserved
    }

    /// Whether `pid` was reserved.
    #[must_use]
    pub fn is_reserved(&self, pid: u32) -> bool {
        self.get(pid).is_some()
    }

    #[must_use]
    pub fn get(&self, pid: u32) -> Option<&Reservation> {
        self.reservations.get(pid as usize)?.as_ref()
    }

    /// Takes ownership of one partition's reservation, leaving `None`.
    pub fn take(&mut self, pid: u32) -> Option<Reservation> {
        let taken = self.reservations.get_mut(pid as usize)?.take();
        if taken.is_some() {
            self.n_reserved -= 1;
        }
        taken
    }
}

// ---------------------------------------------------------------------------
// Reserve operations
// ---------------------------------------------------------------------------

impl Namespace {
    /// Snapshots a locked partition into a reservation, pinning its trees.
    fn pin(self: &Arc<Self>, pid: u32, partition: &PartitionInner) -> Reservation {
        let tree = partition
            .tree()
            .cloned()
            .expect("partition tree detached while its lock was held");
        let sub_tree = partition.sub_tree().cloned();
        Reservation {
            ns: Arc::clone(self),
            partition_id: pid,
            tree,
            sub_tree,
            cluster_key: partition.cluster_key(),
            reject_replica_write: partition.regime().reject_replica_write(),
            dupls: partition.dupls().to_vec(),
        }
    }

    fn reserve_routed(self: &Arc<Self>, pid: u32, is_read: bool) -> Result<Reservation, ReserveError> {
        let partition = self.partition(pid).lock();
        let node = self.best_node(&partition, is_read);
        if node != self.self_node() {
            metrics::counter!("atoll_partition_reserve_not_local_total").increment(1);
            return Err(ReserveError::NotLocal {
                partition_id: pid,
                node,
                cluster_key: partition.cluster_key(),
            });
        }
        Ok(self.pin(pid, &partition))
    }

    /// Reserves `pid` for a read, failing with [`ReserveError::NotLocal`]
    /// when a better node should serve it.
    pub fn reserve_read(self: &Arc<Self>, pid: u32) -> Result<Reservation, ReserveError> {
        self.reserve_routed(pid, true)
    }

    /// Reserves `pid` for a write; only the working master qualifies.
    pub fn reserve_write(self: &Arc<Self>, pid: u32) -> Result<Reservation, ReserveError> {
        self.reserve_routed(pid, false)
    }

    /// Reserves `pid` for a query; write-routing rules apply.
    pub fn reserve_query(self: &Arc<Self>, pid: u32) -> Result<Reservation, ReserveError> {
        self.reserve_write(pid)
    }

    /// Attempts [`Self::reserve_query`] on every partition.
    ///
    /// Partitions this node cannot serve simply end up unreserved; no
    /// partial pins are left behind on failure paths.
    #[must_use]
    pub fn prereserve_query(self: &Arc<Self>) -> QueryReservations {
        let mut reservations = Vec::with_capacity(PARTITION_COUNT as usize);
        let mut n_reserved = 0;
        for pid in 0..PARTITION_COUNT {
            match self.reserve_query(pid) {
                Ok(reservation) => {
                    n_reserved += 1;
                    reservations.push(Some(reservation));
                }
                Err(_) => reservations.push(None),
            }
        }
        QueryReservations {
            reservations,
            n_reserved,
        }
    }

    /// Reserves `pid` for migration work, unconditionally.
    ///
    /// Migrations operate on the local view whatever this node's role, so
    /// the best-node check is skipped and the reservation always succeeds.
    #[must_use]
    pub fn reserve_migrate(self: &Arc<Self>, pid: u32) -> Reservation {
        let partition = self.partition(pid).lock();
        self.pin(pid, &partition)
    }

    /// [`Self::reserve_migrate`] with a deadline on the lock acquisition.
    pub fn try_reserve_migrate(
        self: &Arc<Self>,
        pid: u32,
        timeout: Duration,
    ) -> Result<Reservation, ReserveError> {
        match self.partition(pid).try_lock_for(timeout) {
            Some(partition) => Ok(self.pin(pid, &partition)),
            None => {
                metrics::counter!("atoll_partition_reserve_timeout_total").increment(1);
                Err(ReserveError::Timeout {
                    partition_id: pid,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Reserves `pid` for an export (cross-datacenter) reader.
    ///
    /// Succeeds on any partition still holding a data generation -- zombie
    /// replicas included -- and fails with [`ReserveError::Unavailable`] on
    /// an empty one.
    pub fn reserve_export_read(self: &Arc<Self>, pid: u32) -> Result<Reservation, ReserveError> {
        let partition = self.partition(pid).lock();
        if !partition.regime().holds_data() {
            return Err(ReserveError::Unavailable { partition_id: pid });
        }
        Ok(self.pin(pid, &partition))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
