//! Atoll core -- the vocabulary shared between server nodes and client SDKs.
//!
//! This crate provides the foundation layer for the Atoll key-value store:
//!
//! - **Node** ([`node`]): 64-bit cluster node identity
//! - **Partition** ([`partition`]): partition count, digest routing, and the
//!   client-side [`partition::ClientReplicaTable`] decoded from a server's
//!   replica-map probe strings
//! - **Version** ([`version`]): partition data-lineage version tuples

pub mod node;
pub mod partition;
pub mod version;

// Node
pub use node::NodeId;

// Partition
pub use partition::{
    bitmap_bit, digest_to_partition, ClientReplicaTable, Digest, ReplicaTableError, BITMAP_BYTES,
    PARTITION_COUNT,
};

// Version
pub use version::PartitionVersion;
