//! Partition table and reservation core.
//!
//! Provides the per-partition record and its lock discipline, role
//! derivation and best-node routing, the reservation protocol that pins
//! record trees for request handlers, the client replica maps served to
//! routing clients, and the diagnostic text dumps.

pub mod info;
pub mod namespace;
pub mod record;
pub mod replica_map;
pub mod reservation;
pub mod types;

// ---------------------------------------------------------------------------
// Re-exports -- flat public API
// ---------------------------------------------------------------------------

// types
pub use types::{LegacyState, LegacyVersion, Regime, RegimeState, ReplicaStats, RoleStats};

// record
pub use record::{Partition, PartitionInner};

// namespace
pub use namespace::Namespace;

// reservation
pub use reservation::{QueryReservations, Reservation, ReserveError};

// replica_map
pub use replica_map::{ClientReplicaMaps, B64_MAP_LEN};

// info
pub use info::{
    all_replicas_dump, info_dump, masters_dump, proles_dump, replica_stats, INFO_DUMP_HEADER,
};

// ---------------------------------------------------------------------------
// Integration tests
// ---------------------------------------------------------------------------
