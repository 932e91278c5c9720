//! Partition domain types: clustering regimes, legacy state, stat buckets.

use std::fmt;

use serde::{Deserialize, Serialize};

use atoll_core::PartitionVersion;

// ---------------------------------------------------------------------------
// Regime
// ---------------------------------------------------------------------------

/// Clustering regime a namespace runs under, selected at namespace init.
///
/// The modern regime tracks partition lineage with [`PartitionVersion`]
/// tuples; the legacy regime carries the older discrete state machine and
/// version-info tuples. A namespace never switches regimes while the
/// process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Regime {
    Modern,
    Legacy,
}

// ---------------------------------------------------------------------------
// Legacy regime types
// ---------------------------------------------------------------------------

/// Legacy regime discrete partition state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LegacyState {
    Undef,
    Sync,
    Desync,
    Zombie,
    Absent,
}

impl LegacyState {
    /// Single-character rendering used by the per-partition info dump.
    #[must_use]
    pub fn as_char(self) -> char {
        match self {
            Self::Undef => 'U',
            Self::Sync => 'S',
            Self::Desync => 'D',
            Self::Zombie => 'Z',
            Self::Absent => 'A',
        }
    }
}

/// Legacy regime version tuple: originating instance id plus version path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyVersion {
    pub iid: u64,
    pub vtp: u64,
}

impl LegacyVersion {
    /// Whether this tuple identifies no data generation.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.iid == 0
    }
}

impl fmt::Display for LegacyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}-{:X}", self.iid, self.vtp)
    }
}

// ---------------------------------------------------------------------------
// RegimeState
// ---------------------------------------------------------------------------

/// Per-partition version/state fields, dispatched by the namespace regime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegimeState {
    Modern {
        version: PartitionVersion,
        final_version: PartitionVersion,
    },
    Legacy {
        state: LegacyState,
        version_info: LegacyVersion,
        primary_version_info: LegacyVersion,
    },
}

impl RegimeState {
    /// Initial state for a freshly created partition under `regime`.
    #[must_use]
    pub fn initial(regime: Regime) -> Self {
        match regime {
            Regime::Modern => Self::Modern {
                version: PartitionVersion::NULL,
                final_version: PartitionVersion::NULL,
            },
            Regime::Legacy => Self::Legacy {
                state: LegacyState::Absent,
                version_info: LegacyVersion::default(),
                primary_version_info: LegacyVersion::default(),
            },
        }
    }

    /// Whether the partition still holds some data generation.
    ///
    /// This is the availability test for export readers: zombie replicas
    /// count, empty ones do not.
    #[must_use]
    pub fn holds_data(&self) -> bool {
        match self {
            Self::Modern { version, .. } => !version.is_null(),
            Self::Legacy { version_info, .. } => !version_info.is_null(),
        }
    }

    /// Whether a reservation on this partition should refuse incoming
    /// replication writes.
    #[must_use]
    pub fn reject_replica_write(&self) -> bool {
        match self {
            Self::Modern { version, .. } => version.is_null(),
            Self::Legacy { state, .. } => *state == LegacyState::Absent,
        }
    }
}

// ---------------------------------------------------------------------------
// Replica stats
// ---------------------------------------------------------------------------

/// Accumulation bucket for one replica role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoleStats {
    pub objects: u64,
    pub sub_objects: u64,
    pub tombstones: u64,
}

/// Namespace-wide object counts, bucketed by this node's role per partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicaStats {
    pub master: RoleStats,
    pub prole: RoleStats,
    pub non_replica: RoleStats,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_state_chars() {
        assert_eq!(LegacyState::Undef.as_char(), 'U');
        assert_eq!(LegacyState::Sync.as_char(), 'S');
        assert_eq!(LegacyState::Desync.as_char(), 'D');
        assert_eq!(LegacyState::Zombie.as_char(), 'Z');
        assert_eq!(LegacyState::Absent.as_char(), 'A');
    }

    #[test]
    fn legacy_version_null_and_rendering() {
        assert!(LegacyVersion::default().is_null());
        assert!(!LegacyVersion { iid: 1, vtp: 0 }.is_null());
        assert_eq!(LegacyVersion { iid: 0xAB, vtp: 0x10 }.to_string(), "AB-10");
    }

    #[test]
    fn initial_state_per_regime() {
        assert_eq!(
            RegimeState::initial(Regime::Modern),
            RegimeState::Modern {
                version: PartitionVersion::NULL,
                final_version: PartitionVersion::NULL,
            }
        );
        assert!(matches!(
            RegimeState::initial(Regime::Legacy),
            RegimeState::Legacy {
                state: LegacyState::Absent,
                ..
            }
        ));
    }

    #[test]
    fn holds_data_follows_the_active_regime() {
        let mut modern = RegimeState::initial(Regime::Modern);
        assert!(!modern.holds_data());
        if let RegimeState::Modern { version, .. } = &mut modern {
            *version = PartitionVersion::new(5, 0);
        }
        assert!(modern.holds_data());

        let mut legacy = RegimeState::initial(Regime::Legacy);
        assert!(!legacy.holds_data());
        if let RegimeState::Legacy { version_info, .. } = &mut legacy {
            *version_info = LegacyVersion { iid: 9, vtp: 0 };
        }
        assert!(legacy.holds_data());
    }

    #[test]
    fn reject_replica_write_follows_the_active_regime() {
        assert!(RegimeState::initial(Regime::Modern).reject_replica_write());
        assert!(RegimeState::initial(Regime::Legacy).reject_replica_write());

        let filled = RegimeState::Modern {
            version: PartitionVersion::new(1, 0),
            final_version: PartitionVersion::NULL,
        };
        assert!(!filled.reject_replica_write());

        let zombie = RegimeState::Legacy {
            state: LegacyState::Zombie,
            version_info: LegacyVersion { iid: 1, vtp: 0 },
            primary_version_info: LegacyVersion::default(),
        };
        assert!(!zombie.reject_replica_write());
    }
}
