//! Partition version tuples.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a partition's data-generation lineage.
///
/// A version is assigned by the balancer whenever a partition's replica plan
/// changes in a way that forks its lineage. Two replicas holding the same
/// version hold interchangeable data; diverged versions require duplicate
/// resolution. The tuple is opaque to everything except the balancer -- the
/// partition core only ever asks [`PartitionVersion::is_null`] and renders it
/// into diagnostic text.
///
/// Rendered as `<ckey>.<family>` in uppercase hex, with `.s` appended for
/// subset lineages and `.e` for evade lineages.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PartitionVersion {
    /// Cluster epoch under which this lineage was created.
    pub ckey: u64,
    /// Lineage family within the epoch.
    pub family: u32,
    /// The replica holds only a subset of the lineage's records.
    pub subset: bool,
    /// The lineage was created to sidestep a potential conflict window.
    pub evade: bool,
}

impl PartitionVersion {
    /// The null version: the partition holds no authoritative lineage.
    pub const NULL: Self = Self {
        ckey: 0,
        family: 0,
        subset: false,
        evade: false,
    };

    /// Creates a plain (non-subset, non-evade) version.
    #[must_use]
    pub fn new(ckey: u64, family: u32) -> Self {
        Self {
            ckey,
            family,
            subset: false,
            evade: false,
        }
    }

    /// Whether this version identifies no lineage at all.
    ///
    /// A lineage cannot exist outside a cluster epoch, so a zero `ckey`
    /// means null regardless of the remaining fields.
    #[must_use]
    pub fn is_null(self) -> bool {
        self.ckey == 0
    }
}

impl fmt::Display for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}.{:X}", self.ckey, self.family)?;
        if self.subset {
            write!(f, ".s")?;
        }
        if self.evade {
            write!(f, ".e")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_version() {
        assert!(PartitionVersion::NULL.is_null());
        assert!(PartitionVersion::default().is_null());
        assert!(!PartitionVersion::new(1, 0).is_null());
        // Family without an epoch is still null.
        assert!(PartitionVersion {
            ckey: 0,
            family: 7,
            subset: false,
            evade: false
        }
        .is_null());
    }

    #[test]
    fn renders_hex_with_flag_suffixes() {
        assert_eq!(PartitionVersion::NULL.to_string(), "0.0");
        assert_eq!(PartitionVersion::new(0xABCD_1234, 2).to_string(), "ABCD1234.2");

        let subset = PartitionVersion {
            subset: true,
            ..PartitionVersion::new(0xF, 1)
        };
        assert_eq!(subset.to_string(), "F.1.s");

        let both = PartitionVersion {
            subset: true,
            evade: true,
            ..PartitionVersion::new(0xF, 1)
        };
        assert_eq!(both.to_string(), "F.1.s.e");
    }

    #[test]
    fn serde_round_trip() {
        let version = PartitionVersion {
            ckey: 99,
            family: 3,
            subset: true,
            evade: false,
        };
        let json = serde_json::to_string(&version).unwrap();
        let back: PartitionVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
