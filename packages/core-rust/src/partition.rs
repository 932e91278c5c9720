//! Partition routing shared between server nodes and client SDKs.
//!
//! A namespace is divided into [`PARTITION_COUNT`] fixed partitions. The
//! partition of a record is derived from its 20-byte digest, which is the
//! shared routing contract between clients and servers. This module provides:
//!
//! - [`PARTITION_COUNT`]: the number of partitions per namespace (4096)
//! - [`digest_to_partition`]: maps a record digest to a partition id
//! - [`ClientReplicaTable`]: the client-side decode of the per-rank base64
//!   replica maps a server publishes through its probe surface

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Number of partitions per namespace.
pub const PARTITION_COUNT: u32 = 4096;

/// Bytes in one per-rank ownership bitmap: one bit per partition.
pub const BITMAP_BYTES: usize = (PARTITION_COUNT as usize) / 8;

/// 20-byte record digest. Routing uses only the first two bytes.
pub type Digest = [u8; 20];

// ---------------------------------------------------------------------------
// digest_to_partition
// ---------------------------------------------------------------------------

/// Computes the partition id for a record digest.
///
/// The id is the low 12 bits of the digest's first two bytes, little-endian.
/// Digests are uniformly distributed, so the masked prefix is too.
///
/// # Examples
///
/// ```
/// use atoll_core::partition::digest_to_partition;
///
/// let mut digest = [0u8; 20];
/// digest[0] = 0x34;
/// digest[1] = 0x12;
/// assert_eq!(digest_to_partition(&digest), 0x234);
/// ```
#[must_use]
pub fn digest_to_partition(digest: &Digest) -> u32 {
    u32::from(u16::from_le_bytes([digest[0], digest[1]]) & 0x0FFF)
}

/// Tests bit `pid` in an ownership bitmap (MSB-first within each byte).
#[must_use]
pub fn bitmap_bit(bitmap: &[u8], pid: u32) -> bool {
    let byte = (pid / 8) as usize;
    let mask = 0x80u8 >> (pid % 8);
    bitmap.get(byte).is_some_and(|b| b & mask != 0)
}

// ---------------------------------------------------------------------------
// ClientReplicaTable
// ---------------------------------------------------------------------------

/// Errors from parsing a server's replica-map probe record.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplicaTableError {
    #[error("probe record has no namespace field")]
    MissingNamespace,
    #[error("probe record for '{namespace}' has no replication factor")]
    MissingReplicationFactor { namespace: String },
    #[error("probe record for '{namespace}' has unparsable replication factor '{value}'")]
    BadReplicationFactor { namespace: String, value: String },
    #[error("probe record for '{namespace}' carries {found} rank maps, expected {expected}")]
    RankCountMismatch {
        namespace: String,
        expected: u32,
        found: usize,
    },
    #[error("rank {rank} map for '{namespace}' is not valid base64")]
    BadBitmap { namespace: String, rank: usize },
    #[error("rank {rank} map for '{namespace}' decodes to {found} bytes, expected {expected}")]
    BitmapLengthMismatch {
        namespace: String,
        rank: usize,
        expected: usize,
        found: usize,
    },
}

/// Client-side view of which partitions one server node holds, per replica
/// rank, for one namespace.
///
/// Built by decoding the `<ns>:<rf>,<b64 rank 0>,<b64 rank 1>,…` records a
/// node publishes through its probe surface. Rank 0 is the partition's
/// master on that node; ranks above 0 are proles that may serve reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientReplicaTable {
    namespace: String,
    replication_factor: u32,
    ranks: Vec<Vec<u8>>,
}

impl ClientReplicaTable {
    /// Parses one `<ns>:<rf>,<b64>,…` probe record.
    pub fn parse(record: &str) -> Result<Self, ReplicaTableError> {
        let (namespace, rest) = record
            .split_once(':')
            .ok_or(ReplicaTableError::MissingNamespace)?;
        if namespace.is_empty() {
            return Err(ReplicaTableError::MissingNamespace);
        }
        let namespace = namespace.to_string();

        let mut fields = rest.split(',');
        let rf_field = fields
            .next()
            .filter(|f| !f.is_empty())
            .ok_or_else(|| ReplicaTableError::MissingReplicationFactor {
                namespace: namespace.clone(),
            })?;
        let replication_factor: u32 =
            rf_field
                .parse()
                .map_err(|_| ReplicaTableError::BadReplicationFactor {
                    namespace: namespace.clone(),
                    value: rf_field.to_string(),
                })?;

        // The advertised factor is untrusted input; let the rank maps that
        // actually follow drive the allocation.
        let mut ranks = Vec::new();
        for (rank, b64) in fields.enumerate() {
            let bitmap = STANDARD
                .decode(b64)
                .map_err(|_| ReplicaTableError::BadBitmap {
                    namespace: namespace.clone(),
                    rank,
                })?;
            if bitmap.len() != BITMAP_BYTES {
                return Err(ReplicaTableError::BitmapLengthMismatch {
                    namespace: namespace.clone(),
                    rank,
                    expected: BITMAP_BYTES,
                    found: bitmap.len(),
                });
            }
            ranks.push(bitmap);
        }

        if ranks.len() != replication_factor as usize {
            return Err(ReplicaTableError::RankCountMismatch {
                namespace,
                expected: replication_factor,
                found: ranks.len(),
            });
        }

        Ok(Self {
            namespace,
            replication_factor,
            ranks,
        })
    }

    /// Parses a full probe dump: `;`-separated records, one per namespace.
    pub fn parse_all(dump: &str) -> Result<Vec<Self>, ReplicaTableError> {
        if dump.is_empty() {
            return Ok(Vec::new());
        }
        dump.split(';').map(Self::parse).collect()
    }

    /// Namespace this table describes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Replication factor advertised with the record.
    #[must_use]
    pub fn replication_factor(&self) -> u32 {
        self.replication_factor
    }

    /// Whether the node holds `pid` at replica rank `rank`.
    #[must_use]
    pub fn owns(&self, rank: u32, pid: u32) -> bool {
        self.ranks
            .get(rank as usize)
            .is_some_and(|bitmap| bitmap_bit(bitmap, pid))
    }

    /// Whether the node is the master for `pid`.
    #[must_use]
    pub fn is_master(&self, pid: u32) -> bool {
        self.owns(0, pid)
    }

    /// The rank at which the node holds `pid`, if any.
    ///
    /// At most one rank is ever set for a partition; the lowest set rank is
    /// returned should a mid-refresh probe transiently show two.
    #[must_use]
    pub fn rank_of(&self, pid: u32) -> Option<u32> {
        (0..self.replication_factor).find(|&rank| self.owns(rank, pid))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn encode_record(ns: &str, ranks: &[Vec<u8>]) -> String {
        let mut record = format!("{ns}:{}", ranks.len());
        for bitmap in ranks {
            record.push(',');
            record.push_str(&STANDARD.encode(bitmap));
        }
        record
    }

    fn bitmap_with(pids: &[u32]) -> Vec<u8> {
        let mut bitmap = vec![0u8; BITMAP_BYTES];
        for &pid in pids {
            bitmap[(pid / 8) as usize] |= 0x80 >> (pid % 8);
        }
        bitmap
    }

    // -- digest_to_partition --

    #[test]
    fn digest_routing_uses_low_twelve_bits() {
        let mut digest = [0u8; 20];
        digest[0] = 0x34;
        digest[1] = 0x12;
        assert_eq!(digest_to_partition(&digest), 0x234);

        digest[0] = 0xFF;
        digest[1] = 0xFF;
        assert_eq!(digest_to_partition(&digest), 0x0FFF);

        // Trailing digest bytes are irrelevant to routing.
        digest[2] = 0xAB;
        digest[19] = 0xCD;
        assert_eq!(digest_to_partition(&digest), 0x0FFF);
    }

    #[test]
    fn zero_digest_routes_to_partition_zero() {
        assert_eq!(digest_to_partition(&[0u8; 20]), 0);
    }

    proptest! {
        #[test]
        fn digest_routing_stays_in_range(digest in proptest::array::uniform20(any::<u8>())) {
            prop_assert!(digest_to_partition(&digest) < PARTITION_COUNT);
        }
    }

    // -- bitmap_bit --

    #[test]
    fn bitmap_bit_is_msb_first() {
        let bitmap = bitmap_with(&[0, 7, 8, 4095]);
        assert_eq!(bitmap[0], 0b1000_0001);
        assert!(bitmap_bit(&bitmap, 0));
        assert!(bitmap_bit(&bitmap, 7));
        assert!(bitmap_bit(&bitmap, 8));
        assert!(bitmap_bit(&bitmap, 4095));
        assert!(!bitmap_bit(&bitmap, 1));
    }

    #[test]
    fn bitmap_bit_out_of_range_is_clear() {
        let bitmap = bitmap_with(&[0]);
        assert!(!bitmap_bit(&bitmap, PARTITION_COUNT * 2));
    }

    // -- ClientReplicaTable --

    #[test]
    fn parses_two_rank_record() {
        let ranks = vec![bitmap_with(&[0, 42]), bitmap_with(&[100])];
        let record = encode_record("orders", &ranks);

        let table = ClientReplicaTable::parse(&record).unwrap();
        assert_eq!(table.namespace(), "orders");
        assert_eq!(table.replication_factor(), 2);
        assert!(table.is_master(0));
        assert!(table.is_master(42));
        assert!(!table.is_master(100));
        assert!(table.owns(1, 100));
        assert_eq!(table.rank_of(42), Some(0));
        assert_eq!(table.rank_of(100), Some(1));
        assert_eq!(table.rank_of(1), None);
    }

    #[test]
    fn parses_multi_namespace_dump() {
        let a = encode_record("a", &[bitmap_with(&[1])]);
        let b = encode_record("b", &[bitmap_with(&[2])]);
        let dump = format!("{a};{b}");

        let tables = ClientReplicaTable::parse_all(&dump).unwrap();
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].namespace(), "a");
        assert!(tables[1].is_master(2));
    }

    #[test]
    fn parse_all_empty_dump() {
        assert_eq!(ClientReplicaTable::parse_all("").unwrap(), vec![]);
    }

    #[test]
    fn rejects_missing_namespace() {
        assert_eq!(
            ClientReplicaTable::parse("no-colon-here"),
            Err(ReplicaTableError::MissingNamespace)
        );
        assert_eq!(
            ClientReplicaTable::parse(":1,AAAA"),
            Err(ReplicaTableError::MissingNamespace)
        );
    }

    #[test]
    fn rejects_bad_replication_factor() {
        let err = ClientReplicaTable::parse("ns:abc,AAAA").unwrap_err();
        assert!(matches!(
            err,
            ReplicaTableError::BadReplicationFactor { ref value, .. } if value == "abc"
        ));
    }

    #[test]
    fn rejects_rank_count_mismatch() {
        let record = encode_record("ns", &[bitmap_with(&[])]);
        // Advertise rf=2 but carry one map.
        let record = record.replacen("ns:1", "ns:2", 1);
        let err = ClientReplicaTable::parse(&record).unwrap_err();
        assert!(matches!(
            err,
            ReplicaTableError::RankCountMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
    }

    #[test]
    fn huge_advertised_factor_is_rejected_cheaply() {
        // The factor field must not drive any allocation on its own.
        let err = ClientReplicaTable::parse("ns:4294967295,").unwrap_err();
        assert!(matches!(
            err,
            ReplicaTableError::BitmapLengthMismatch { rank: 0, found: 0, .. }
        ));

        let err = ClientReplicaTable::parse("ns:4294967295").unwrap_err();
        assert!(matches!(
            err,
            ReplicaTableError::RankCountMismatch {
                expected: 4_294_967_295,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn rejects_bad_base64() {
        let err = ClientReplicaTable::parse("ns:1,!!!not-base64!!!").unwrap_err();
        assert!(matches!(err, ReplicaTableError::BadBitmap { rank: 0, .. }));
    }

    #[test]
    fn rejects_short_bitmap() {
        let short = STANDARD.encode([0u8; 3]);
        let err = ClientReplicaTable::parse(&format!("ns:1,{short}")).unwrap_err();
        assert!(matches!(
            err,
            ReplicaTableError::BitmapLengthMismatch {
                expected: BITMAP_BYTES,
                found: 3,
                ..
            }
        ));
    }

    proptest! {
        #[test]
        fn rank_of_agrees_with_owns(
            pids in proptest::collection::vec(0u32..PARTITION_COUNT, 0..32),
        ) {
            // Disjoint rank maps: evens at rank 0, odds at rank 1.
            let rank0: Vec<u32> = pids.iter().copied().filter(|p| p % 2 == 0).collect();
            let rank1: Vec<u32> = pids.iter().copied().filter(|p| p % 2 == 1).collect();
            let record = encode_record("ns", &[bitmap_with(&rank0), bitmap_with(&rank1)]);
            let table = ClientReplicaTable::parse(&record).unwrap();

            for pid in 0..PARTITION_COUNT {
                match table.rank_of(pid) {
                    Some(rank) => prop_assert!(table.owns(rank, pid)),
                    None => {
                        prop_assert!(!table.owns(0, pid));
                        prop_assert!(!table.owns(1, pid));
                    }
                }
            }
        }
    }
}
