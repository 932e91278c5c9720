//! Client replica maps: per-rank ownership bitmaps with base64 mirrors.
//!
//! External clients learn which partitions this node owns at each replica
//! rank by polling a compact base64 string. The bitmap and its base64
//! mirror are maintained incrementally: a partition state change touches one
//! bit, so only the aligned 3-byte chunk covering that bit is re-encoded
//! into its 4-char base64 quartet.
//!
//! Probe readers never take a lock. Each quartet is published with a
//! release store and read with an acquire load, so a reader can observe the
//! string from before or after a flip but never a half-encoded quartet.
//! Clients poll repeatedly, so transiently stale reads are acceptable.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;

use atoll_core::{BITMAP_BYTES, PARTITION_COUNT};

/// Base64 quartets per map: one per aligned 3-byte bitmap chunk.
const B64_QUARTETS: usize = BITMAP_BYTES.div_ceil(3);

/// Characters in one rendered base64 map.
pub const B64_MAP_LEN: usize = B64_QUARTETS * 4;

// ---------------------------------------------------------------------------
// ClientReplicaMap
// ---------------------------------------------------------------------------

/// Ownership bitmap and base64 mirror for one replica rank.
struct ClientReplicaMap {
    /// Serializes writers of this map. Different partitions share bitmap
    /// bytes and quartets, so flips to the same map must not interleave.
    write_lock: Mutex<()>,
    /// Bit `pid` is set iff this node owns partition `pid` at this rank.
    /// MSB-first within each byte.
    bitmap: Vec<AtomicU8>,
    /// Base64 rendering of `bitmap`, one packed 4-char quartet per chunk,
    /// stored big-endian so byte order matches character order.
    b64map: Vec<AtomicU32>,
}

impl ClientReplicaMap {
    fn new() -> Self {
        let map = Self {
            write_lock: Mutex::new(()),
            bitmap: (0..BITMAP_BYTES).map(|_| AtomicU8::new(0)).collect(),
            b64map: (0..B64_QUARTETS).map(|_| AtomicU32::new(0)).collect(),
        };
        for chunk in 0..B64_QUARTETS {
            map.reencode_chunk(chunk * 3);
        }
        map
    }

    fn clear(&self) {
        let _guard = self.write_lock.lock();
        for byte in &self.bitmap {
            byte.store(0, Ordering::Relaxed);
        }
        for chunk in 0..B64_QUARTETS {
            self.reencode_chunk(chunk * 3);
        }
    }

    fn bit_is_set(&self, byte_i: usize, mask: u8) -> bool {
        self.bitmap[byte_i].load(Ordering::Relaxed) & mask != 0
    }

    /// Flips one bit and republishes its quartet. Caller computed the
    /// current bit state before taking the write lock; flips to the same
    /// bit are serialized by the partition lock, so the check cannot go
    /// stale in between.
    fn flip(&self, byte_i: usize, mask: u8) {
        let _guard = self.write_lock.lock();
        self.bitmap[byte_i].fetch_xor(mask, Ordering::Relaxed);
        self.reencode_chunk((byte_i / 3) * 3);
    }

    /// Re-encodes the aligned 3-byte chunk starting at `chunk_start` into
    /// its base64 quartet and publishes it with a release store.
    fn reencode_chunk(&self, chunk_start: usize) {
        let chunk_size = 3.min(BITMAP_BYTES - chunk_start);
        let mut chunk = [0u8; 3];
        for i in 0..chunk_size {
            chunk[i] = self.bitmap[chunk_start + i].load(Ordering::Relaxed);
        }

        // A 2- or 3-byte input always encodes (with padding) to 4 chars.
        let encoded = STANDARD.encode(&chunk[..chunk_size]);
        let mut quartet = [0u8; 4];
        quartet.copy_from_slice(encoded.as_bytes());

        self.b64map[chunk_start / 3].store(u32::from_be_bytes(quartet), Ordering::Release);
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(B64_MAP_LEN);
        for quartet in &self.b64map {
            let bytes = quartet.load(Ordering::Acquire).to_be_bytes();
            // Quartets hold ASCII base64 output by construction.
            out.extend(bytes.iter().map(|&b| char::from(b)));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// ClientReplicaMaps
// ---------------------------------------------------------------------------

/// The per-namespace set of client replica maps, one per replica rank up to
/// the configured replication factor.
pub struct ClientReplicaMaps {
    maps: Vec<ClientReplicaMap>,
}

impl ClientReplicaMaps {
    /// Allocates `configured_replication_factor` maps, all bits clear and
    /// every base64 mirror pre-rendered.
    #[must_use]
    pub fn new(configured_replication_factor: u32) -> Self {
        assert!(
            configured_replication_factor >= 1,
            "replication factor must be at least 1"
        );
        Self {
            maps: (0..configured_replication_factor)
                .map(|_| ClientReplicaMap::new())
                .collect(),
        }
    }

    /// Clears every rank in place; same effect as a fresh allocation.
    pub fn clear(&self) {
        for map in &self.maps {
            map.clear();
        }
    }

    /// Number of ranks (the configured replication factor).
    #[must_use]
    pub fn n_ranks(&self) -> u32 {
        self.maps.len() as u32
    }

    /// Refreshes every rank's bit for `pid` against `desired_rank`, the
    /// node's current usable replica rank for that partition.
    ///
    /// Must be called with the partition's lock held, after any state change
    /// that could alter the rank. Returns `true` iff any rank changed.
    pub fn update(&self, pid: u32, desired_rank: Option<u32>) -> bool {
        assert!(pid < PARTITION_COUNT, "partition id {pid} out of range");
        let byte_i = (pid / 8) as usize;
        let mask = 0x80u8 >> (pid % 8);

        let mut changed = false;
        for (rank, map) in self.maps.iter().enumerate() {
            let owned = desired_rank == Some(rank as u32);
            if owned == map.bit_is_set(byte_i, mask) {
                continue;
            }
            map.flip(byte_i, mask);
            changed = true;
        }
        changed
    }

    /// Whether this node can answer queries for `pid`: the rank-0 bit test.
    #[must_use]
    pub fn is_queryable(&self, pid: u32) -> bool {
        if pid >= PARTITION_COUNT {
            return false;
        }
        self.maps[0].bit_is_set((pid / 8) as usize, 0x80 >> (pid % 8))
    }

    /// Renders rank `rank`'s base64 map, or `None` for a rank beyond the
    /// configured replication factor.
    #[must_use]
    pub fn rank_b64(&self, rank: u32) -> Option<String> {
        self.maps.get(rank as usize).map(ClientReplicaMap::render)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn expected_b64(bits: &[u32]) -> String {
        let mut bitmap = vec![0u8; BITMAP_BYTES];
        for &pid in bits {
            bitmap[(pid / 8) as usize] |= 0x80 >> (pid % 8);
        }
        STANDARD.encode(&bitmap)
    }

    #[test]
    fn fresh_maps_render_the_zero_bitmap() {
        let maps = ClientReplicaMaps::new(2);
        let zero = expected_b64(&[]);
        assert_eq!(zero.len(), B64_MAP_LEN);
        assert_eq!(maps.rank_b64(0).unwrap(), zero);
        assert_eq!(maps.rank_b64(1).unwrap(), zero);
        assert_eq!(maps.rank_b64(2), None);
    }

    #[test]
    fn rendered_map_has_standard_padding() {
        let maps = ClientReplicaMaps::new(1);
        let rendered = maps.rank_b64(0).unwrap();
        // 512 bitmap bytes = 170 full chunks + one 2-byte tail, which base64
        // pads with a single '='.
        assert_eq!(rendered.len(), 684);
        assert!(rendered.ends_with('='));
        assert!(!rendered.ends_with("=="));
    }

    #[test]
    fn update_sets_exactly_one_rank() {
        let maps = ClientReplicaMaps::new(3);
        assert!(maps.update(42, Some(1)));

        assert_eq!(maps.rank_b64(0).unwrap(), expected_b64(&[]));
        assert_eq!(maps.rank_b64(1).unwrap(), expected_b64(&[42]));
        assert_eq!(maps.rank_b64(2).unwrap(), expected_b64(&[]));
    }

    #[test]
    fn update_moves_a_partition_between_ranks() {
        let maps = ClientReplicaMaps::new(2);
        maps.update(7, Some(0));
        assert!(maps.is_queryable(7));

        assert!(maps.update(7, Some(1)));
        assert!(!maps.is_queryable(7));
        assert_eq!(maps.rank_b64(0).unwrap(), expected_b64(&[]));
        assert_eq!(maps.rank_b64(1).unwrap(), expected_b64(&[7]));

        assert!(maps.update(7, None));
        assert_eq!(maps.rank_b64(1).unwrap(), expected_b64(&[]));
    }

    #[test]
    fn update_is_idempotent() {
        let maps = ClientReplicaMaps::new(2);
        assert!(maps.update(100, Some(0)));
        assert!(!maps.update(100, Some(0)));
        assert!(!maps.update(3000, None));
    }

    #[test]
    fn desired_rank_beyond_configured_factor_clears_all_ranks() {
        let maps = ClientReplicaMaps::new(2);
        maps.update(5, Some(0));
        // A rank outside [0, n_ranks) owns nothing in these maps.
        assert!(maps.update(5, Some(9)));
        assert_eq!(maps.rank_b64(0).unwrap(), expected_b64(&[]));
        assert_eq!(maps.rank_b64(1).unwrap(), expected_b64(&[]));
    }

    #[test]
    fn clear_resets_to_fresh_state() {
        let maps = ClientReplicaMaps::new(2);
        maps.update(0, Some(0));
        maps.update(4095, Some(1));
        maps.clear();
        assert_eq!(maps.rank_b64(0).unwrap(), expected_b64(&[]));
        assert_eq!(maps.rank_b64(1).unwrap(), expected_b64(&[]));
    }

    #[test]
    fn edge_partitions_land_in_the_right_quartet() {
        let maps = ClientReplicaMaps::new(1);
        maps.update(0, Some(0));
        maps.update(4095, Some(0));
        assert_eq!(maps.rank_b64(0).unwrap(), expected_b64(&[0, 4095]));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn update_rejects_out_of_range_pid() {
        ClientReplicaMaps::new(1).update(PARTITION_COUNT, None);
    }

    proptest! {
        // Bitmap faithfulness, base64 fidelity, and rank uniqueness under
        // arbitrary update sequences, checked against a model bitmap.
        #[test]
        fn mirrors_track_a_model_under_random_updates(
            updates in proptest::collection::vec(
                (0u32..PARTITION_COUNT, proptest::option::of(0u32..3)),
                1..200,
            ),
        ) {
            let maps = ClientReplicaMaps::new(3);
            let mut model: Vec<Option<u32>> = vec![None; PARTITION_COUNT as usize];

            for (pid, desired) in updates {
                let changed = maps.update(pid, desired);
                prop_assert_eq!(changed, model[pid as usize] != desired);
                model[pid as usize] = desired;
            }

            for rank in 0..3u32 {
                let expected: Vec<u32> = model
                    .iter()
                    .enumerate()
                    .filter_map(|(pid, r)| (*r == Some(rank)).then_some(pid as u32))
                    .collect();
                prop_assert_eq!(maps.rank_b64(rank).unwrap(), expected_b64(&expected));
            }

            // At most one rank set per partition.
            for pid in (0..PARTITION_COUNT).step_by(97) {
                let set_ranks = (0..3u32)
                    .filter(|&r| {
                        maps.rank_b64(r).is_some() && {
                            let byte = (pid / 8) as usize;
                            let mask = 0x80u8 >> (pid % 8);
                            let bitmap = STANDARD.decode(maps.rank_b64(r).unwrap()).unwrap();
                            bitmap[byte] & mask != 0
                        }
                    })
                    .count();
                prop_assert!(set_ranks <= 1);
            }
        }
    }
}
