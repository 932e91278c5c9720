//! Diagnostic serializers: the text probe surface.
//!
//! These strings are a compatibility contract with external tooling -- field
//! separators, base64 lengths, hex rendering, and the trailing-semicolon
//! chomp are all load-bearing. Dumps that span all partitions take the
//! partition locks sequentially; the result is a per-partition-consistent
//! snapshot, not a cluster-wide atomic view, and consumers tolerate skew.

use std::fmt::Write as _;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

#[cfg(test)]
use atoll_core::PARTITION_COUNT;
use atoll_core::BITMAP_BYTES;

use crate::partition::namespace::Namespace;
use crate::partition::record::PartitionInner;
use crate::partition::types::{RegimeState, ReplicaStats};

/// Header line of the per-partition info dump.
pub const INFO_DUMP_HEADER: &str = "ns:pid:state:replica:n_dupl:origin:target:\
emigrates:immigrates:records:sub_records:tombstones:ldt_version:version:final_version";

// ---------------------------------------------------------------------------
// Namespace-level dumps
// ---------------------------------------------------------------------------

/// `<ns>:<base64 of rank-0 bitmap>` per namespace, `;`-separated.
#[must_use]
pub fn masters_dump(namespaces: &[Arc<Namespace>]) -> String {
    let mut out = String::new();
    for ns in namespaces {
        let rank0 = ns
            .replica_maps()
            .rank_b64(0)
            .unwrap_or_default();
        let _ = write!(out, "{}:{rank0};", ns.name());
    }
    chomp_semicolon(out)
}

/// `<ns>:<base64>` per namespace where each bit marks a partition this node
/// serves reads for as a non-master. Computed fresh under the partition
/// locks rather than read from the maintained maps.
#[must_use]
pub fn proles_dump(namespaces: &[Arc<Namespace>]) -> String {
    let mut out = String::new();
    for ns in namespaces {
        let mut bitmap = vec![0u8; BITMAP_BYTES];
        for partition in ns.partitions() {
            let inner = partition.lock();
            let best_for_read = ns.best_node(&inner, true);
            if best_for_read == ns.self_node() && !inner.is_working_master(ns.self_node()) {
                let pid = partition.id();
                bitmap[(pid / 8) as usize] |= 0x80 >> (pid % 8);
            }
        }
        let _ = write!(out, "{}:{};", ns.name(), STANDARD.encode(&bitmap));
    }
    chomp_semicolon(out)
}

/// `<ns>:<replication_factor>,<b64 rank 0>,<b64 rank 1>,…` per namespace,
/// `;`-separated. This is the record format `ClientReplicaTable` decodes.
#[must_use]
pub fn all_replicas_dump(namespaces: &[Arc<Namespace>]) -> String {
    let mut out = String::new();
    for ns in namespaces {
        let _ = write!(out, "{}:{}", ns.name(), ns.configured_replication_factor());
        for rank in 0..ns.configured_replication_factor() {
            let b64 = ns.replica_maps().rank_b64(rank).unwrap_or_default();
            let _ = write!(out, ",{b64}");
        }
        out.push(';');
    }
    chomp_semicolon(out)
}

fn chomp_semicolon(mut dump: String) -> String {
    if dump.ends_with(';') {
        dump.pop();
    }
    dump
}

// ---------------------------------------------------------------------------
// Per-partition info dump
// ---------------------------------------------------------------------------

/// One header line, then one `:`-joined record per `(ns, pid)`.
#[must_use]
pub fn info_dump(namespaces: &[Arc<Namespace>]) -> String {
    let mut out = String::from(INFO_DUMP_HEADER);
    for ns in namespaces {
        for partition in ns.partitions() {
            let inner = partition.lock();
            out.push('\n');
            write_info_record(&mut out, ns, partition.id(), &inner);
        }
    }
    out
}

fn write_info_record(out: &mut String, ns: &Namespace, pid: u32, p: &PartitionInner) {
    let rank = ns.self_replica_rank(p);
    let replica = rank.unwrap_or_else(|| p.n_replicas());
    let records = p.tree().map_or(0, |t| t.size());
    let sub_records = p.sub_tree().map_or(0, |t| t.size());

    let _ = write!(
        out,
        "{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{:X}:",
        ns.name(),
        pid,
        state_char(ns, p),
        replica,
        p.dupls().len(),
        p.origin(),
        p.target(),
        p.pending_emigrations(),
        p.pending_immigrations(),
        records,
        sub_records,
        p.n_tombstones(),
        p.current_outgoing_ldt_version(),
    );
    match p.regime() {
        RegimeState::Modern {
            version,
            final_version,
        } => {
            let _ = write!(out, "{version}:{final_version}");
        }
        RegimeState::Legacy {
            version_info,
            primary_version_info,
            ..
        } => {
            let _ = write!(out, "{version_info}:{primary_version_info}");
        }
    }
}

/// Single-character partition state for the info dump.
fn state_char(ns: &Namespace, p: &PartitionInner) -> char {
    match p.regime() {
        RegimeState::Legacy { state, .. } => state.as_char(),
        RegimeState::Modern { version, .. } => {
            if ns.self_replica_rank(p).is_some() {
                if p.pending_immigrations() == 0 {
                    'S'
                } else {
                    'D'
                }
            } else if version.is_null() {
                'A'
            } else {
                'Z'
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Replica stats
// ---------------------------------------------------------------------------

/// Walks every partition and accumulates object counts into the bucket for
/// this node's role there.
#[must_use]
pub fn replica_stats(ns: &Namespace) -> ReplicaStats {
    let mut stats = ReplicaStats::default();
    for partition in ns.partitions() {
        let inner = partition.lock();
        let bucket = if inner.is_working_master(ns.self_node()) {
            &mut stats.master
        } else if ns.self_replica_rank(&inner).is_some() {
            &mut stats.prole
        } else {
            &mut stats.non_replica
        };

        let records = inner.tree().map_or(0, |t| t.size());
        // Tombstones can transiently exceed the index size; clamp at zero.
        bucket.objects += records.saturating_sub(inner.n_tombstones());
        bucket.sub_objects += inner.sub_tree().map_or(0, |t| t.size());
        bucket.tombstones += inner.n_tombstones();
    }
    stats
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
