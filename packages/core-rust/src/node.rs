//! Cluster node identity.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 64-bit cluster node identifier.
///
/// Zero is reserved and means "no node here": an unassigned replica slot,
/// no acting-master redirection, and so on. Diagnostic text renders node
/// ids as uppercase hex.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl NodeId {
    /// The reserved "no node" identifier.
    pub const ZERO: Self = Self(0);

    /// Whether this is the reserved "no node" identifier.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<NodeId> for u64 {
    fn from(node: NodeId) -> Self {
        node.0
    }
}
