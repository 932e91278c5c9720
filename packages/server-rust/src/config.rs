//! Node and namespace configuration.

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use atoll_core::{NodeId, PARTITION_COUNT};

use crate::partition::Regime;
use crate::storage::TreeSlot;

/// Process-level configuration for the partition core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    /// This node's cluster identifier. Passed explicitly into every
    /// namespace at init; the core has no ambient notion of "self".
    pub self_node: NodeId,
    pub namespaces: Vec<NamespaceConfig>,
}

impl NodeConfig {
    /// Parses a config document from JSON.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("parse node config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the whole document.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.self_node.is_zero(), "self node id must be nonzero");
        for ns in &self.namespaces {
            ns.validate()
                .with_context(|| format!("namespace '{}'", ns.name))?;
        }
        Ok(())
    }
}

/// Per-namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceConfig {
    pub name: String,
    /// Cluster-wide target replica count, at least 1.
    pub replication_factor: u32,
    /// Enables the secondary record tree carried by the legacy
    /// large-object feature.
    #[serde(default)]
    pub sub_tree_enabled: bool,
    /// Clustering regime this namespace runs under.
    pub regime: Regime,
    /// Persisted tree roots for a warm restart. Absent on cold start.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tree_roots: Option<TreeRoots>,
}

impl NamespaceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.name.is_empty(), "namespace name must not be empty");
        anyhow::ensure!(
            self.replication_factor >= 1,
            "replication factor must be at least 1"
        );
        if let Some(roots) = &self.tree_roots {
            anyhow::ensure!(
                roots.primary.len() == PARTITION_COUNT as usize,
                "expected {PARTITION_COUNT} primary tree roots, got {}",
                roots.primary.len()
            );
            if let Some(sub) = &roots.sub {
                anyhow::ensure!(
                    self.sub_tree_enabled,
                    "sub tree roots present but the sub tree is disabled"
                );
                anyhow::ensure!(
                    sub.len() == PARTITION_COUNT as usize,
                    "expected {PARTITION_COUNT} sub tree roots, got {}",
                    sub.len()
                );
            }
        }
        Ok(())
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            replication_factor: 2,
            sub_tree_enabled: false,
            regime: Regime::Modern,
            tree_roots: None,
        }
    }
}

/// Persisted-root arrays handed between the storage layer and a namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeRoots {
    /// One slot per partition for the primary tree.
    pub primary: Vec<TreeSlot>,
    /// One slot per partition for the sub tree, when enabled.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sub: Option<Vec<TreeSlot>>,
}

impl TreeRoots {
    /// Empty slot arrays sized for every partition.
    #[must_use]
    pub fn sized(sub_tree_enabled: bool) -> Self {
        Self {
            primary: vec![TreeSlot::default(); PARTITION_COUNT as usize],
            sub: sub_tree_enabled.then(|| vec![TreeSlot::default(); PARTITION_COUNT as usize]),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_document() {
        let config = NodeConfig::from_json(
            r#"{
                "selfNode": 161,
                "namespaces": [
                    { "name": "orders", "replicationFactor": 2, "regime": "modern" }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(config.self_node, NodeId(161));
        assert_eq!(config.namespaces.len(), 1);
        assert_eq!(config.namespaces[0].replication_factor, 2);
        assert!(!config.namespaces[0].sub_tree_enabled);
        assert_eq!(config.namespaces[0].regime, Regime::Modern);
        assert!(config.namespaces[0].tree_roots.is_none());
    }

    #[test]
    fn rejects_zero_self_node() {
        let err = NodeConfig::from_json(r#"{ "selfNode": 0, "namespaces": [] }"#).unwrap_err();
        assert!(err.to_string().contains("self node"));
    }

    #[test]
    fn rejects_zero_replication_factor() {
        let mut ns = NamespaceConfig {
            name: "orders".to_string(),
            replication_factor: 0,
            ..NamespaceConfig::default()
        };
        assert!(ns.validate().is_err());
        ns.replication_factor = 1;
        assert!(ns.validate().is_ok());
    }

    #[test]
    fn rejects_wrong_root_array_length() {
        let ns = NamespaceConfig {
            name: "orders".to_string(),
            tree_roots: Some(TreeRoots {
                primary: vec![TreeSlot::default(); 10],
                sub: None,
            }),
            ..NamespaceConfig::default()
        };
        assert!(ns.validate().is_err());
    }

    #[test]
    fn rejects_sub_roots_without_sub_tree() {
        let ns = NamespaceConfig {
            name: "orders".to_string(),
            sub_tree_enabled: false,
            tree_roots: Some(TreeRoots {
                primary: vec![TreeSlot::default(); PARTITION_COUNT as usize],
                sub: Some(vec![TreeSlot::default(); PARTITION_COUNT as usize]),
            }),
            ..NamespaceConfig::default()
        };
        assert!(ns.validate().is_err());
    }

    #[test]
    fn sized_roots_cover_every_partition() {
        let roots = TreeRoots::sized(true);
        assert_eq!(roots.primary.len(), PARTITION_COUNT as usize);
        assert_eq!(roots.sub.unwrap().len(), PARTITION_COUNT as usize);
        assert!(TreeRoots::sized(false).sub.is_none());
    }
}
