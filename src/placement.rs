//! Placement engine (C2): scoring for primary and mirror node selection
//! under geographic-diversity and capacity rules (spec section 4.2).

use crate::registry::NodeRegistry;

/// Weights controlling the primary-placement score, configurable so
/// operators can weight capacity higher (spec section 4.2 rationale).
#[derive(Debug, Clone, Copy)]
pub struct PlacementWeights {
    pub location_weight: f64,
    pub space_weight: f64,
}

impl Default for PlacementWeights {
    fn default() -> Self {
        PlacementWeights {
            location_weight: 1.0,
            space_weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScoredNode {
    idx: usize,
    score: f64,
    free_space_kb: i64,
    rank: usize,
}

/// Returns node indices (into the registry's preference-list order)
/// qualifying to host the primary replica of a file of `size` bytes,
/// sorted best-first.
pub fn choose_for_primary(
    registry: &NodeRegistry,
    size_bytes: u64,
    weights: PlacementWeights,
) -> Vec<usize> {
    let n = registry.status.preference.len() as f64;
    let mut candidates: Vec<ScoredNode> = Vec::new();

    for (rank, &idx) in registry.status.preference.iter().enumerate() {
        if !registry.status.is_live(idx) {
            continue;
        }
        let Some(node) = registry.get(idx) else { continue };
        if (node.free_space_kb as i128) * 1024 <= size_bytes as i128 {
            continue;
        }
        let score = (n - rank as f64) * weights.location_weight * 1e8
            + (node.free_space_kb as f64) * weights.space_weight;
        candidates.push(ScoredNode {
            idx,
            score,
            free_space_kb: node.free_space_kb,
            rank,
        });
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap()
            .then_with(|| b.free_space_kb.cmp(&a.free_space_kb))
            .then_with(|| a.rank.cmp(&b.rank))
            .then_with(|| {
                registry
                    .get(a.idx)
                    .map(|n| n.name.as_str())
                    .cmp(&registry.get(b.idx).map(|n| n.name.as_str()))
            })
    });

    candidates.into_iter().map(|c| c.idx).collect()
}

/// Picks a mirror node index for `lfn`, excluding sites already holding a
/// replica and nodes that are dead/disabled/retiring or undersized.
/// `current_replica_sites` is the set of sites already holding a replica.
pub fn choose_for_mirror(
    registry: &NodeRegistry,
    current_replica_sites: &[String],
    size_bytes: u64,
) -> Option<usize> {
    let mut best: Option<(usize, i64, &str)> = None;

    for (idx, node) in registry.iter() {
        if current_replica_sites.iter().any(|s| s == &node.site) {
            continue;
        }
        if !registry.status.is_live(idx) {
            continue;
        }
        if (node.free_space_kb as i128) * 1024 <= size_bytes as i128 {
            continue;
        }
        // Tie-break: greatest free space, then lexicographically lowest name.
        let candidate_is_better = match best {
            None => true,
            Some((_, free, name)) => {
                node.free_space_kb > free || (node.free_space_kb == free && node.name.as_str() < name)
            }
        };
        if candidate_is_better {
            best = Some((idx, node.free_space_kb, node.name.as_str()));
        }
    }

    best.map(|(idx, _, _)| idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{Disk, Node, NodeType, Timeouts};
    use crate::registry::NodeRegistry;
    use std::collections::HashMap;

    fn node(name: &str, site: &str, free_kb: i64) -> Node {
        Node {
            name: name.to_string(),
            site: site.to_string(),
            path: "/data".to_string(),
            inbox: "/data/inbox".to_string(),
            node_type: NodeType::Globus,
            disks: vec![Disk { index: 1, quota_kb: free_kb }],
            free_space_kb: free_kb,
            timeouts: Timeouts::default(),
            extra_rsl: None,
            extra_jss_contact: None,
            gpfs: false,
            properties: HashMap::new(),
        }
    }

    fn registry_with(nodes: Vec<Node>) -> NodeRegistry {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = NodeRegistry::new(dir.path());
        for n in nodes {
            registry.add(n);
        }
        registry
    }

    #[test]
    fn primary_prefers_rank_over_space_by_default() {
        // N1 ranked first with less space should still outrank N2 with
        // more space, because location_weight*1e8 dominates.
        let registry = registry_with(vec![node("n1", "siteA", 1_000), node("n2", "siteB", 10_000_000)]);
        let ranked = choose_for_primary(&registry, 100, PlacementWeights::default());
        assert_eq!(ranked[0], 0);
    }

    #[test]
    fn primary_excludes_undersized_and_dead_nodes() {
        let mut registry = registry_with(vec![node("n1", "siteA", 1), node("n2", "siteB", 1_000_000)]);
        registry.status.add_to_dead(1);
        let ranked = choose_for_primary(&registry, 100_000, PlacementWeights::default());
        assert!(ranked.is_empty());
    }

    #[test]
    fn mirror_excludes_sites_already_holding_a_replica() {
        let registry = registry_with(vec![
            node("n1", "siteA", 1_000_000),
            node("n2", "siteA", 2_000_000),
            node("n3", "siteB", 500_000),
        ]);
        let mirror = choose_for_mirror(&registry, &["siteA".to_string()], 1_000).unwrap();
        assert_eq!(registry.get(mirror).unwrap().name, "n3");
    }

    #[test]
    fn mirror_picks_greatest_free_space_among_eligible() {
        let registry = registry_with(vec![
            node("n1", "siteA", 1_000_000),
            node("n2", "siteB", 2_000_000),
            node("n3", "siteC", 3_000_000),
        ]);
        let mirror = choose_for_mirror(&registry, &[], 1_000).unwrap();
        assert_eq!(registry.get(mirror).unwrap().name, "n3");
    }
}
