//! Initial ingredient ground-cost matrix from tree edge weights.
//!
//! Cost between two ingredients is the weighted length of the unique tree
//! path between them: `depth(a) + depth(b) - 2·depth(lca(a, b))` over
//! root-to-node weighted depths. Symmetric, zero-diagonal, non-negative by
//! construction; anything else is a defect.

use crate::registry::Registry;
use crate::tree::{ParentMap, ROOT_ID};
use crate::{Error, Result};
use ndarray::Array2;
use std::collections::HashMap;

/// Build the dense ground-cost matrix and the ingredient registry.
///
/// Indices follow root preorder with siblings in sorted-id order, so the
/// layout is deterministic regardless of input row order. Every map entry
/// must be reachable from the root: a parent id that is neither a known
/// ingredient nor [`ROOT_ID`], or a cycle that never meets the root, is
/// rejected rather than silently dropped.
pub fn build_cost_matrix(parent_map: &ParentMap) -> Result<(Array2<f32>, Registry)> {
    if let Some((parent, _)) = parent_map
        .values()
        .find(|(parent, _)| parent != ROOT_ID && !parent_map.contains_key(parent))
    {
        return Err(Error::UnknownIngredient(parent.clone()));
    }

    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (child, (parent, _)) in parent_map {
        children_of
            .entry(parent.as_str())
            .or_default()
            .push(child.as_str());
    }
    for siblings in children_of.values_mut() {
        siblings.sort_unstable();
    }

    let mut registry = Registry::new();
    let mut stack: Vec<&str> = children_of
        .get(ROOT_ID)
        .map(|kids| kids.iter().rev().copied().collect())
        .unwrap_or_default();
    while let Some(id) = stack.pop() {
        registry.insert(id.to_string())?;
        if let Some(kids) = children_of.get(id) {
            stack.extend(kids.iter().rev());
        }
    }

    if registry.len() != parent_map.len() {
        // Parents all resolved above, so anything the walk never reached
        // sits on a cycle detached from the root.
        let orphan = parent_map
            .keys()
            .find(|id| registry.index_of(id.as_str()).is_none())
            .cloned()
            .unwrap_or_default();
        return Err(Error::CyclicHierarchy(orphan));
    }

    let n = registry.len();

    // Root-to-node chains with cumulative weighted depth, one walk per node.
    // chains[i] holds (ancestor id, depth of that ancestor), node first.
    let mut chains: Vec<Vec<(&str, f32)>> = Vec::with_capacity(n);
    for id in registry.ids() {
        let mut chain = Vec::new();
        let mut current = id;
        let mut climb = Vec::new();
        while let Some((parent, weight)) = parent_map.get(current) {
            climb.push((current, *weight));
            current = parent.as_str();
        }
        // Accumulate depth top-down, then store node-first for LCA walks.
        let mut depth = 0.0f32;
        let mut top_down: Vec<(&str, f32)> = Vec::with_capacity(climb.len());
        for &(node, weight) in climb.iter().rev() {
            depth += weight;
            top_down.push((node, depth));
        }
        top_down.reverse();
        chain.extend(top_down);
        chain.push((ROOT_ID, 0.0));
        chains.push(chain);
    }

    let mut cost = Array2::<f32>::zeros((n, n));
    for i in 0..n {
        let depth_i = chains[i][0].1;
        let ancestors: HashMap<&str, f32> = chains[i].iter().copied().collect();
        for j in (i + 1)..n {
            let depth_j = chains[j][0].1;
            // First ancestor of j that also lies on i's chain is the LCA.
            let lca_depth = chains[j]
                .iter()
                .find_map(|(id, d)| ancestors.get(id).map(|_| *d))
                .unwrap_or(0.0);
            let d = (depth_i + depth_j - 2.0 * lca_depth).max(0.0);
            cost[[i, j]] = d;
            cost[[j, i]] = d;
        }
    }

    Ok((cost, registry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{build_tree, IngredientRow};
    use crate::Config;
    use proptest::prelude::*;

    fn whiskey_rows() -> Vec<IngredientRow> {
        vec![
            IngredientRow::top_level("spirit", "Spirit"),
            IngredientRow::child("whiskey", "Whiskey", "spirit", false),
            IngredientRow::child("bourbon", "Bourbon", "whiskey", true),
            IngredientRow::child("rye", "Rye", "whiskey", true),
        ]
    }

    #[test]
    fn path_costs_through_common_ancestor() {
        let (_, parents) = build_tree(&whiskey_rows(), &Config::default()).unwrap();
        let (cost, reg) = build_cost_matrix(&parents).unwrap();
        let idx = |id: &str| reg.index_of(id).unwrap();

        assert_eq!(cost[[idx("bourbon"), idx("rye")]], 2.0);
        assert_eq!(cost[[idx("bourbon"), idx("whiskey")]], 1.0);
        assert_eq!(cost[[idx("bourbon"), idx("spirit")]], 2.0);
        assert_eq!(cost[[idx("bourbon"), idx("bourbon")]], 0.0);
    }

    #[test]
    fn weighted_edges_accumulate() {
        let rows = vec![
            IngredientRow::top_level("spirit", "Spirit").with_weight(0.5),
            IngredientRow::child("whiskey", "Whiskey", "spirit", false).with_weight(0.25),
            IngredientRow::child("bourbon", "Bourbon", "whiskey", true).with_weight(0.75),
        ];
        let (_, parents) = build_tree(&rows, &Config::default()).unwrap();
        let (cost, reg) = build_cost_matrix(&parents).unwrap();
        let idx = |id: &str| reg.index_of(id).unwrap();

        // bourbon → whiskey → spirit: 0.75 + 0.25
        assert!((cost[[idx("bourbon"), idx("spirit")]] - 1.0).abs() < 1e-6);
        // spirit → root path is 0.5, bourbon full depth 1.5.
        assert!((cost[[idx("bourbon"), idx("whiskey")]] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn unknown_parent_id_is_rejected() {
        let mut map = ParentMap::new();
        map.insert("gin".to_string(), ("spirits".to_string(), 1.0));
        assert!(matches!(
            build_cost_matrix(&map),
            Err(Error::UnknownIngredient(_))
        ));
    }

    #[test]
    fn cycle_detached_from_the_root_is_rejected() {
        let mut map = ParentMap::new();
        map.insert("a".to_string(), ("b".to_string(), 1.0));
        map.insert("b".to_string(), ("a".to_string(), 1.0));
        assert!(matches!(
            build_cost_matrix(&map),
            Err(Error::CyclicHierarchy(_))
        ));
    }

    #[test]
    fn registry_order_is_deterministic() {
        let (_, parents) = build_tree(&whiskey_rows(), &Config::default()).unwrap();
        let (_, reg_a) = build_cost_matrix(&parents).unwrap();
        let (_, reg_b) = build_cost_matrix(&parents).unwrap();
        let a: Vec<&str> = reg_a.ids().collect();
        let b: Vec<&str> = reg_b.ids().collect();
        assert_eq!(a, b);
        // Preorder: parent before child.
        assert!(reg_a.index_of("spirit").unwrap() < reg_a.index_of("whiskey").unwrap());
        assert!(reg_a.index_of("whiskey").unwrap() < reg_a.index_of("bourbon").unwrap());
    }

    proptest! {
        /// Random forests always yield a symmetric, zero-diagonal,
        /// non-negative cost matrix.
        #[test]
        fn cost_matrix_is_a_valid_ground_metric(
            n in 1usize..10,
            parents in proptest::collection::vec(0usize..10, 10),
            weights in proptest::collection::vec(0.1f32..3.0, 10),
        ) {
            let mut map = ParentMap::new();
            for i in 0..n {
                // Parent is an earlier node or the root: acyclic by construction.
                let p = parents[i] % (i + 1);
                let parent = if p == i { ROOT_ID.to_string() } else { format!("n{p}") };
                map.insert(format!("n{i}"), (parent, weights[i]));
            }
            let (cost, reg) = build_cost_matrix(&map).unwrap();
            prop_assert_eq!(reg.len(), n);
            for i in 0..n {
                prop_assert_eq!(cost[[i, i]], 0.0);
                for j in 0..n {
                    prop_assert!(cost[[i, j]] >= 0.0);
                    prop_assert_eq!(cost[[i, j]], cost[[j, i]]);
                }
            }
        }
    }
}
