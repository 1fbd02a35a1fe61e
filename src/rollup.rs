//! Substitutable-leaf rollup: fold interchangeable leaves into their parent
//! category before learning.
//!
//! A specific brand of gin adds little discriminative signal and one more
//! column to every matrix downstream. Rolling such leaves into their category
//! shrinks the ingredient space the EM loop learns over. Only true leaves are
//! eligible: the parent-set is derived from the parent map, so an ingredient
//! with children is never rolled up no matter how it is flagged.

use crate::tree::{IngredientRow, ParentMap, ROOT_ID};
use crate::volume::RecipeRow;
use std::collections::{HashMap, HashSet};

/// Build the `leaf id → parent id` rollup mapping.
///
/// A leaf qualifies when it has no children and `allow_substitution` is set.
/// Leaves directly under the synthetic root are left alone; there is no real
/// category to fold them into.
pub fn create_rollup_mapping(
    rows: &[IngredientRow],
    parent_map: &ParentMap,
) -> HashMap<String, String> {
    let parents: HashSet<&str> = parent_map
        .values()
        .map(|(parent, _)| parent.as_str())
        .collect();

    let mut mapping = HashMap::new();
    for row in rows {
        if !row.allow_substitution || parents.contains(row.id.as_str()) {
            continue;
        }
        if let Some((parent, _)) = parent_map.get(&row.id) {
            if parent != ROOT_ID {
                mapping.insert(row.id.clone(), parent.clone());
            }
        }
    }
    mapping
}

/// Drop rolled-up leaves from the parent map.
///
/// Downstream matrices are built over the surviving ingredient set; a
/// rolled-up leaf would otherwise keep a dead column in every cost and mass
/// matrix the learner touches.
pub fn prune_rolled_leaves(
    parent_map: &ParentMap,
    mapping: &HashMap<String, String>,
) -> ParentMap {
    parent_map
        .iter()
        .filter(|(id, _)| !mapping.contains_key(id.as_str()))
        .map(|(id, link)| (id.clone(), link.clone()))
        .collect()
}

/// Rewrite recipe rows through the rollup mapping and merge the collisions.
///
/// Rows sharing `(recipe_id, mapped ingredient)` merge by summing
/// `volume_fraction`; every other column keeps the first observed value.
/// Unmapped ingredient ids pass through unchanged, and first-observed row
/// order is preserved.
pub fn apply_rollup(rows: &[RecipeRow], mapping: &HashMap<String, String>) -> Vec<RecipeRow> {
    let mut merged: Vec<RecipeRow> = Vec::with_capacity(rows.len());
    let mut slot: HashMap<(String, String), usize> = HashMap::with_capacity(rows.len());

    for row in rows {
        let ingredient = mapping
            .get(&row.ingredient_id)
            .cloned()
            .unwrap_or_else(|| row.ingredient_id.clone());
        let key = (row.recipe_id.clone(), ingredient.clone());
        match slot.get(&key) {
            Some(&i) => merged[i].volume_fraction += row.volume_fraction,
            None => {
                slot.insert(key, merged.len());
                let mut out = row.clone();
                out.ingredient_id = ingredient;
                merged.push(out);
            }
        }
    }
    merged
}
