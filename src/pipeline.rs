//! One-shot batch orchestration: database rows in, serializable map out.
//!
//! The orchestrating analytics job loads the two row sets up front, calls
//! [`analyze`] once, and persists the result. Validation problems abort with
//! an error; degenerate-but-legal data (no ingredients, too few recipes)
//! short-circuits to an empty, well-formed result instead. No matrix type
//! crosses this boundary.

use crate::cost::build_cost_matrix;
use crate::em::{learn_distances, EmDiagnostics};
use crate::embed::{embed, MIN_POINTS};
use crate::rollup::{apply_rollup, create_rollup_mapping, prune_rolled_leaves};
use crate::tree::{annotate_usage, build_tree, IngredientRow, UsageNode};
use crate::volume::{RecipeRow, VolumeMatrix};
use crate::{Config, Result};
use log::info;
use serde::Serialize;
use std::collections::HashMap;

/// One embedded recipe, ready for the analytics store.
#[derive(Debug, Clone, Serialize)]
pub struct RecipePoint {
    pub recipe_id: String,
    pub recipe_name: String,
    pub x: f32,
    pub y: f32,
}

/// Full result of one analytics run.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    /// One point per embedded recipe; empty when the corpus is too small.
    pub points: Vec<RecipePoint>,
    /// Ingredient tree annotated with recipe-usage counts (pre-rollup view).
    pub usage_tree: UsageNode,
    pub diagnostics: EmDiagnostics,
}

/// Run the full pipeline on one dataset snapshot.
///
/// Ingredient and recipe rows are consumed as immutable tables; every stage
/// builds fresh structures, so a caller can retry a failed run without
/// worrying about partial state.
pub fn analyze(
    ingredients: &[IngredientRow],
    recipe_rows: &[RecipeRow],
    cfg: &Config,
) -> Result<Analysis> {
    cfg.validate()?;

    let (tree, parent_map) = build_tree(ingredients, cfg)?;
    let usage_tree = annotate_usage(&tree, recipe_rows);

    if ingredients.is_empty() || recipe_rows.is_empty() {
        info!("empty snapshot; returning empty analysis");
        return Ok(empty(usage_tree));
    }

    let rollup = create_rollup_mapping(ingredients, &parent_map);
    info!(
        "rolling up {} substitutable leaves out of {} ingredients",
        rollup.len(),
        ingredients.len()
    );
    let rolled = apply_rollup(recipe_rows, &rollup);

    // Matrices cover the surviving ingredient set only; a rolled-up leaf
    // column would sit dead in every solve and pull the refit toward it.
    let learn_map = prune_rolled_leaves(&parent_map, &rollup);
    let (initial_cost, ingredient_registry) = build_cost_matrix(&learn_map)?;

    let (volumes, recipe_registry) = VolumeMatrix::build(&rolled, &ingredient_registry)?;
    if recipe_registry.len() < MIN_POINTS {
        info!(
            "only {} usable recipes, below the embedding minimum of {MIN_POINTS}; returning empty analysis",
            recipe_registry.len()
        );
        return Ok(empty(usage_tree));
    }

    let outcome = learn_distances(&volumes, &initial_cost, cfg)?;
    let coords = embed(&outcome.distances, cfg)?;

    // Re-attach names: first observed value per recipe id, matching the
    // rollup merge rule for non-volume columns.
    let mut names: HashMap<&str, &str> = HashMap::new();
    for row in recipe_rows {
        names.entry(row.recipe_id.as_str()).or_insert(&row.recipe_name);
    }

    let points = recipe_registry
        .ids()
        .enumerate()
        .map(|(i, id)| RecipePoint {
            recipe_id: id.to_string(),
            recipe_name: names.get(id).copied().unwrap_or(id).to_string(),
            x: coords[[i, 0]],
            y: coords[[i, 1]],
        })
        .collect();

    Ok(Analysis {
        points,
        usage_tree,
        diagnostics: outcome.diagnostics,
    })
}

fn empty(usage_tree: UsageNode) -> Analysis {
    Analysis {
        points: Vec::new(),
        usage_tree,
        diagnostics: EmDiagnostics::default(),
    }
}
