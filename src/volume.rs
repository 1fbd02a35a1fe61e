//! Sparse recipe × ingredient volume matrix.
//!
//! Each surviving row is a probability distribution over ingredient columns:
//! rows come pre-normalized from upstream and are deliberately not
//! re-normalized here, so upstream data errors surface instead of being
//! masked. Recipes whose rows sum to zero volume are excluded outright; an
//! all-zero row never exists.

use crate::registry::Registry;
use crate::{Error, Result};
use log::debug;
use ndarray::Array1;
use std::collections::HashMap;

/// One recipe-ingredient row from the (rolled-up) database snapshot.
#[derive(Debug, Clone)]
pub struct RecipeRow {
    pub recipe_id: String,
    pub recipe_name: String,
    pub ingredient_id: String,
    pub volume_fraction: f32,
}

impl RecipeRow {
    pub fn new(recipe_id: &str, recipe_name: &str, ingredient_id: &str, volume: f32) -> Self {
        Self {
            recipe_id: recipe_id.to_string(),
            recipe_name: recipe_name.to_string(),
            ingredient_id: ingredient_id.to_string(),
            volume_fraction: volume,
        }
    }
}

/// Sparse row-major volume matrix; `rows[r]` holds the non-zero
/// `(ingredient index, volume)` entries of recipe `r`.
#[derive(Debug, Clone)]
pub struct VolumeMatrix {
    rows: Vec<Vec<(usize, f32)>>,
    n_ingredients: usize,
}

impl VolumeMatrix {
    /// Assemble the matrix from `(recipe index, ingredient index, volume)`
    /// triples and return it with the recipe registry.
    ///
    /// Recipes appear in first-observed row order; zero-volume recipes are
    /// dropped before they get an index. An ingredient id missing from the
    /// registry is a validation failure, not a skippable row.
    pub fn build(rows: &[RecipeRow], ingredients: &Registry) -> Result<(Self, Registry)> {
        // First pass: group entries per recipe in first-observed order.
        let mut order: Vec<&str> = Vec::new();
        let mut grouped: HashMap<&str, Vec<(usize, f32)>> = HashMap::new();
        for row in rows {
            let col = ingredients
                .index_of(&row.ingredient_id)
                .ok_or_else(|| Error::UnknownIngredient(row.ingredient_id.clone()))?;
            let entries = grouped.entry(row.recipe_id.as_str()).or_insert_with(|| {
                order.push(row.recipe_id.as_str());
                Vec::new()
            });
            // Same column twice in one recipe accumulates.
            match entries.iter_mut().find(|(c, _)| *c == col) {
                Some((_, v)) => *v += row.volume_fraction,
                None => entries.push((col, row.volume_fraction)),
            }
        }

        let mut registry = Registry::new();
        let mut matrix_rows = Vec::with_capacity(order.len());
        for recipe_id in order {
            let mut entries = grouped.remove(recipe_id).unwrap_or_default();
            let total: f32 = entries.iter().map(|(_, v)| v).sum();
            if total <= 0.0 {
                debug!("excluding zero-volume recipe {recipe_id:?}");
                continue;
            }
            entries.sort_unstable_by_key(|(c, _)| *c);
            registry.insert(recipe_id.to_string())?;
            matrix_rows.push(entries);
        }

        let matrix = Self {
            rows: matrix_rows,
            n_ingredients: ingredients.len(),
        };
        Ok((matrix, registry))
    }

    pub fn n_recipes(&self) -> usize {
        self.rows.len()
    }

    pub fn n_ingredients(&self) -> usize {
        self.n_ingredients
    }

    /// Non-zero `(ingredient index, volume)` entries of recipe `r`.
    pub fn row(&self, r: usize) -> &[(usize, f32)] {
        &self.rows[r]
    }

    pub fn row_sum(&self, r: usize) -> f32 {
        self.rows[r].iter().map(|(_, v)| v).sum()
    }

    /// Densify recipe `r` onto an index subset, in the subset's order.
    ///
    /// `columns` must be sorted ascending; entries outside it are ignored.
    pub fn row_on(&self, r: usize, columns: &[usize]) -> Array1<f32> {
        let mut dense = Array1::<f32>::zeros(columns.len());
        for &(col, v) in &self.rows[r] {
            if let Ok(k) = columns.binary_search(&col) {
                dense[k] = v;
            }
        }
        dense
    }
}
