//! # barcart
//!
//! Learn a substitution-aware distance between ingredients, then map recipes
//! into a 2D similarity space.
//!
//! ## The Problem
//!
//! Two recipes rarely share exact ingredient lists, yet a Manhattan made with
//! rye and one made with bourbon are nearly the same drink. Set-overlap
//! metrics miss this entirely. Optimal transport does not: treat each recipe
//! as a probability distribution over ingredients, give the ingredients a
//! ground-cost matrix, and the Earth Mover's Distance between two recipes is
//! the cheapest way to pour one into the other.
//!
//! The catch is the ground cost. We bootstrap it from the ingredient
//! hierarchy (tree-path distance), then refine it with an EM loop: transport
//! plans reveal which ingredients actually substitute for each other across
//! the corpus, and the refit cost matrix feeds the next round of transport.
//!
//! ## Pipeline
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Tree build | [`tree`] | rooted tree + `child → (parent, weight)` map |
//! | Ground cost | [`cost`] | tree-path cost matrix + ingredient registry |
//! | Rollup | [`rollup`] | substitutable leaves folded into their category |
//! | Volumes | [`volume`] | sparse recipe × ingredient distributions |
//! | EM loop | [`em`] | learned cost matrix + recipe distance matrix |
//! | Embedding | [`embed`] | 2D coordinates per recipe |
//!
//! [`pipeline::analyze`] wires the stages together and returns serializable
//! records for the analytics job; nothing else needs to be called directly.
//!
//! ## Quick Start
//!
//! ```rust
//! use barcart::{analyze, Config, IngredientRow, RecipeRow};
//!
//! let ingredients = vec![
//!     IngredientRow::top_level("gin", "Gin"),
//!     IngredientRow::child("london-dry", "London Dry", "gin", true),
//!     IngredientRow::child("old-tom", "Old Tom", "gin", true),
//!     IngredientRow::top_level("vermouth", "Vermouth"),
//! ];
//! let rows = vec![
//!     RecipeRow::new("martini", "Martini", "london-dry", 0.75),
//!     RecipeRow::new("martini", "Martini", "vermouth", 0.25),
//!     RecipeRow::new("martinez", "Martinez", "old-tom", 0.6),
//!     RecipeRow::new("martinez", "Martinez", "vermouth", 0.4),
//!     RecipeRow::new("gibson", "Gibson", "london-dry", 0.8),
//!     RecipeRow::new("gibson", "Gibson", "vermouth", 0.2),
//! ];
//!
//! let analysis = analyze(&ingredients, &rows, &Config::default()).unwrap();
//! assert_eq!(analysis.points.len(), 3);
//! ```
//!
//! ## What Can Go Wrong
//!
//! 1. **Cyclic hierarchy**: a parent chain that loops is a hard error, never
//!    an infinite walk.
//! 2. **Un-normalized volumes**: rows are expected pre-normalized per recipe;
//!    the engine does not re-normalize, so upstream data errors surface as
//!    bad distances rather than being masked.
//! 3. **Tiny corpora**: fewer than 3 recipes cannot be embedded; the pipeline
//!    returns an empty point list instead of degenerate coordinates.
//! 4. **Precision drift**: everything is f32 by contract. Widening a matrix
//!    to f64 "for safety" doubles memory on the largest object in the job.
//!
//! ## References
//!
//! - Kantorovich (1942). "On the Translocation of Masses"
//! - Cuturi (2013). "Sinkhorn Distances: Lightspeed Computation of Optimal Transport"
//! - Cuturi & Avis (2014). "Ground Metric Learning"
//! - McInnes, Healy, Melville (2018). "UMAP: Uniform Manifold Approximation and Projection"

use thiserror::Error;

pub mod cost;
pub mod em;
pub mod embed;
pub mod pipeline;
pub mod registry;
pub mod rollup;
pub mod transport;
pub mod tree;
pub mod volume;

pub use cost::build_cost_matrix;
pub use em::{learn_distances, EmDiagnostics, EmOutcome, IterationStats};
pub use embed::embed;
pub use pipeline::{analyze, Analysis, RecipePoint};
pub use registry::Registry;
pub use rollup::{apply_rollup, create_rollup_mapping, prune_rolled_leaves};
pub use tree::{annotate_usage, build_tree, IngredientRow, ParentMap, TreeNode, UsageNode, ROOT_ID};
pub use volume::{RecipeRow, VolumeMatrix};

/// Engine error variants.
///
/// Only validation failures surface here; degenerate-but-legal inputs
/// (empty corpora, unsolvable pairs, exhausted iteration budgets) are
/// absorbed with logging and produce well-formed results.
#[derive(Debug, Error)]
pub enum Error {
    /// The ingredient hierarchy contains a parent-chain cycle.
    #[error("ingredient hierarchy contains a cycle through {0:?}")]
    CyclicHierarchy(String),

    /// The same ingredient id appears more than once in the input table.
    #[error("duplicate ingredient id {0:?}")]
    DuplicateIngredient(String),

    /// An ingredient row claims the id reserved for the synthetic root.
    #[error("ingredient id {0:?} is reserved for the synthetic root")]
    ReservedIngredientId(String),

    /// An input references an ingredient id outside the known set.
    #[error("unknown ingredient id {0:?}")]
    UnknownIngredient(String),

    /// Internal matrix wiring mismatch.
    #[error("matrix shape mismatch: expected ({0}, {1}), got ({2}, {3})")]
    ShapeMismatch(usize, usize, usize, usize),

    /// Configuration that cannot produce a meaningful run.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The embedding stage was handed fewer points than it is defined for.
    ///
    /// The pipeline short-circuits small corpora to an empty result before
    /// this can surface; it exists for direct callers of [`embed::embed`].
    #[error("embedding requires at least 3 recipes, got {0}")]
    DegenerateEmbedding(usize),

    /// A per-pair transport solve could not produce a finite plan.
    ///
    /// Never escapes [`pipeline::analyze`]; the EM loop logs it and falls
    /// back to a default distance for the affected pair.
    #[error("transport solve failed: {0}")]
    TransportFailed(&'static str),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) const EPSILON: f32 = 1e-7;

/// Configuration surface, passed in by the orchestrating job.
///
/// The engine never reads the environment itself.
#[derive(Debug, Clone)]
pub struct Config {
    /// EM iteration budget. Exhausting it is the normal stopping condition.
    pub em_iterations: usize,
    /// Entropic regularization for the per-pair transport solves.
    pub transport_reg: f32,
    /// Sinkhorn iteration cap per pair.
    pub transport_iters: usize,
    /// Worker threads for the E-step pair solves. 0 = rayon default.
    pub workers: usize,
    /// Neighborhood size for the embedding graph.
    pub embed_neighbors: usize,
    /// Minimum separation between embedded points.
    pub embed_min_dist: f32,
    /// Optimization epochs for the embedding layout.
    pub embed_epochs: usize,
    /// RNG seed for the embedding; same seed, same coordinates.
    pub embed_seed: u64,
    /// Edge weight for hierarchy edges that do not declare one.
    pub default_edge_weight: f32,
    /// Display name for the synthetic root node.
    pub root_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            em_iterations: 5,
            transport_reg: 0.1,
            transport_iters: 200,
            workers: 0,
            embed_neighbors: 15,
            embed_min_dist: 0.1,
            embed_epochs: 200,
            embed_seed: 42,
            default_edge_weight: 1.0,
            root_name: "All Ingredients".to_string(),
        }
    }
}

impl Config {
    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.em_iterations == 0 {
            return Err(Error::InvalidConfig("em_iterations must be at least 1"));
        }
        if self.transport_reg <= 0.0 || !self.transport_reg.is_finite() {
            return Err(Error::InvalidConfig(
                "transport_reg must be positive and finite",
            ));
        }
        if self.transport_iters == 0 {
            return Err(Error::InvalidConfig("transport_iters must be at least 1"));
        }
        if self.embed_neighbors < 2 {
            return Err(Error::InvalidConfig("embed_neighbors must be at least 2"));
        }
        if self.embed_min_dist <= 0.0 || !self.embed_min_dist.is_finite() {
            return Err(Error::InvalidConfig(
                "embed_min_dist must be positive and finite",
            ));
        }
        if self.default_edge_weight <= 0.0 || !self.default_edge_weight.is_finite() {
            return Err(Error::InvalidConfig(
                "default_edge_weight must be positive and finite",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        let cfg = Config {
            em_iterations: 0,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn non_finite_reg_rejected() {
        let cfg = Config {
            transport_reg: f32::NAN,
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }
}
