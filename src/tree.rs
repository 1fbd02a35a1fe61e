//! Ingredient hierarchy: flat database rows → rooted tree + parent map.
//!
//! The tree is kept as an id-keyed `child → (parent, weight)` map rather than
//! an object graph with parent pointers; cycle detection is then a bounded
//! ancestor walk, and the nested display tree is built by one explicit
//! recursion at the end.

use crate::volume::RecipeRow;
use crate::{Config, Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Id of the synthetic root every parent chain terminates at.
pub const ROOT_ID: &str = "root";

/// One ingredient row from the database snapshot.
#[derive(Debug, Clone)]
pub struct IngredientRow {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    /// Root-to-node ancestor chain as stored upstream. Carried through for
    /// callers that display breadcrumbs; the hierarchy itself derives from
    /// `parent_id`.
    pub path: Vec<String>,
    pub allow_substitution: bool,
    /// Weight of the edge to the parent; `None` falls back to
    /// [`Config::default_edge_weight`].
    pub edge_weight: Option<f32>,
}

impl IngredientRow {
    /// A non-substitutable ingredient with no parent.
    pub fn top_level(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: None,
            path: vec![id.to_string()],
            allow_substitution: false,
            edge_weight: None,
        }
    }

    /// An ingredient under `parent`.
    pub fn child(id: &str, name: &str, parent: &str, allow_substitution: bool) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: Some(parent.to_string()),
            path: vec![parent.to_string(), id.to_string()],
            allow_substitution,
            edge_weight: None,
        }
    }

    pub fn with_weight(mut self, weight: f32) -> Self {
        self.edge_weight = Some(weight);
        self
    }
}

/// `child id → (parent id, edge weight)` for every non-root ingredient.
///
/// Ingredients with no (or an unknown) database parent map to
/// [`ROOT_ID`] with the default weight.
pub type ParentMap = HashMap<String, (String, f32)>;

/// Display tree rooted at the synthetic root node.
#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub children: Vec<TreeNode>,
}

/// Display tree annotated with recipe-usage counts.
///
/// `recipe_count` counts distinct recipes using the ingredient itself;
/// `hierarchical_recipe_count` counts distinct recipes using anything in the
/// subtree, so a recipe pouring two siblings counts once at their parent.
#[derive(Debug, Clone, Serialize)]
pub struct UsageNode {
    pub id: String,
    pub name: String,
    pub recipe_count: usize,
    pub hierarchical_recipe_count: usize,
    pub children: Vec<UsageNode>,
}

/// Build the rooted tree and the parent map from flat ingredient rows.
///
/// Rows whose declared parent is absent from the input become top-level.
/// The synthetic root id is reserved; a row claiming it is rejected, since
/// it would silently merge with the root. A parent chain that fails to
/// reach the root within `rows.len()` steps is a cycle and aborts the run.
pub fn build_tree(rows: &[IngredientRow], cfg: &Config) -> Result<(TreeNode, ParentMap)> {
    let mut names: HashMap<&str, &str> = HashMap::with_capacity(rows.len());
    for row in rows {
        if row.id == ROOT_ID {
            return Err(Error::ReservedIngredientId(row.id.clone()));
        }
        if names.insert(&row.id, &row.name).is_some() {
            return Err(Error::DuplicateIngredient(row.id.clone()));
        }
    }

    let mut parent_map = ParentMap::with_capacity(rows.len());
    for row in rows {
        let weight = row.edge_weight.unwrap_or(cfg.default_edge_weight);
        let parent = match &row.parent_id {
            Some(p) if names.contains_key(p.as_str()) => p.clone(),
            // Unknown parent: treat as top-level rather than dropping the row.
            _ => ROOT_ID.to_string(),
        };
        parent_map.insert(row.id.clone(), (parent, weight));
    }

    validate_acyclic(&parent_map)?;

    let mut children_of: HashMap<&str, Vec<&str>> = HashMap::new();
    for (child, (parent, _)) in &parent_map {
        children_of
            .entry(parent.as_str())
            .or_default()
            .push(child.as_str());
    }
    for siblings in children_of.values_mut() {
        siblings.sort_unstable();
    }

    let tree = assemble(ROOT_ID, &cfg.root_name, &children_of, &names);
    Ok((tree, parent_map))
}

/// Walk every ancestor chain; a chain longer than the node count is a cycle.
fn validate_acyclic(parent_map: &ParentMap) -> Result<()> {
    let bound = parent_map.len();
    for start in parent_map.keys() {
        let mut current = start.as_str();
        let mut steps = 0usize;
        while let Some((parent, _)) = parent_map.get(current) {
            current = parent.as_str();
            steps += 1;
            if steps > bound {
                return Err(Error::CyclicHierarchy(start.clone()));
            }
        }
        // Chains either end at ROOT_ID or at an id with no entry, both fine.
    }
    Ok(())
}

fn assemble(
    id: &str,
    name: &str,
    children_of: &HashMap<&str, Vec<&str>>,
    names: &HashMap<&str, &str>,
) -> TreeNode {
    let children = children_of
        .get(id)
        .map(|kids| {
            kids.iter()
                .map(|kid| assemble(kid, names.get(kid).copied().unwrap_or(kid), children_of, names))
                .collect()
        })
        .unwrap_or_default();
    TreeNode {
        id: id.to_string(),
        name: name.to_string(),
        children,
    }
}

/// Annotate the tree with direct and hierarchical recipe-usage counts.
///
/// Counts come from pre-rollup rows so the view reflects the raw catalog.
pub fn annotate_usage(tree: &TreeNode, rows: &[RecipeRow]) -> UsageNode {
    let mut direct: HashMap<&str, HashSet<&str>> = HashMap::new();
    for row in rows {
        direct
            .entry(row.ingredient_id.as_str())
            .or_default()
            .insert(row.recipe_id.as_str());
    }
    annotate(tree, &direct).0
}

fn annotate<'a>(
    node: &TreeNode,
    direct: &HashMap<&str, HashSet<&'a str>>,
) -> (UsageNode, HashSet<&'a str>) {
    let own: HashSet<&str> = direct.get(node.id.as_str()).cloned().unwrap_or_default();
    let mut subtree = own.clone();
    let mut children = Vec::with_capacity(node.children.len());
    for child in &node.children {
        let (annotated, used) = annotate(child, direct);
        subtree.extend(used);
        children.push(annotated);
    }
    let usage = UsageNode {
        id: node.id.clone(),
        name: node.name.clone(),
        recipe_count: own.len(),
        hierarchical_recipe_count: subtree.len(),
        children,
    };
    (usage, subtree)
}
