//! Bidirectional mapping between stable entity ids and dense matrix indices.
//!
//! One instance covers one index space: the pipeline keeps one registry for
//! ingredients (cost-matrix rows/columns) and one for recipes (volume-matrix
//! and distance-matrix rows). Indices are contiguous `[0, n)` in insertion
//! order.

use crate::{Error, Result};
use std::collections::HashMap;

/// Two bijections: id → index and index → id.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    index_of: HashMap<String, usize>,
    ids: Vec<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from ids in the given order.
    ///
    /// Fails on duplicates rather than silently reassigning an index.
    pub fn from_ids<I, S>(ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut reg = Self::new();
        for id in ids {
            reg.insert(id.into())?;
        }
        Ok(reg)
    }

    /// Assign the next dense index to `id`.
    pub fn insert(&mut self, id: String) -> Result<usize> {
        if self.index_of.contains_key(&id) {
            return Err(Error::DuplicateIngredient(id));
        }
        let idx = self.ids.len();
        self.index_of.insert(id.clone(), idx);
        self.ids.push(id);
        Ok(idx)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index_of.get(id).copied()
    }

    pub fn id(&self, index: usize) -> Option<&str> {
        self.ids.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Ids in index order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}
