// src/dataset/source.rs

//! Base dataset storage: named parallel field vectors.
//!
//! A [`FieldTable`] holds one vector of values per field name, all of equal
//! length. Position `i` of the table assembles the `i`-th value of every
//! field into one [`Item`], which keeps the field-name set identical across
//! all items of the base dataset by construction.

use std::collections::BTreeMap;

use crate::error::{PipelineError, Result};

use super::item::{Item, Value};

/// The base dataset's underlying collection of parallel item-fields.
#[derive(Debug, Clone, Default)]
pub struct FieldTable {
    fields: BTreeMap<String, Vec<Value>>,
}

impl FieldTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field column, replacing any existing one under the same name.
    ///
    /// Column lengths are checked when the table is handed to
    /// `Dataset::new`, not here, so columns may be inserted in any order.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<Value>) -> &mut Self {
        self.fields.insert(name.into(), values);
        self
    }

    /// Number of items held by the table (the shared column length).
    pub fn len(&self) -> usize {
        self.fields.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates field names in their stable order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Validates the table as base-dataset storage.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the table has no fields, any column
    /// is empty, or column lengths disagree.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(PipelineError::configuration(
                "base dataset requires at least one field",
            ));
        }

        let len = self.len();
        if len == 0 {
            return Err(PipelineError::configuration(
                "base dataset size must be greater than 0",
            ));
        }

        for (name, values) in &self.fields {
            if values.len() != len {
                return Err(PipelineError::configuration(format!(
                    "field '{}' has {} items, expected {}",
                    name,
                    values.len(),
                    len
                )));
            }
        }
        Ok(())
    }

    /// Assembles the item stored at `position`.
    ///
    /// `position` must already be resolved into `[0, len)`.
    pub fn item(&self, position: usize) -> Item {
        self.fields
            .iter()
            .map(|(name, values)| (name.clone(), values[position].clone()))
            .collect()
    }
}

impl<S: Into<String>> FromIterator<(S, Vec<Value>)> for FieldTable {
    fn from_iter<T: IntoIterator<Item = (S, Vec<Value>)>>(iter: T) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, values)| (name.into(), values))
                .collect(),
        }
    }
}
