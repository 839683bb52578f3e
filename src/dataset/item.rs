// src/dataset/item.rs

//! The unit of data flowing through a pipeline.
//!
//! An [`Item`] is an ordered mapping from field name to a shape-bearing
//! tensor value. Every item of a given dataset carries the identical
//! field-name set; batching stacks corresponding fields along a new leading
//! axis and unbatching slices that axis back apart.

use std::collections::BTreeMap;

use ndarray::{ArrayD, Axis};

use crate::error::{PipelineError, Result};

/// A single field value: a dynamic-dimensional `f32` tensor.
pub type Value = ArrayD<f32>;

/// One addressable unit of data: ordered field name → tensor value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Item {
    fields: BTreeMap<String, Value>,
}

impl Item {
    /// Creates an empty item.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a field, replacing any existing value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns the value stored under `name`, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Iterates field names in their stable order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Whether `other` carries exactly the same field-name set.
    pub fn same_fields(&self, other: &Item) -> bool {
        self.fields.len() == other.fields.len()
            && self.fields.keys().zip(other.fields.keys()).all(|(a, b)| a == b)
    }

    /// Stacks `items` along a new leading axis, field by field.
    ///
    /// All items must share the same field-name set and, per field, the same
    /// shape.
    ///
    /// # Errors
    ///
    /// Returns an [`PipelineError::Item`] error if `items` is empty, the
    /// field sets disagree, or a field's shapes cannot be stacked.
    pub fn stack(items: &[Item]) -> Result<Item> {
        let first = items
            .first()
            .ok_or_else(|| PipelineError::item("cannot stack zero items"))?;

        for item in &items[1..] {
            if !first.same_fields(item) {
                return Err(PipelineError::item(
                    "cannot stack items with differing field sets",
                ));
            }
        }

        let mut stacked = Item::new();
        for name in first.fields.keys() {
            let views: Vec<_> = items
                .iter()
                .map(|item| item.fields[name].view())
                .collect();
            let value = ndarray::stack(Axis(0), &views).map_err(|e| {
                PipelineError::item(format!("cannot stack field '{name}': {e}"))
            })?;
            stacked.insert(name.clone(), value);
        }
        Ok(stacked)
    }

    /// Length of the leading axis shared by every field.
    ///
    /// # Errors
    ///
    /// Returns an [`PipelineError::Item`] error if the item is empty, a
    /// field is zero-dimensional, or the fields' leading lengths disagree.
    pub fn leading_len(&self) -> Result<usize> {
        let mut leading = None;
        for (name, value) in &self.fields {
            let len = *value.shape().first().ok_or_else(|| {
                PipelineError::item(format!("field '{name}' has no leading axis"))
            })?;
            match leading {
                None => leading = Some(len),
                Some(expected) if expected != len => {
                    return Err(PipelineError::item(format!(
                        "field '{name}' leading length {len} disagrees with {expected}"
                    )));
                }
                Some(_) => {}
            }
        }
        leading.ok_or_else(|| PipelineError::item("item has no fields"))
    }

    /// Extracts element `index` of the leading axis from every field.
    ///
    /// # Errors
    ///
    /// Returns an [`PipelineError::Item`] error if a field is
    /// zero-dimensional or `index` is out of its leading range.
    pub fn slice_leading(&self, index: usize) -> Result<Item> {
        let mut sliced = Item::new();
        for (name, value) in &self.fields {
            let leading = *value.shape().first().ok_or_else(|| {
                PipelineError::item(format!("field '{name}' has no leading axis"))
            })?;
            if index >= leading {
                return Err(PipelineError::item(format!(
                    "leading index {index} out of range for field '{name}' (len {leading})"
                )));
            }
            sliced.insert(name.clone(), value.index_axis(Axis(0), index).to_owned());
        }
        Ok(sliced)
    }
}

impl FromIterator<(String, Value)> for Item {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn scalar_item(v: f32) -> Item {
        let mut item = Item::new();
        item.insert("x", ndarray::arr0(v).into_dyn());
        item
    }

    #[test]
    fn test_field_access() {
        let item = scalar_item(3.0);
        assert_eq!(item.num_fields(), 1);
        assert_eq!(item.field_names().collect::<Vec<_>>(), vec!["x"]);
        assert!(item.field("x").is_some());
        assert!(item.field("y").is_none());
    }

    #[test]
    fn test_same_fields() {
        let a = scalar_item(0.0);
        let b = scalar_item(1.0);
        assert!(a.same_fields(&b));

        let mut c = scalar_item(2.0);
        c.insert("y", ndarray::arr0(0.0).into_dyn());
        assert!(!a.same_fields(&c));
    }

    #[test]
    fn test_stack_scalars() {
        let items: Vec<Item> = (0..3).map(|v| scalar_item(v as f32)).collect();
        let stacked = Item::stack(&items).unwrap();

        let x = stacked.field("x").unwrap();
        assert_eq!(x.shape(), &[3]);
        assert_eq!(x, &arr1(&[0.0, 1.0, 2.0]).into_dyn());
    }

    #[test]
    fn test_stack_empty_fails() {
        assert!(Item::stack(&[]).is_err());
    }

    #[test]
    fn test_stack_mismatched_fields_fails() {
        let a = scalar_item(0.0);
        let mut b = Item::new();
        b.insert("y", ndarray::arr0(1.0).into_dyn());
        assert!(Item::stack(&[a, b]).is_err());
    }

    #[test]
    fn test_stack_then_slice_round_trip() {
        let items: Vec<Item> = (0..3).map(|v| scalar_item(v as f32)).collect();
        let stacked = Item::stack(&items).unwrap();

        assert_eq!(stacked.leading_len().unwrap(), 3);
        for (i, original) in items.iter().enumerate() {
            assert_eq!(&stacked.slice_leading(i).unwrap(), original);
        }
    }

    #[test]
    fn test_slice_leading_scalar_fails() {
        let item = scalar_item(0.0);
        assert!(item.leading_len().is_err());
        assert!(item.slice_leading(0).is_err());
    }

    #[test]
    fn test_slice_leading_out_of_range() {
        let mut item = Item::new();
        item.insert("x", arr1(&[0.0, 1.0]).into_dyn());
        assert!(item.slice_leading(2).is_err());
    }

    #[test]
    fn test_leading_len_ragged_fields() {
        let mut item = Item::new();
        item.insert("x", arr1(&[0.0, 1.0]).into_dyn());
        item.insert("y", arr1(&[0.0, 1.0, 2.0]).into_dyn());
        assert!(item.leading_len().is_err());
    }
}
