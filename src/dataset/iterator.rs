// src/dataset/iterator.rs

use crate::error::Result;

use super::item::Item;
use super::Dataset;

/// A sequential pass over every position of a dataset.
///
/// Yields the items at positions `0, 1, .., size - 1` in order — the access
/// pattern of one training epoch. Obtained through [`Dataset::iter`]; the
/// underlying dataset stays usable (and indexable) while iterating.
pub struct DatasetIterator {
    dataset: Dataset,
    position: usize,
}

impl DatasetIterator {
    pub(crate) fn new(dataset: Dataset) -> Self {
        Self {
            dataset,
            position: 0,
        }
    }

    /// Resets the iterator to position zero for another epoch.
    pub fn reset(&mut self) {
        self.position = 0;
    }

    /// The position the next call to `next` will read.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl Iterator for DatasetIterator {
    type Item = Result<Item>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.dataset.size() {
            return None;
        }
        let result = self.dataset.get(self.position as f64);
        self.position += 1;
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.dataset.size().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DatasetIterator {}

#[cfg(test)]
mod tests {
    use super::super::source::FieldTable;
    use super::super::Dataset;

    fn scalar_dataset(values: &[f32]) -> Dataset {
        let mut table = FieldTable::new();
        table.insert(
            "x",
            values.iter().map(|&v| ndarray::arr0(v).into_dyn()).collect(),
        );
        Dataset::with_defaults(table, "base").unwrap()
    }

    #[test]
    fn test_iterates_one_epoch_in_order() {
        let dataset = scalar_dataset(&[0.0, 1.0, 2.0, 3.0]);

        let values: Vec<f32> = dataset
            .iter()
            .map(|item| item.unwrap().field("x").unwrap().sum())
            .collect();

        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
        dataset.close();
    }

    #[test]
    fn test_reset_starts_over() {
        let dataset = scalar_dataset(&[0.0, 1.0]);

        let mut iter = dataset.iter();
        assert_eq!(iter.len(), 2);
        iter.by_ref().for_each(drop);
        assert_eq!(iter.len(), 0);

        iter.reset();
        assert_eq!(iter.position(), 0);
        assert_eq!(iter.count(), 2);
        dataset.close();
    }
}
