//! Drop planning
//!
//! A [`DropPlan`] is the snapshot of enumerated tables split into the batches
//! the executor drops one at a time.

use std::collections::HashSet;

use serde::Serialize;

use crate::tables::TableDescriptor;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropPlan {
    batch_size: usize,
    batches: Vec<Vec<TableDescriptor>>,
}

impl DropPlan {
    /// Partition `tables` into `ceil(N / batch_size)` batches in listing order.
    ///
    /// `batch_size == 0` puts every table in one batch. Duplicate names are
    /// dropped so the batches stay disjoint.
    pub fn new(tables: Vec<TableDescriptor>, batch_size: usize) -> Self {
        let mut seen = HashSet::new();
        let tables: Vec<_> = tables
            .into_iter()
            .filter(|table| seen.insert(table.name().to_string()))
            .collect();

        let batches = if tables.is_empty() {
            Vec::new()
        } else if batch_size == 0 {
            vec![tables]
        } else {
            tables.chunks(batch_size).map(<[_]>::to_vec).collect()
        };

        Self {
            batch_size,
            batches,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches(&self) -> &[Vec<TableDescriptor>] {
        &self.batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    pub fn table_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// An empty plan is a no-op for the executor
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDescriptor> {
        self.batches.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(count: usize) -> Vec<TableDescriptor> {
        (0..count).map(|i| TableDescriptor::new(format!("t{:02}", i))).collect()
    }

    #[test]
    fn test_batches_are_ceil_of_count_over_size() {
        let plan = DropPlan::new(tables(25), 10);
        let sizes: Vec<_> = plan.batches().iter().map(Vec::len).collect();

        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(plan.table_count(), 25);
    }

    #[test]
    fn test_zero_batch_size_is_one_batch() {
        let plan = DropPlan::new(tables(7), 0);
        assert_eq!(plan.batch_count(), 1);
        assert_eq!(plan.batches()[0].len(), 7);
    }

    #[test]
    fn test_empty_table_set_has_no_batches() {
        let plan = DropPlan::new(Vec::new(), 0);
        assert!(plan.is_empty());
        assert_eq!(plan.batch_count(), 0);
    }

    #[test]
    fn test_union_of_batches_matches_input_without_duplicates() {
        let mut input = tables(12);
        input.push(TableDescriptor::new("t03"));

        let plan = DropPlan::new(input, 5);
        let names: Vec<_> = plan.tables().map(TableDescriptor::name).collect();
        let unique: HashSet<_> = names.iter().collect();

        assert_eq!(names.len(), 12);
        assert_eq!(unique.len(), 12);
        assert_eq!(names.first(), Some(&"t00"));
        assert_eq!(names.last(), Some(&"t11"));
    }
}
