use std::sync::Arc;

use super::row::{ColumnIndex, Row, build_column_index};
use crate::types::Value;

/// All rows produced by one query, collected eagerly.
///
/// This is what crosses the queue boundary when a caller wants rows back
/// instead of a live cursor.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// The rows returned by the query
    pub results: Vec<Row>,
    /// Column names shared by all rows (to avoid duplicating in each row)
    column_names: Arc<Vec<String>>,
    column_index: ColumnIndex,
}

impl ResultSet {
    /// Create an empty result set for the given columns with a known capacity
    #[must_use]
    pub fn with_capacity(column_names: Arc<Vec<String>>, capacity: usize) -> ResultSet {
        let column_index = build_column_index(&column_names);
        ResultSet {
            results: Vec::with_capacity(capacity),
            column_names,
            column_index,
        }
    }

    /// Get the column names for this result set
    #[must_use]
    pub fn column_names(&self) -> &Arc<Vec<String>> {
        &self.column_names
    }

    /// Add a row to the result set, sharing this set's column names
    pub fn add_row_values(&mut self, values: Vec<Value>) {
        self.results.push(Row::with_index(
            Arc::clone(&self.column_names),
            values,
            Arc::clone(&self.column_index),
        ));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First row, if any.
    #[must_use]
    pub fn first(&self) -> Option<&Row> {
        self.results.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.results.iter()
    }
}

impl IntoIterator for ResultSet {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
