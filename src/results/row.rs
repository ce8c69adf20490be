use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DbError;
use crate::types::Value;

/// Lower-cased column name to index, rightmost duplicate wins.
pub(crate) type ColumnIndex = Arc<HashMap<String, usize>>;

pub(crate) fn build_column_index(column_names: &[String]) -> ColumnIndex {
    // Later inserts overwrite earlier ones, so duplicates resolve to the rightmost column.
    Arc::new(
        column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.to_lowercase(), i))
            .collect(),
    )
}

/// A materialized row from a query result
///
/// Holds the values of one row together with the column names shared by
/// every row of the same result.
#[derive(Debug, Clone)]
pub struct Row {
    /// The column names for this row (shared across all rows in a result set)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<Value>,
    column_index: ColumnIndex,
}

impl Row {
    /// Create a new row
    ///
    /// # Arguments
    ///
    /// * `column_names` - The column names
    /// * `values` - The values for this row
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<Value>) -> Self {
        let column_index = build_column_index(&column_names);
        Self {
            column_names,
            values,
            column_index,
        }
    }

    pub(crate) fn with_index(
        column_names: Arc<Vec<String>>,
        values: Vec<Value>,
        column_index: ColumnIndex,
    ) -> Self {
        Self {
            column_names,
            values,
            column_index,
        }
    }

    /// Get the index of a column by name, ignoring ASCII and Unicode case.
    #[must_use]
    pub fn column_index(&self, column_name: &str) -> Option<usize> {
        self.column_index.get(&column_name.to_lowercase()).copied()
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&Value> {
        self.column_index(column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Get a value from the row by column index
    ///
    /// # Errors
    /// Returns [`DbError::Index`] if `index` is not below the column count.
    pub fn get_by_index(&self, index: usize) -> Result<&Value, DbError> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::column_out_of_range(index, self.values.len()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Column name to value; with duplicate names the rightmost value wins.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.column_names
            .iter()
            .cloned()
            .zip(self.values.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_and_rightmost() {
        let names = Arc::new(vec!["id".to_string(), "Name".to_string(), "ID".to_string()]);
        let row = Row::new(
            names,
            vec![Value::Integer(1), Value::from("a"), Value::Integer(2)],
        );
        assert_eq!(row.column_index("name"), Some(1));
        assert_eq!(row.get("Id"), Some(&Value::Integer(2)));
        assert!(row.get("missing").is_none());
        assert_eq!(row.to_map().get("ID"), Some(&Value::Integer(2)));
    }

    #[test]
    fn index_out_of_range_is_index_error() {
        let row = Row::new(Arc::new(vec!["a".into()]), vec![Value::Null]);
        let err = row.get_by_index(3).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Index);
    }
}
