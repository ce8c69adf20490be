use crate::error::{DbError, Phase};
use crate::results::ResultSet;
use crate::types::{Arguments, Value};

use super::params::from_sqlite_value;
use super::prepared::StatementHandle;

/// Extract one column of a `SQLite` row as a [`Value`].
///
/// # Errors
///
/// Returns [`DbError::Index`] for a bad column index, [`DbError::Type`] for non-UTF-8 text.
pub fn extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value, DbError> {
    let value = row
        .get_ref(idx)
        .map_err(|err| DbError::from_engine(err, Phase::Step))?;
    from_sqlite_value(value)
}

pub(crate) fn extract_row_values(
    row: &rusqlite::Row<'_>,
    column_count: usize,
) -> Result<Vec<Value>, DbError> {
    (0..column_count).map(|idx| extract_value(row, idx)).collect()
}

/// Bind `args`, run the statement and collect every row into a [`ResultSet`].
///
/// A statement that returns no columns still runs; the set is simply empty.
///
/// # Errors
/// Returns binding errors, or the step error that stopped the scan. No partial
/// set is returned when a step fails midway.
pub fn build_result_set(
    stmt: &mut StatementHandle<'_>,
    args: &Arguments,
) -> Result<ResultSet, DbError> {
    stmt.bind_all(args)?;
    let mut cursor = stmt.query()?;
    let mut result_set = ResultSet::with_capacity(cursor.shared_column_names(), 10);
    while cursor.next_row()? {
        result_set.add_row_values(cursor.take_values()?);
    }
    Ok(result_set)
}
