use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use rusqlite::Rows;
use tracing::trace;

use crate::error::{DbError, Phase};
use crate::results::{ColumnIndex, Row};
use crate::types::Value;

use super::connection::ExecutionSlot;
use super::query::extract_row_values;

/// Result of advancing a cursor by one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Row,
    Done,
}

#[derive(Debug)]
enum CursorState {
    Ready,
    OnRow,
    Done,
    Failed(DbError),
}

/// Forward-only view over the rows of an executing statement.
///
/// Rows are pulled from the engine one [`step`](Self::step) at a time. Once the
/// statement reports its last row the cursor stays [`Step::Done`]; once a step
/// fails the cursor keeps returning that same error, so an engine failure is
/// never mistaken for the end of the result.
///
/// The cursor borrows its statement. Dropping it (or calling
/// [`reset`](Self::reset)) rewinds the statement for another run.
pub struct ResultCursor<'s> {
    // Dropped before the slot: the statement is reset while still marked active.
    rows: Option<Rows<'s>>,
    slot: Option<ExecutionSlot<'s>>,
    column_names: Arc<Vec<String>>,
    column_index: ColumnIndex,
    date_format: Option<Arc<str>>,
    current: Option<Vec<Value>>,
    state: CursorState,
    error_reported: bool,
}

impl<'s> ResultCursor<'s> {
    pub(crate) fn new(
        rows: Rows<'s>,
        slot: ExecutionSlot<'s>,
        column_names: Arc<Vec<String>>,
        column_index: ColumnIndex,
        date_format: Option<Arc<str>>,
    ) -> Self {
        Self {
            rows: Some(rows),
            slot: Some(slot),
            column_names,
            column_index,
            date_format,
            current: None,
            state: CursorState::Ready,
            error_reported: false,
        }
    }

    /// Advance to the next row.
    ///
    /// # Errors
    /// Returns [`DbError::Step`] (or [`DbError::TimedOut`] on lock contention) if
    /// the engine fails; every later call returns the same error.
    pub fn step(&mut self) -> Result<Step, DbError> {
        match &self.state {
            CursorState::Failed(err) => return Err(err.clone()),
            CursorState::Done => return Ok(Step::Done),
            CursorState::Ready | CursorState::OnRow => {}
        }
        let Some(rows) = self.rows.as_mut() else {
            self.finish();
            return Ok(Step::Done);
        };
        let column_count = self.column_names.len();
        let outcome = match rows.next() {
            Ok(Some(row)) => extract_row_values(row, column_count).map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(DbError::from_engine(err, Phase::Step)),
        };
        match outcome {
            Ok(Some(values)) => {
                self.current = Some(values);
                self.state = CursorState::OnRow;
                Ok(Step::Row)
            }
            Ok(None) => {
                trace!("cursor exhausted");
                self.finish();
                Ok(Step::Done)
            }
            Err(err) => {
                self.current = None;
                self.rows = None;
                self.slot = None;
                self.state = CursorState::Failed(err.clone());
                Err(err)
            }
        }
    }

    /// [`step`](Self::step) as a bool: `true` when positioned on a row.
    ///
    /// # Errors
    /// See [`step`](Self::step).
    pub fn next_row(&mut self) -> Result<bool, DbError> {
        Ok(self.step()? == Step::Row)
    }

    /// Stop reading. The statement is rewound and the connection freed for
    /// other statements; the cursor reports [`Step::Done`] from now on.
    pub fn close(&mut self) {
        self.finish();
    }

    /// Give the statement back for another run with the same bindings.
    pub fn reset(self) {}

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Done | CursorState::Failed(_))
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub(crate) fn shared_column_names(&self) -> Arc<Vec<String>> {
        Arc::clone(&self.column_names)
    }

    /// # Errors
    /// Returns [`DbError::Index`] if `index` is not below [`column_count`](Self::column_count).
    pub fn column_name(&self, index: usize) -> Result<&str, DbError> {
        self.column_names
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| DbError::column_out_of_range(index, self.column_count()))
    }

    /// Case-insensitive lookup; with duplicate names the rightmost column wins.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(&name.to_lowercase()).copied()
    }

    /// Raw value of column `index` in the current row.
    ///
    /// # Errors
    /// Returns [`DbError::Index`] for an out-of-range column and [`DbError::Misuse`]
    /// when the cursor is not positioned on a row.
    pub fn value(&self, index: usize) -> Result<&Value, DbError> {
        if index >= self.column_count() {
            return Err(DbError::column_out_of_range(index, self.column_count()));
        }
        let values = self.current_values()?;
        values
            .get(index)
            .ok_or_else(|| DbError::column_out_of_range(index, values.len()))
    }

    /// # Errors
    /// Returns [`DbError::Index`] if no column has that name, otherwise as [`value`](Self::value).
    pub fn value_by_name(&self, name: &str) -> Result<&Value, DbError> {
        self.value(self.resolve(name)?)
    }

    /// # Errors
    /// As [`value`](Self::value).
    pub fn is_null(&self, index: usize) -> Result<bool, DbError> {
        Ok(self.value(index)?.is_null())
    }

    /// An unknown column name reads as NULL.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] when the cursor is not positioned on a row.
    pub fn is_null_by_name(&self, name: &str) -> Result<bool, DbError> {
        match self.column_index(name) {
            Some(index) => self.is_null(index),
            None => self.current_values().map(|_| true),
        }
    }

    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds an integer or NULL.
    pub fn get_i64(&self, index: usize) -> Result<Option<i64>, DbError> {
        coerce(self.value(index)?, "integer", Value::as_integer)
    }

    /// Integers widen; text and blobs are refused.
    ///
    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds a number or NULL.
    pub fn get_f64(&self, index: usize) -> Result<Option<f64>, DbError> {
        coerce(self.value(index)?, "real", Value::as_real)
    }

    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds 0, 1 or NULL.
    pub fn get_bool(&self, index: usize) -> Result<Option<bool>, DbError> {
        coerce(self.value(index)?, "boolean (0 or 1)", Value::as_bool)
    }

    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds text or NULL.
    pub fn get_text(&self, index: usize) -> Result<Option<&str>, DbError> {
        coerce(self.value(index)?, "text", Value::as_text)
    }

    /// Text is not converted to bytes; cast in SQL if that is wanted.
    ///
    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds a blob or NULL.
    pub fn get_blob(&self, index: usize) -> Result<Option<&[u8]>, DbError> {
        coerce(self.value(index)?, "blob", Value::as_blob)
    }

    /// Dates follow the connection's date layout: text in that layout, or
    /// without one, epoch seconds or `YYYY-MM-DD HH:MM:SS[.fff]` text.
    ///
    /// # Errors
    /// Returns [`DbError::Type`] unless the column holds such a date or NULL.
    pub fn get_timestamp(&self, index: usize) -> Result<Option<NaiveDateTime>, DbError> {
        let format = self.date_format.as_deref();
        coerce(self.value(index)?, "timestamp", |value| value.as_timestamp_with(format))
    }

    /// # Errors
    /// See [`get_i64`](Self::get_i64); unknown names give [`DbError::Index`].
    pub fn get_i64_by_name(&self, name: &str) -> Result<Option<i64>, DbError> {
        self.get_i64(self.resolve(name)?)
    }

    /// # Errors
    /// See [`get_f64`](Self::get_f64); unknown names give [`DbError::Index`].
    pub fn get_f64_by_name(&self, name: &str) -> Result<Option<f64>, DbError> {
        self.get_f64(self.resolve(name)?)
    }

    /// # Errors
    /// See [`get_bool`](Self::get_bool); unknown names give [`DbError::Index`].
    pub fn get_bool_by_name(&self, name: &str) -> Result<Option<bool>, DbError> {
        self.get_bool(self.resolve(name)?)
    }

    /// # Errors
    /// See [`get_text`](Self::get_text); unknown names give [`DbError::Index`].
    pub fn get_text_by_name(&self, name: &str) -> Result<Option<&str>, DbError> {
        self.get_text(self.resolve(name)?)
    }

    /// # Errors
    /// See [`get_blob`](Self::get_blob); unknown names give [`DbError::Index`].
    pub fn get_blob_by_name(&self, name: &str) -> Result<Option<&[u8]>, DbError> {
        self.get_blob(self.resolve(name)?)
    }

    /// # Errors
    /// See [`get_timestamp`](Self::get_timestamp); unknown names give [`DbError::Index`].
    pub fn get_timestamp_by_name(&self, name: &str) -> Result<Option<NaiveDateTime>, DbError> {
        self.get_timestamp(self.resolve(name)?)
    }

    /// Copy of the current row.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] when the cursor is not positioned on a row.
    pub fn current_row(&self) -> Result<Row, DbError> {
        Ok(Row::with_index(
            Arc::clone(&self.column_names),
            self.current_values()?.to_vec(),
            Arc::clone(&self.column_index),
        ))
    }

    /// Column name to value for the current row; duplicate names keep the rightmost value.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] when the cursor is not positioned on a row.
    pub fn row_map(&self) -> Result<HashMap<String, Value>, DbError> {
        let values = self.current_values()?;
        Ok(self
            .column_names
            .iter()
            .cloned()
            .zip(values.iter().cloned())
            .collect())
    }

    pub(crate) fn take_values(&mut self) -> Result<Vec<Value>, DbError> {
        self.current.take().ok_or_else(no_current_row)
    }

    fn current_values(&self) -> Result<&[Value], DbError> {
        self.current.as_deref().ok_or_else(no_current_row)
    }

    fn resolve(&self, name: &str) -> Result<usize, DbError> {
        self.column_index(name)
            .ok_or_else(|| DbError::Index(format!("no column named {name}")))
    }

    fn finish(&mut self) {
        self.current = None;
        self.rows = None;
        self.slot = None;
        if !matches!(self.state, CursorState::Failed(_)) {
            self.state = CursorState::Done;
        }
    }
}

impl Iterator for ResultCursor<'_> {
    type Item = Result<Row, DbError>;

    /// Yields each row, then `None`. A step error is yielded once and ends the iteration.
    fn next(&mut self) -> Option<Self::Item> {
        if self.error_reported {
            return None;
        }
        match self.step() {
            Ok(Step::Row) => Some(self.current_row()),
            Ok(Step::Done) => None,
            Err(err) => {
                self.error_reported = true;
                Some(Err(err))
            }
        }
    }
}

impl fmt::Debug for ResultCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.column_names)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn coerce<'v, T>(
    value: &'v Value,
    wanted: &str,
    convert: impl FnOnce(&'v Value) -> Option<T>,
) -> Result<Option<T>, DbError> {
    if value.is_null() {
        return Ok(None);
    }
    convert(value).map(Some).ok_or_else(|| {
        DbError::Type(format!("cannot read {} value as {wanted}", value.type_name()))
    })
}

fn no_current_row() -> DbError {
    DbError::Misuse("cursor is not positioned on a row; call step() first".into())
}
