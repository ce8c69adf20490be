use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::{DbError, Phase};
use crate::results::{ColumnIndex, build_column_index};
use crate::types::{Arguments, BindTarget, Value};

use super::connection::Connection;
use super::cursor::ResultCursor;
use super::params::{bind, bind_arguments};

/// A compiled statement borrowed from its [`Connection`].
///
/// Lifecycle: bind values, then either [`execute`](Self::execute) it or open a
/// [`ResultCursor`] with [`query`](Self::query) and step rows. Dropping the
/// cursor (or calling [`ResultCursor::reset`]) returns the statement to its
/// prepared state with its bindings intact, ready for another run.
/// [`finalize`](Self::finalize) releases the engine statement; every later call
/// fails with [`DbError::Misuse`].
pub struct StatementHandle<'conn> {
    stmt: Option<rusqlite::Statement<'conn>>,
    owner: &'conn Connection,
    id: u64,
    sql: String,
    column_names: Arc<Vec<String>>,
    column_index: ColumnIndex,
}

impl<'conn> StatementHandle<'conn> {
    pub(crate) fn new(
        owner: &'conn Connection,
        stmt: rusqlite::Statement<'conn>,
        id: u64,
        sql: &str,
    ) -> Self {
        let column_names: Vec<String> = stmt
            .column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect();
        let column_index = build_column_index(&column_names);
        trace!(statement = id, %sql, "prepared statement");
        Self {
            stmt: Some(stmt),
            owner,
            id,
            sql: sql.to_owned(),
            column_names: Arc::new(column_names),
            column_index,
        }
    }

    /// The SQL text this statement was compiled from.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of placeholders; an argument list must have exactly this length.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        self.stmt.as_ref().map_or(0, rusqlite::Statement::parameter_count)
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.column_names.len()
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.stmt.is_none()
    }

    /// True if running this statement cannot modify the database.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.stmt.as_ref().is_some_and(rusqlite::Statement::readonly)
    }

    /// Bind a single placeholder by zero-based index or by name.
    ///
    /// # Errors
    /// Returns [`DbError::Bind`] if the placeholder does not exist.
    pub fn bind(&mut self, target: impl Into<BindTarget>, value: impl Into<Value>) -> Result<(), DbError> {
        let stmt = self.live_mut()?;
        bind(stmt, &target.into(), &value.into())
    }

    /// Bind a full argument list, replacing every current binding.
    ///
    /// # Errors
    /// Returns [`DbError::Arity`] if `args` does not supply exactly one value per
    /// placeholder, or [`DbError::Bind`] for an unknown or repeated name.
    pub fn bind_all(&mut self, args: &Arguments) -> Result<(), DbError> {
        let stmt = self.live_mut()?;
        bind_arguments(stmt, args)
    }

    /// Reset every placeholder to NULL.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] once finalized.
    pub fn clear_bindings(&mut self) -> Result<(), DbError> {
        self.live_mut()?.clear_bindings();
        Ok(())
    }

    /// Start executing and return a cursor over the result rows.
    ///
    /// Only one statement per connection may be stepping at a time.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] if another statement on the same connection is
    /// still being stepped, or once finalized.
    pub fn query(&mut self) -> Result<ResultCursor<'_>, DbError> {
        let slot = self.owner.acquire(self.id)?;
        let stmt = self
            .stmt
            .as_mut()
            .ok_or_else(|| finalized_error(self.id))?;
        trace!(statement = self.id, "executing query");
        Ok(ResultCursor::new(
            stmt.raw_query(),
            slot,
            Arc::clone(&self.column_names),
            Arc::clone(&self.column_index),
            self.owner.shared_date_format(),
        ))
    }

    /// Bind `args` and start executing.
    ///
    /// # Errors
    /// See [`bind_all`](Self::bind_all) and [`query`](Self::query).
    pub fn query_with(&mut self, args: &Arguments) -> Result<ResultCursor<'_>, DbError> {
        self.bind_all(args)?;
        self.query()
    }

    /// Run the statement to completion and return the number of rows it changed.
    ///
    /// Rows produced by a row-returning statement are stepped through and discarded.
    ///
    /// # Errors
    /// Returns [`DbError::Execution`] if the engine rejects the statement.
    pub fn execute(&mut self) -> Result<usize, DbError> {
        let _slot = self.owner.acquire(self.id)?;
        let id = self.id;
        let stmt = self.stmt.as_mut().ok_or_else(|| finalized_error(id))?;
        let engine = |err| DbError::from_engine(err, Phase::Execute);
        if stmt.readonly() {
            if stmt.column_count() == 0 {
                stmt.raw_execute().map_err(engine)?;
            } else {
                let mut rows = stmt.raw_query();
                while rows.next().map_err(engine)?.is_some() {}
            }
            return Ok(0);
        }

        // sqlite3_changes() keeps the previous DML count across DDL, so only
        // trust it when the running total moved.
        let before = self.owner.total_changes()?;
        if stmt.column_count() == 0 {
            stmt.raw_execute().map_err(engine)?;
        } else {
            // INSERT ... RETURNING and friends: drain the rows.
            let mut rows = stmt.raw_query();
            while rows.next().map_err(engine)?.is_some() {}
        }
        let changed = if self.owner.total_changes()? == before {
            0
        } else {
            usize::try_from(self.owner.changes()?).unwrap_or(usize::MAX)
        };
        trace!(statement = id, changed, "executed statement");
        Ok(changed)
    }

    /// Bind `args` and run the statement to completion.
    ///
    /// # Errors
    /// See [`bind_all`](Self::bind_all) and [`execute`](Self::execute).
    pub fn execute_with(&mut self, args: &Arguments) -> Result<usize, DbError> {
        self.bind_all(args)?;
        self.execute()
    }

    /// Release the engine statement. Calling it again is a no-op.
    ///
    /// # Errors
    /// Returns the engine's error if it reports one while finalizing.
    pub fn finalize(&mut self) -> Result<(), DbError> {
        match self.stmt.take() {
            Some(stmt) => {
                trace!(statement = self.id, "finalized statement");
                stmt.finalize()
                    .map_err(|err| DbError::from_engine(err, Phase::Execute))
            }
            None => Ok(()),
        }
    }

    fn live_mut(&mut self) -> Result<&mut rusqlite::Statement<'conn>, DbError> {
        let id = self.id;
        self.stmt.as_mut().ok_or_else(|| finalized_error(id))
    }
}

impl fmt::Debug for StatementHandle<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementHandle")
            .field("id", &self.id)
            .field("sql", &self.sql)
            .field("finalized", &self.is_finalized())
            .finish_non_exhaustive()
    }
}

fn finalized_error(id: u64) -> DbError {
    DbError::Misuse(format!("statement {id} has been finalized"))
}
