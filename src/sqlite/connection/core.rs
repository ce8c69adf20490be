use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{DbError, Phase};
use crate::results::{ResultSet, Row};
use crate::sqlite::config::{ConnectionOptions, MEMORY_PATH};
use crate::sqlite::cursor::ResultCursor;
use crate::sqlite::prepared::StatementHandle;
use crate::sqlite::query::build_result_set;
use crate::types::{Arguments, check_date_format};

use super::tx::TxState;

/// One open SQLite database handle.
///
/// A `Connection` is `Send` but not `Sync`: it is meant to be owned by a single
/// thread at a time, normally the worker behind a
/// [`DatabaseQueue`](crate::sqlite::DatabaseQueue). Statements borrow the
/// connection, so it cannot be closed while any of them is alive.
pub struct Connection {
    inner: Option<rusqlite::Connection>,
    path: String,
    busy_timeout: Duration,
    pub(super) date_format: Option<Arc<str>>,
    pub(super) tx: TxState,
    // Statement currently stepping, if any. At most one per connection.
    active: Cell<Option<u64>>,
    next_statement_id: Cell<u64>,
}

impl Connection {
    /// Open (or create, depending on the mode) the database described by `options`.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if the file cannot be opened or is not a database,
    /// [`DbError::Misuse`] for an invalid `date_format`.
    pub fn open(options: &ConnectionOptions) -> Result<Self, DbError> {
        if let Some(format) = &options.date_format {
            check_date_format(format)?;
        }
        let io = |err| DbError::from_engine(err, Phase::Open);
        let conn = rusqlite::Connection::open_with_flags(&options.path, options.mode.flags())
            .map_err(io)?;
        conn.busy_timeout(options.busy_timeout).map_err(io)?;

        // Reading the schema forces SQLite to look at the file header, so a corrupt
        // or foreign file fails here rather than on the first query.
        conn.query_row("PRAGMA schema_version", [], |row| row.get::<_, i64>(0))
            .map_err(io)?;

        if let Some(mode) = &options.journal_mode {
            let applied: String = conn
                .pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))
                .map_err(io)?;
            debug!(path = %options.path, requested = %mode, %applied, "journal mode set");
        }
        if options.foreign_keys {
            conn.pragma_update(None, "foreign_keys", true).map_err(io)?;
        }

        debug!(path = %options.path, mode = ?options.mode, "opened connection");
        Ok(Self {
            inner: Some(conn),
            path: options.path.clone(),
            busy_timeout: options.busy_timeout,
            date_format: options.date_format.as_deref().map(Arc::from),
            tx: TxState::default(),
            active: Cell::new(None),
            next_statement_id: Cell::new(1),
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(&ConnectionOptions::new(MEMORY_PATH))
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// # Errors
    /// Returns [`DbError::Closed`] after close.
    pub fn set_busy_timeout(&mut self, timeout: Duration) -> Result<(), DbError> {
        self.handle()?.busy_timeout(timeout)?;
        self.busy_timeout = timeout;
        Ok(())
    }

    pub(crate) fn handle(&self) -> Result<&rusqlite::Connection, DbError> {
        self.inner.as_ref().ok_or_else(DbError::closed)
    }

    /// Compile `sql` into a reusable statement.
    ///
    /// SQLite validates eagerly, so malformed SQL and unknown tables or columns
    /// fail here rather than on the first step.
    ///
    /// # Errors
    /// Returns [`DbError::Syntax`] if the SQL does not compile, [`DbError::Closed`] after close.
    pub fn prepare(&self, sql: &str) -> Result<StatementHandle<'_>, DbError> {
        let conn = self.handle()?;
        if sql.trim().is_empty() {
            return Err(DbError::Syntax {
                message: "empty SQL statement".into(),
                code: None,
            });
        }
        let stmt = conn
            .prepare(sql)
            .map_err(|err| DbError::from_engine(err, Phase::Prepare))?;
        let id = self.next_statement_id.get();
        self.next_statement_id.set(id.wrapping_add(1));
        Ok(StatementHandle::new(self, stmt, id, sql))
    }

    /// Prepare, bind and run a statement to completion, returning the rows affected.
    ///
    /// # Errors
    /// Returns [`DbError::Arity`] if `args` does not match the placeholders and
    /// [`DbError::Execution`] if the engine rejects the statement.
    pub fn execute(&self, sql: &str, args: impl Into<Arguments>) -> Result<usize, DbError> {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_all(&args.into())?;
        stmt.execute()
    }

    /// Run a query and hand its live cursor to `read`.
    ///
    /// Rows are stepped lazily while `read` runs; the cursor and its statement
    /// are released when `read` returns.
    ///
    /// # Errors
    /// Returns preparation and binding errors, or whatever `read` returns.
    pub fn query<T, F>(&self, sql: &str, args: impl Into<Arguments>, read: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut ResultCursor<'_>) -> Result<T, DbError>,
    {
        let mut stmt = self.prepare(sql)?;
        stmt.bind_all(&args.into())?;
        let mut cursor = stmt.query()?;
        let out = read(&mut cursor)?;
        Ok(out)
    }

    /// Run a query and collect every row.
    ///
    /// # Errors
    /// Returns preparation, binding or step errors.
    pub fn query_all(&self, sql: &str, args: impl Into<Arguments>) -> Result<ResultSet, DbError> {
        let mut stmt = self.prepare(sql)?;
        build_result_set(&mut stmt, &args.into())
    }

    /// Run a query and return its first row, if any.
    ///
    /// # Errors
    /// Returns preparation, binding or step errors.
    pub fn query_row(&self, sql: &str, args: impl Into<Arguments>) -> Result<Option<Row>, DbError> {
        self.query(sql, args, |cursor| cursor.next().transpose())
    }

    /// Execute several `;`-separated statements that take no arguments.
    ///
    /// # Errors
    /// Returns [`DbError::Execution`] on the first failing statement.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        self.ensure_idle()?;
        self.handle()?
            .execute_batch(sql)
            .map_err(|err| DbError::from_engine(err, Phase::Execute))
    }

    /// Rowid of the most recent successful INSERT on this connection.
    ///
    /// # Errors
    /// Returns [`DbError::Closed`] after close.
    pub fn last_insert_rowid(&self) -> Result<i64, DbError> {
        Ok(self.handle()?.last_insert_rowid())
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    ///
    /// # Errors
    /// Returns [`DbError::Closed`] after close.
    pub fn changes(&self) -> Result<u64, DbError> {
        Ok(self.handle()?.changes())
    }

    /// Rows changed by every INSERT, UPDATE or DELETE since the connection opened.
    ///
    /// # Errors
    /// Returns [`DbError::Closed`] after close.
    pub fn total_changes(&self) -> Result<u64, DbError> {
        let total: i64 = self
            .handle()?
            .prepare_cached("SELECT total_changes()")?
            .query_row([], |row| row.get(0))?;
        Ok(u64::try_from(total).unwrap_or_default())
    }

    /// Whether a table or view named `name` exists, ignoring case.
    ///
    /// Any failure, including a closed connection, reads as "does not exist".
    #[must_use]
    pub fn table_exists(&self, name: &str) -> bool {
        let sql = "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE \
                   UNION ALL \
                   SELECT 1 FROM sqlite_temp_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE";
        self.query_row(sql, Arguments::positional([name]))
            .map(|row| row.is_some())
            .unwrap_or(false)
    }

    /// Finalize cached statements and release the engine handle.
    ///
    /// Closing twice is a no-op. Any open transaction is rolled back by the engine.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if SQLite refuses to close; the connection stays open.
    pub fn close(&mut self) -> Result<(), DbError> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };
        if self.tx.depth > 0 {
            warn!(path = %self.path, depth = self.tx.depth, "closing with an open transaction");
        }
        conn.flush_prepared_statement_cache();
        match conn.close() {
            Ok(()) => {
                self.tx = TxState::default();
                debug!(path = %self.path, "closed connection");
                Ok(())
            }
            Err((conn, err)) => {
                self.inner = Some(conn);
                Err(DbError::from_engine(err, Phase::Open))
            }
        }
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), DbError> {
        match self.active.get() {
            None => Ok(()),
            Some(id) => Err(busy_error(id)),
        }
    }

    /// Claim the single execution slot for statement `id`.
    pub(crate) fn acquire(&self, id: u64) -> Result<ExecutionSlot<'_>, DbError> {
        match self.active.get() {
            Some(other) if other != id => Err(busy_error(other)),
            _ => {
                self.active.set(Some(id));
                Ok(ExecutionSlot { owner: self, id })
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .field("transaction_depth", &self.tx.depth)
            .finish_non_exhaustive()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.inner.is_some() {
            self.abandon_transaction();
        }
    }
}

fn busy_error(id: u64) -> DbError {
    DbError::Misuse(format!(
        "statement {id} is still executing; finish or drop its cursor first"
    ))
}

/// Marks a statement as executing until dropped.
pub(crate) struct ExecutionSlot<'c> {
    owner: &'c Connection,
    id: u64,
}

impl Drop for ExecutionSlot<'_> {
    fn drop(&mut self) {
        if self.owner.active.get() == Some(self.id) {
            self.owner.active.set(None);
        }
    }
}
