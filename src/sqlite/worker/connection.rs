use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DbError;
use crate::results::ResultSet;
use crate::sqlite::config::{ConnectionOptions, QueueOptions, TransactionKind};
use crate::sqlite::connection::{Completion, Connection};
use crate::types::Arguments;

use super::channel::boxed;
use super::manager::QueueWorker;
use super::ticket::Submission;

/// A [`Connection`] owned by a dedicated worker thread.
///
/// Every work item submitted from any thread runs on that worker, one at a
/// time, in submission order. Clones share the same worker. A failing work
/// item only fails its own submission.
///
/// ```rust,no_run
/// use sql_queue::prelude::*;
///
/// # fn main() -> Result<(), DbError> {
/// let queue = DatabaseQueue::open(ConnectionOptions::new("app.db"))?;
/// queue.execute_batch("CREATE TABLE IF NOT EXISTS t(a INTEGER)")?;
/// let inserted = queue.submit(|conn| conn.execute("INSERT INTO t VALUES (?)", [Value::Integer(7)]))?;
/// assert_eq!(inserted, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatabaseQueue {
    worker: Arc<QueueWorker>,
}

impl DatabaseQueue {
    /// Open the database on a new worker thread.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if the database cannot be opened or the thread cannot start.
    pub fn open(options: ConnectionOptions) -> Result<Self, DbError> {
        Self::open_with(options, QueueOptions::default())
    }

    /// # Errors
    /// See [`DatabaseQueue::open`].
    pub fn open_with(options: ConnectionOptions, queue: QueueOptions) -> Result<Self, DbError> {
        let worker = QueueWorker::spawn(options, queue)?;
        Ok(Self {
            worker: Arc::new(worker),
        })
    }

    /// # Errors
    /// See [`DatabaseQueue::open`].
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(ConnectionOptions::in_memory())
    }

    #[must_use]
    pub fn path(&self) -> &str {
        self.worker.path()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.worker.is_closed()
    }

    /// Run `work` on the worker and wait for its result.
    ///
    /// A transaction `work` leaves open is rolled back before the next item runs.
    ///
    /// # Errors
    /// Returns the work item's error, [`DbError::Closed`] after [`close`](Self::close),
    /// or [`DbError::Misuse`] when called from inside another work item or when
    /// `work` succeeded but left a transaction open.
    pub fn submit<T, F>(&self, work: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.request(None, boxed(work))
    }

    /// Same as [`submit`](Self::submit).
    ///
    /// # Errors
    /// See [`submit`](Self::submit).
    pub fn in_database<T, F>(&self, work: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(work)
    }

    /// Like [`submit`](Self::submit), but give up with [`DbError::TimedOut`] if
    /// the item has not started within `deadline`. A started item always finishes.
    ///
    /// # Errors
    /// See [`submit`](Self::submit).
    pub fn submit_with_deadline<T, F>(&self, deadline: Duration, work: F) -> Result<T, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.request(Some(deadline), boxed(work))
    }

    /// Queue `work` without blocking; the returned [`Submission`] resolves to its result.
    pub fn submit_async<T, F>(&self, work: F) -> Submission<T>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.request_async(None, boxed(work))
    }

    /// Queue `work`; if it has not started within `deadline` it is dropped and
    /// the submission resolves to [`DbError::TimedOut`].
    pub fn submit_async_with_deadline<T, F>(&self, deadline: Duration, work: F) -> Submission<T>
    where
        F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
        T: Send + 'static,
    {
        self.worker.request_async(Some(deadline), boxed(work))
    }

    /// Run `work` inside a transaction on the worker. It commits when `work`
    /// returns [`Completion::Commit`] and rolls back otherwise.
    ///
    /// # Errors
    /// Returns the work item's error or the commit/rollback error.
    pub fn in_transaction<F>(&self, kind: TransactionKind, work: F) -> Result<Completion, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<Completion, DbError> + Send + 'static,
    {
        self.submit(move |conn| conn.in_transaction(kind, work))
    }

    /// # Errors
    /// See [`Connection::execute`].
    pub fn execute(&self, sql: impl Into<String>, args: impl Into<Arguments>) -> Result<usize, DbError> {
        let (sql, args) = (sql.into(), args.into());
        self.submit(move |conn| conn.execute(&sql, args))
    }

    /// # Errors
    /// See [`Connection::query_all`].
    pub fn query_all(&self, sql: impl Into<String>, args: impl Into<Arguments>) -> Result<ResultSet, DbError> {
        let (sql, args) = (sql.into(), args.into());
        self.submit(move |conn| conn.query_all(&sql, args))
    }

    /// # Errors
    /// See [`Connection::execute_batch`].
    pub fn execute_batch(&self, sql: impl Into<String>) -> Result<(), DbError> {
        let sql = sql.into();
        self.submit(move |conn| conn.execute_batch(&sql))
    }

    /// Let already-queued items finish, then close the connection and stop the
    /// worker. Later submissions fail with [`DbError::Closed`]; closing twice is a no-op.
    /// Dropping the last handle does the same, blocking until the worker exits.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] from inside a work item, or the engine's close error.
    pub fn close(&self) -> Result<(), DbError> {
        self.worker.close()
    }
}

impl fmt::Debug for DatabaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseQueue")
            .field("path", &self.path())
            .field("closed", &self.is_closed())
            .finish()
    }
}
