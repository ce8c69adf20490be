use tracing::{debug, warn};

use crate::error::{DbError, Phase};
use crate::sqlite::config::TransactionKind;

use super::Connection;

/// Outcome a transaction or savepoint body asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Commit,
    Rollback,
}

/// Nesting bookkeeping; only depth 0 ↔ 1 transitions reach the engine.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct TxState {
    pub(crate) depth: u32,
    // Set by a nested rollback: the outermost commit must roll back instead.
    pub(crate) rollback_only: bool,
    pub(crate) next_savepoint: u64,
}

impl Connection {
    /// Begin an exclusive transaction, or nest inside the current one.
    ///
    /// # Errors
    /// Returns [`DbError::TimedOut`] if the lock cannot be taken before the busy timeout.
    pub fn begin_transaction(&mut self) -> Result<(), DbError> {
        self.begin_transaction_with(TransactionKind::Exclusive)
    }

    /// Begin a deferred transaction, or nest inside the current one.
    ///
    /// # Errors
    /// See [`Connection::begin_transaction`].
    pub fn begin_deferred_transaction(&mut self) -> Result<(), DbError> {
        self.begin_transaction_with(TransactionKind::Deferred)
    }

    /// Begin a transaction of the given kind. Nested calls only bump the depth;
    /// `kind` matters for the outermost call alone.
    ///
    /// # Errors
    /// Returns any engine error raised by `BEGIN`.
    pub fn begin_transaction_with(&mut self, kind: TransactionKind) -> Result<(), DbError> {
        self.ensure_idle()?;
        if self.tx.depth == 0 {
            self.handle()?.execute_batch(kind.begin_sql())?;
            self.tx.rollback_only = false;
            debug!(path = %self.path(), ?kind, "transaction started");
        }
        self.tx.depth += 1;
        Ok(())
    }

    /// Commit one level. Only the outermost commit reaches the engine.
    ///
    /// If any nested level rolled back, the outermost commit rolls the whole
    /// transaction back and reports that as an error.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] with no open transaction, [`DbError::Execution`]
    /// when a nested rollback forced a rollback, or the engine's `COMMIT` error.
    pub fn commit(&mut self) -> Result<(), DbError> {
        self.leave_level("commit")?;
        if self.tx.depth > 0 {
            return Ok(());
        }
        if std::mem::take(&mut self.tx.rollback_only) {
            self.rollback_engine()?;
            return Err(DbError::execution(
                "transaction rolled back: a nested transaction was rolled back",
            ));
        }
        let conn = self.handle()?;
        match conn.execute_batch("COMMIT") {
            Ok(()) => {
                debug!(path = %self.path(), "transaction committed");
                Ok(())
            }
            Err(err) => {
                let err = DbError::from_engine(err, Phase::Execute);
                // A failed COMMIT leaves the engine transaction open; do not leak it.
                if let Err(rollback_err) = self.rollback_engine() {
                    warn!(error = %rollback_err, "rollback after failed commit also failed");
                }
                Err(err)
            }
        }
    }

    /// Roll back one level. A nested rollback marks the whole transaction for
    /// rollback; the outermost rollback reaches the engine.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] with no open transaction, or the engine's `ROLLBACK` error.
    pub fn rollback(&mut self) -> Result<(), DbError> {
        self.leave_level("roll back")?;
        if self.tx.depth > 0 {
            self.tx.rollback_only = true;
            debug!(depth = self.tx.depth, "nested rollback; transaction is now rollback-only");
            return Ok(());
        }
        self.tx.rollback_only = false;
        self.rollback_engine()
    }

    #[must_use]
    pub fn transaction_depth(&self) -> u32 {
        self.tx.depth
    }

    /// True inside a transaction opened here or by raw SQL (`BEGIN`, `SAVEPOINT`).
    #[must_use]
    pub fn is_in_transaction(&self) -> bool {
        self.tx.depth > 0
            || self
                .handle()
                .map(|conn| !conn.is_autocommit())
                .unwrap_or(false)
    }

    /// Run `body` inside a transaction: commit when it returns
    /// [`Completion::Commit`], roll back on [`Completion::Rollback`] or on error.
    ///
    /// # Errors
    /// Returns the body's error, or any error from begin/commit/rollback.
    pub fn in_transaction<F>(&mut self, kind: TransactionKind, body: F) -> Result<Completion, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<Completion, DbError>,
    {
        self.begin_transaction_with(kind)?;
        match body(self) {
            Ok(Completion::Commit) => self.commit().map(|()| Completion::Commit),
            Ok(Completion::Rollback) => self.rollback().map(|()| Completion::Rollback),
            Err(err) => {
                if let Err(rollback_err) = self.rollback() {
                    warn!(error = %rollback_err, "rollback after failed transaction body failed");
                }
                Err(err)
            }
        }
    }

    /// # Errors
    /// Returns the engine's error for `SAVEPOINT`.
    pub fn start_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        self.ensure_idle()?;
        self.handle()?
            .execute_batch(&format!("SAVEPOINT '{}'", escape_savepoint_name(name)))?;
        Ok(())
    }

    /// # Errors
    /// Returns the engine's error, e.g. when no savepoint has that name.
    pub fn release_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        self.ensure_idle()?;
        self.handle()?
            .execute_batch(&format!("RELEASE SAVEPOINT '{}'", escape_savepoint_name(name)))?;
        Ok(())
    }

    /// Undo everything since the savepoint; the savepoint itself stays open.
    ///
    /// # Errors
    /// Returns the engine's error, e.g. when no savepoint has that name.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), DbError> {
        self.ensure_idle()?;
        self.handle()?.execute_batch(&format!(
            "ROLLBACK TRANSACTION TO SAVEPOINT '{}'",
            escape_savepoint_name(name)
        ))?;
        Ok(())
    }

    /// Run `body` inside a fresh savepoint, releasing it on commit and undoing
    /// it on rollback or error. Works inside or outside a transaction.
    ///
    /// # Errors
    /// Returns the body's error, or any savepoint error.
    pub fn in_savepoint<F>(&mut self, body: F) -> Result<Completion, DbError>
    where
        F: FnOnce(&mut Connection) -> Result<Completion, DbError>,
    {
        let name = format!("sqlq_savepoint_{}", self.tx.next_savepoint);
        self.tx.next_savepoint += 1;
        self.start_savepoint(&name)?;
        let outcome = body(self);
        match outcome {
            Ok(Completion::Commit) => {
                self.release_savepoint(&name)?;
                Ok(Completion::Commit)
            }
            Ok(Completion::Rollback) => {
                self.rollback_to_savepoint(&name)?;
                self.release_savepoint(&name)?;
                Ok(Completion::Rollback)
            }
            Err(err) => {
                let undo = self
                    .rollback_to_savepoint(&name)
                    .and_then(|()| self.release_savepoint(&name));
                if let Err(undo_err) = undo {
                    warn!(savepoint = %name, error = %undo_err, "could not undo savepoint after error");
                }
                Err(err)
            }
        }
    }

    /// Drop every nesting level and roll back whatever the engine still has open,
    /// including a transaction started with raw `BEGIN` or `SAVEPOINT`.
    pub(crate) fn abandon_transaction(&mut self) {
        if !self.is_in_transaction() {
            return;
        }
        warn!(path = %self.path(), depth = self.tx.depth, "abandoning open transaction");
        self.tx.depth = 0;
        self.tx.rollback_only = false;
        if let Err(err) = self.rollback_engine() {
            warn!(error = %err, "rollback of abandoned transaction failed");
        }
    }

    fn leave_level(&mut self, action: &str) -> Result<(), DbError> {
        self.ensure_idle()?;
        if self.tx.depth == 0 {
            return Err(DbError::Misuse(format!("cannot {action}: no transaction is open")));
        }
        self.tx.depth -= 1;
        Ok(())
    }

    fn rollback_engine(&self) -> Result<(), DbError> {
        let conn = self.handle()?;
        // Some errors (e.g. ON CONFLICT ROLLBACK) already ended the engine transaction.
        if conn.is_autocommit() {
            debug!(path = %self.path(), "transaction already ended by the engine");
            return Ok(());
        }
        conn.execute_batch("ROLLBACK")?;
        debug!(path = %self.path(), "transaction rolled back");
        Ok(())
    }
}

fn escape_savepoint_name(name: &str) -> String {
    name.replace('\'', "''")
}
