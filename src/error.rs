use std::fmt;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Coarse classification of a [`DbError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Io,
    Syntax,
    Bind,
    Arity,
    Execution,
    Step,
    Index,
    Type,
    TimedOut,
    Closed,
    Cancelled,
    Misuse,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Io => "IOError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Bind => "BindError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::Execution => "ExecutionError",
            ErrorKind::Step => "StepError",
            ErrorKind::Index => "IndexError",
            ErrorKind::Type => "TypeError",
            ErrorKind::TimedOut => "TimedOut",
            ErrorKind::Closed => "Closed",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Misuse => "Misuse",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum DbError {
    #[error("I/O error: {message}")]
    Io { message: String, code: Option<i32> },

    #[error("SQL syntax error: {message}")]
    Syntax { message: String, code: Option<i32> },

    #[error("Bind error: {0}")]
    Bind(String),

    #[error("Arity error: statement expects {expected} argument(s), got {given}")]
    Arity { expected: usize, given: usize },

    #[error("SQL execution error: {message}")]
    Execution { message: String, code: Option<i32> },

    #[error("Step error: {message}")]
    Step { message: String, code: Option<i32> },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Timed out: {message}")]
    TimedOut { message: String, code: Option<i32> },

    #[error("Database closed: {0}")]
    Closed(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Misuse: {0}")]
    Misuse(String),
}

/// Stage at which the engine reported a failure; decides the error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Open,
    Prepare,
    Bind,
    Step,
    Execute,
}

impl DbError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Io { .. } => ErrorKind::Io,
            DbError::Syntax { .. } => ErrorKind::Syntax,
            DbError::Bind(_) => ErrorKind::Bind,
            DbError::Arity { .. } => ErrorKind::Arity,
            DbError::Execution { .. } => ErrorKind::Execution,
            DbError::Step { .. } => ErrorKind::Step,
            DbError::Index(_) => ErrorKind::Index,
            DbError::Type(_) => ErrorKind::Type,
            DbError::TimedOut { .. } => ErrorKind::TimedOut,
            DbError::Closed(_) => ErrorKind::Closed,
            DbError::Cancelled(_) => ErrorKind::Cancelled,
            DbError::Misuse(_) => ErrorKind::Misuse,
        }
    }

    /// Primary SQLite result code, when the engine produced this error.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            DbError::Io { code, .. }
            | DbError::Syntax { code, .. }
            | DbError::Execution { code, .. }
            | DbError::Step { code, .. }
            | DbError::TimedOut { code, .. } => *code,
            _ => None,
        }
    }

    pub(crate) fn execution(message: impl Into<String>) -> Self {
        DbError::Execution {
            message: message.into(),
            code: None,
        }
    }

    pub(crate) fn column_out_of_range(index: usize, count: usize) -> Self {
        DbError::Index(format!(
            "column index {index} out of range (column count {count})"
        ))
    }

    pub(crate) fn closed() -> Self {
        DbError::Closed("connection is closed".into())
    }

    /// Classify an engine error raised during `phase`.
    pub(crate) fn from_engine(err: rusqlite::Error, phase: Phase) -> Self {
        let code = primary_code(&err);
        let message = err.to_string();
        if let Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) = err.sqlite_error_code()
        {
            return DbError::TimedOut { message, code };
        }
        match err {
            rusqlite::Error::InvalidParameterName(name) => {
                DbError::Bind(format!("no parameter named {name}"))
            }
            rusqlite::Error::InvalidParameterCount(given, expected) => {
                DbError::Arity { expected, given }
            }
            rusqlite::Error::InvalidColumnIndex(index) => {
                DbError::Index(format!("column index {index} out of range"))
            }
            rusqlite::Error::InvalidColumnName(name) => {
                DbError::Index(format!("no column named {name}"))
            }
            rusqlite::Error::InvalidColumnType(index, name, ty) => {
                DbError::Type(format!("column {index} ({name}) holds {ty}"))
            }
            rusqlite::Error::ToSqlConversionFailure(inner) => DbError::Bind(inner.to_string()),
            _ => match phase {
                Phase::Open => DbError::Io { message, code },
                Phase::Prepare => DbError::Syntax { message, code },
                Phase::Bind => DbError::Bind(message),
                Phase::Step => DbError::Step { message, code },
                Phase::Execute => DbError::Execution { message, code },
            },
        }
    }
}

// Statements executed without a more specific phase (PRAGMA, BEGIN, ...).
impl From<rusqlite::Error> for DbError {
    fn from(err: rusqlite::Error) -> Self {
        DbError::from_engine(err, Phase::Execute)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Misuse(format!("invalid configuration: {err}"))
    }
}

// SQLite reports extended codes; callers get the primary one.
fn primary_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => Some(inner.extended_code & 0xff),
        _ => None,
    }
}
