use std::time::Duration;

use rusqlite::OpenFlags;
use serde::{Deserialize, Serialize};

use crate::error::DbError;

use super::connection::Connection;
use super::worker::DatabaseQueue;

/// Path that opens a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

/// How the database file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
    /// Read-write, creating the file if it does not exist.
    #[default]
    ReadWriteCreate,
}

impl OpenMode {
    pub(crate) fn flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        match self {
            OpenMode::ReadOnly => base | OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::ReadWrite => base | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadWriteCreate => {
                base | OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
        }
    }
}

/// Locking behaviour of the outermost `BEGIN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deferred,
    Immediate,
    #[default]
    Exclusive,
}

impl TransactionKind {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Deferred => "BEGIN DEFERRED",
            TransactionKind::Immediate => "BEGIN IMMEDIATE",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Options for opening a [`Connection`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub path: String,
    pub mode: OpenMode,
    /// How long the engine waits on a lock held by another connection.
    #[serde(with = "duration_millis")]
    pub busy_timeout: Duration,
    /// Applied with `PRAGMA journal_mode` right after opening, e.g. `"WAL"`.
    pub journal_mode: Option<String>,
    pub foreign_keys: bool,
    /// chrono `strftime` layout used to store and read dates. Without one, dates
    /// are stored as seconds since the Unix epoch.
    pub date_format: Option<String>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new(MEMORY_PATH)
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: OpenMode::default(),
            busy_timeout: Duration::from_secs(5),
            journal_mode: None,
            foreign_keys: false,
            date_format: None,
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(MEMORY_PATH)
    }

    /// Parse options from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`DbError::Misuse`] if the document is not valid options JSON.
    pub fn from_json_str(json: &str) -> Result<Self, DbError> {
        Ok(serde_json::from_str(json)?)
    }

    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

/// Fluent builder for [`ConnectionOptions`].
#[derive(Debug, Clone)]
pub struct ConnectionOptionsBuilder {
    opts: ConnectionOptions,
}

impl ConnectionOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: ConnectionOptions::new(path),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.opts.mode = mode;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn journal_mode(mut self, mode: impl Into<String>) -> Self {
        self.opts.journal_mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.opts.foreign_keys = enabled;
        self
    }

    #[must_use]
    pub fn date_format(mut self, format: impl Into<String>) -> Self {
        self.opts.date_format = Some(format.into());
        self
    }

    #[must_use]
    pub fn finish(self) -> ConnectionOptions {
        self.opts
    }

    /// Open a connection on the calling thread.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if the database cannot be opened.
    pub fn open(self) -> Result<Connection, DbError> {
        Connection::open(&self.finish())
    }

    /// Open the database behind a serialized queue.
    ///
    /// # Errors
    /// Returns [`DbError::Io`] if the database cannot be opened or the worker cannot start.
    pub fn open_queue(self) -> Result<DatabaseQueue, DbError> {
        DatabaseQueue::open(self.finish())
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn builder(path: impl Into<String>) -> ConnectionOptionsBuilder {
        ConnectionOptionsBuilder::new(path)
    }
}

/// Options for the worker behind a [`DatabaseQueue`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Worker thread name suffix; defaults to the database path.
    pub name: Option<String>,
    /// Deadline applied to submissions that do not carry their own.
    #[serde(with = "optional_duration_millis")]
    pub default_deadline: Option<Duration>,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod optional_duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
