//! SQLite implementation of the connection, statement, cursor and queue layers.

pub mod config;
pub mod connection;
pub mod cursor;
pub mod params;
pub mod prepared;
pub mod query;
pub mod worker;

pub use config::{
    ConnectionOptions, ConnectionOptionsBuilder, MEMORY_PATH, OpenMode, QueueOptions,
    TransactionKind,
};
pub use connection::{Completion, Connection};
pub use cursor::{ResultCursor, Step};
pub use prepared::StatementHandle;
pub use query::build_result_set;
pub use worker::{DatabaseQueue, Submission};
