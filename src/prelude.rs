//! Convenient imports for common functionality.
//!
//! ```rust
//! use sql_queue::prelude::*;
//!
//! # fn main() -> Result<(), DbError> {
//! let queue = DatabaseQueue::open_in_memory()?;
//! queue.execute_batch("CREATE TABLE t(a INTEGER, b TEXT)")?;
//! queue.execute("INSERT INTO t VALUES (?, ?)", [Value::Integer(1), Value::from("x")])?;
//! let rows = queue.query_all("SELECT a, b FROM t", ())?;
//! assert_eq!(rows.len(), 1);
//! # Ok(())
//! # }
//! ```

pub use crate::error::{DbError, ErrorKind};
pub use crate::results::{ResultSet, Row};
pub use crate::sqlite::{
    Completion, Connection, ConnectionOptions, ConnectionOptionsBuilder, DatabaseQueue,
    MEMORY_PATH, OpenMode, QueueOptions, ResultCursor, StatementHandle, Step, Submission,
    TransactionKind,
};
pub use crate::types::{Arguments, BindTarget, Value};
