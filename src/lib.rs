//! A small SQLite access layer: length-checked argument binding, prepared
//! statements with forward-only cursors, nested transactions, and a queue that
//! serializes every use of a connection onto one worker thread.

pub mod error;
pub mod prelude;
pub mod results;
pub mod sqlite;
pub mod types;

pub use error::{DbError, ErrorKind};
pub use results::{ResultSet, Row};
pub use sqlite::{Connection, ConnectionOptions, DatabaseQueue, StatementHandle};
pub use types::{Arguments, BindTarget, Value};
