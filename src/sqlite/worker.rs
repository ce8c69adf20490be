//! Serialized access to one connection through a dedicated worker thread.
//!
//! Callers send boxed work items over a channel; the worker runs them one at a
//! time against the connection it owns and answers over a per-item channel.

mod channel;
mod connection;
mod dispatcher;
mod manager;
mod ticket;

pub use connection::DatabaseQueue;
pub use ticket::Submission;
