use std::any::Any;
use std::sync::mpsc::SyncSender;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::error::DbError;
use crate::sqlite::connection::Connection;

use super::ticket::Ticket;

pub(super) type BoxedResponse = Result<Box<dyn Any + Send>, DbError>;
pub(super) type BoxedWork = Box<dyn FnOnce(&mut Connection) -> BoxedResponse + Send>;

/// Where the worker sends a job's outcome.
pub(super) enum Reply {
    /// A caller blocked in `submit`.
    Blocking(SyncSender<BoxedResponse>),
    /// A [`Submission`](super::Submission) future.
    Async(oneshot::Sender<BoxedResponse>),
}

impl Reply {
    pub(super) fn send(self, response: BoxedResponse) {
        // The caller may have given up (timed out, dropped its future); nothing to do then.
        match self {
            Reply::Blocking(tx) => {
                let _ = tx.send(response);
            }
            Reply::Async(tx) => {
                let _ = tx.send(response);
            }
        }
    }
}

pub(super) struct Job {
    pub(super) id: u64,
    pub(super) ticket: Ticket,
    pub(super) deadline: Option<Instant>,
    pub(super) work: BoxedWork,
    pub(super) reply: Reply,
}

pub(super) enum Command {
    Run(Job),
    /// Finish everything queued so far, then close the connection.
    Close {
        respond_to: SyncSender<Result<(), DbError>>,
    },
    Shutdown,
}

pub(super) fn boxed<T, F>(work: F) -> BoxedWork
where
    F: FnOnce(&mut Connection) -> Result<T, DbError> + Send + 'static,
    T: Send + 'static,
{
    Box::new(move |conn| work(conn).map(|value| Box::new(value) as Box<dyn Any + Send>))
}

pub(super) fn unbox<T: 'static>(response: BoxedResponse) -> Result<T, DbError> {
    response?
        .downcast::<T>()
        .map(|boxed| *boxed)
        .map_err(|_| DbError::execution("queue worker response downcast failure"))
}
