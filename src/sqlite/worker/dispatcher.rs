use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::Receiver;
use std::time::Instant;

use tracing::{debug, trace, warn};

use crate::error::DbError;
use crate::sqlite::connection::Connection;

use super::channel::{BoxedResponse, Command, Job};

pub(super) fn run_queue_worker(mut conn: Connection, receiver: &Receiver<Command>) {
    debug!(path = %conn.path(), "queue worker started");
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Run(job) => run_job(&mut conn, job),
            Command::Close { respond_to } => {
                // Anything that slipped in behind the close request is refused.
                while let Ok(late) = receiver.try_recv() {
                    if let Command::Run(job) = late {
                        job.ticket.finish();
                        job.reply.send(Err(queue_closed()));
                    }
                }
                let _ = respond_to.send(conn.close());
                break;
            }
            Command::Shutdown => break,
        }
    }
    if let Err(err) = conn.close() {
        warn!(error = %err, "closing connection on worker shutdown failed");
    }
    debug!(path = %conn.path(), "queue worker stopped");
}

fn run_job(conn: &mut Connection, job: Job) {
    let Job {
        id,
        ticket,
        deadline,
        work,
        reply,
    } = job;

    if !ticket.try_start() {
        warn!(job = id, "skipping cancelled work item");
        reply.send(Err(DbError::Cancelled(format!(
            "work item {id} was cancelled before it started"
        ))));
        return;
    }
    if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        ticket.finish();
        warn!(job = id, "dropping work item past its deadline");
        reply.send(Err(DbError::TimedOut {
            message: format!("work item {id} reached its deadline before it started"),
            code: None,
        }));
        return;
    }

    trace!(job = id, "running work item");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(conn))).unwrap_or_else(|payload| {
        warn!(job = id, "work item panicked");
        Err(DbError::execution(format!(
            "work item {id} panicked: {}",
            panic_message(payload.as_ref())
        )))
    });
    let outcome = settle_transaction(conn, id, outcome);
    ticket.finish();
    reply.send(outcome);
}

/// No transaction survives its work item: whatever is still open is rolled back
/// before the next item runs.
fn settle_transaction(conn: &mut Connection, id: u64, outcome: BoxedResponse) -> BoxedResponse {
    if !conn.is_in_transaction() {
        return outcome;
    }
    conn.abandon_transaction();
    match outcome {
        Ok(_) => Err(DbError::Misuse(format!(
            "work item {id} returned with a transaction still open; it was rolled back"
        ))),
        Err(err) => Err(err),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

pub(super) fn queue_closed() -> DbError {
    DbError::Closed("database queue is closed".into())
}
