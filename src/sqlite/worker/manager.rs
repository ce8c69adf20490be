use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::DbError;
use crate::sqlite::config::{ConnectionOptions, QueueOptions};
use crate::sqlite::connection::Connection;

use super::channel::{BoxedWork, Command, Job, Reply, unbox};
use super::dispatcher::{queue_closed, run_queue_worker};
use super::ticket::{Submission, Ticket};

pub(super) struct QueueWorker {
    sender: Sender<Command>,
    path: String,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
    next_job: AtomicU64,
    default_deadline: Option<Duration>,
    closed: AtomicBool,
}

impl QueueWorker {
    /// Start the worker thread and open the connection on it.
    pub(super) fn spawn(options: ConnectionOptions, queue: QueueOptions) -> Result<Self, DbError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), DbError>>(1);
        let path = options.path.clone();
        let name = queue.name.clone().unwrap_or_else(|| path.clone());

        let handle = thread::Builder::new()
            .name(format!("sqlite-worker-{name}"))
            .spawn(move || {
                // The connection never leaves this thread.
                let conn = match Connection::open(&options) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                run_queue_worker(conn, &receiver);
            })
            .map_err(|err| DbError::Io {
                message: format!("failed to spawn SQLite worker thread: {err}"),
                code: None,
            })?;

        let startup = ready_rx.recv().unwrap_or_else(|_| {
            Err(DbError::Io {
                message: "SQLite worker exited during startup".into(),
                code: None,
            })
        });
        if let Err(err) = startup {
            let _ = handle.join();
            return Err(err);
        }

        debug!(%path, worker = %name, "database queue ready");
        Ok(Self {
            sender,
            path,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
            next_job: AtomicU64::new(1),
            default_deadline: queue.default_deadline,
            closed: AtomicBool::new(false),
        })
    }

    pub(super) fn path(&self) -> &str {
        &self.path
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn on_worker_thread(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    fn send_command(&self, command: Command) -> Result<(), DbError> {
        self.sender.send(command).map_err(|_| queue_closed())
    }

    fn enqueue(
        &self,
        deadline: Option<Duration>,
        work: BoxedWork,
        reply: Reply,
    ) -> Result<Ticket, DbError> {
        if self.is_closed() {
            return Err(queue_closed());
        }
        let ticket = Ticket::default();
        let job = Job {
            id: self.next_job.fetch_add(1, Ordering::Relaxed),
            ticket: ticket.clone(),
            deadline: deadline
                .or(self.default_deadline)
                .map(|after| Instant::now() + after),
            work,
            reply,
        };
        self.send_command(Command::Run(job))?;
        Ok(ticket)
    }

    /// Queue `work` and block until it has run.
    pub(super) fn request<T: 'static>(
        &self,
        deadline: Option<Duration>,
        work: BoxedWork,
    ) -> Result<T, DbError> {
        if self.on_worker_thread() {
            return Err(DbError::Misuse(
                "synchronous submit from inside a work item would deadlock the queue".into(),
            ));
        }
        let deadline = deadline.or(self.default_deadline);
        let (tx, rx) = mpsc::sync_channel(1);
        let ticket = self.enqueue(deadline, work, Reply::Blocking(tx))?;

        let response = match deadline {
            Some(after) => match rx.recv_timeout(after) {
                Ok(response) => response,
                Err(RecvTimeoutError::Timeout) if ticket.cancel() => {
                    warn!(path = %self.path, "work item reached its deadline while queued");
                    return Err(DbError::TimedOut {
                        message: format!("work item did not start within {after:?}"),
                        code: None,
                    });
                }
                // Already running: it is never interrupted, so wait it out.
                Err(RecvTimeoutError::Timeout) => rx.recv().map_err(|_| worker_gone())?,
                Err(RecvTimeoutError::Disconnected) => return Err(worker_gone()),
            },
            None => rx.recv().map_err(|_| worker_gone())?,
        };
        unbox(response)
    }

    /// Queue `work` and return a future for its outcome.
    pub(super) fn request_async<T: 'static>(
        &self,
        deadline: Option<Duration>,
        work: BoxedWork,
    ) -> Submission<T> {
        let (tx, rx) = oneshot::channel();
        match self.enqueue(deadline, work, Reply::Async(tx)) {
            Ok(ticket) => Submission::pending(ticket, rx),
            Err(err) => Submission::failed(err),
        }
    }

    /// Run what is already queued, close the connection and join the worker.
    pub(super) fn close(&self) -> Result<(), DbError> {
        if self.on_worker_thread() {
            return Err(DbError::Misuse(
                "cannot close the queue from inside one of its work items".into(),
            ));
        }
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.send_command(Command::Close { respond_to: tx })?;
        let outcome = rx.recv().map_err(|_| worker_gone())?;

        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(path = %self.path, "SQLite worker thread panicked during close");
            }
        }
        debug!(path = %self.path, "database queue closed");
        outcome
    }
}

impl Drop for QueueWorker {
    /// Items already queued still run; the connection is closed before this returns,
    /// unless the last handle is dropped by a work item on the worker itself.
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if self.on_worker_thread() {
            return;
        }
        let handle = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!(path = %self.path, "SQLite worker thread panicked during shutdown");
            }
        }
    }
}

pub(super) fn worker_gone() -> DbError {
    DbError::Closed("SQLite worker stopped before answering".into())
}
