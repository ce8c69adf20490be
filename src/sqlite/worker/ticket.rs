use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::DbError;

use super::channel::{BoxedResponse, unbox};
use super::manager::worker_gone;

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

/// Shared lifecycle flag of one queued work item.
///
/// The worker and the submitter race on the `PENDING` state: whichever moves it
/// first decides whether the item runs or is cancelled.
#[derive(Debug, Clone, Default)]
pub(crate) struct Ticket(Arc<AtomicU8>);

impl Ticket {
    /// Claim the item for execution. False if it was cancelled first.
    pub(crate) fn try_start(&self) -> bool {
        self.transition(PENDING, RUNNING)
    }

    /// Withdraw the item. False if it already started or finished.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(PENDING, CANCELLED)
    }

    pub(crate) fn finish(&self) {
        self.0.store(DONE, Ordering::Release);
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Outcome of a work item queued with `submit_async`.
///
/// Await it for the work item's result. Dropping it does not withdraw the
/// item; call [`cancel`](Self::cancel) for that.
#[must_use = "a submission does nothing observable unless awaited or cancelled"]
pub struct Submission<T> {
    state: SubmissionState,
    _output: PhantomData<fn() -> T>,
}

enum SubmissionState {
    Pending {
        ticket: Ticket,
        rx: oneshot::Receiver<BoxedResponse>,
    },
    Failed(Option<DbError>),
}

impl<T> Submission<T> {
    pub(super) fn pending(ticket: Ticket, rx: oneshot::Receiver<BoxedResponse>) -> Self {
        Self {
            state: SubmissionState::Pending { ticket, rx },
            _output: PhantomData,
        }
    }

    pub(super) fn failed(err: DbError) -> Self {
        Self {
            state: SubmissionState::Failed(Some(err)),
            _output: PhantomData,
        }
    }

    /// Withdraw the item if the worker has not started it yet.
    ///
    /// Returns `true` if it was withdrawn; awaiting then yields
    /// [`DbError::Cancelled`]. An item that already started runs to completion.
    pub fn cancel(&self) -> bool {
        match &self.state {
            SubmissionState::Pending { ticket, .. } => ticket.cancel(),
            SubmissionState::Failed(_) => false,
        }
    }
}

impl<T: 'static> Future for Submission<T> {
    type Output = Result<T, DbError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            SubmissionState::Pending { rx, .. } => Pin::new(rx).poll(cx).map(|received| match received {
                Ok(response) => unbox(response),
                Err(_) => Err(worker_gone()),
            }),
            SubmissionState::Failed(err) => Poll::Ready(Err(err
                .take()
                .unwrap_or_else(|| DbError::Misuse("submission polled after completion".into())))),
        }
    }
}

impl<T> fmt::Debug for Submission<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            SubmissionState::Pending { .. } => "pending",
            SubmissionState::Failed(_) => "failed",
        };
        f.debug_struct("Submission").field("state", &state).finish()
    }
}
