use futures::future::FusedFuture;
use parking_lot::Mutex;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use crate::error::{Failure, Outcome};
use crate::promise::{CancelTarget, Promise};
use crate::registry::Registry;
use crate::waker;

/// Suspends the calling logical task until `promise` settles.
///
/// Resolution yields the promise's value; rejection fails the wait with the
/// reason coerced to a [`Failure`]. The future must be awaited inside a task
/// started by [`spawn`](crate::spawn); anywhere else it fails immediately
/// with [`Failure::InvalidState`].
///
/// While suspended, the promise is recorded as the task's current suspension
/// so that cancellation requests against the task reach the promise's
/// producer.
pub fn wait<T>(promise: &Promise<T>) -> Wait<T>
where
    T: Clone + Send + 'static,
{
    Wait {
        promise: promise.clone(),
        state: WaitState::Idle,
    }
}

/// Future returned by [`wait`].
#[must_use = "futures do nothing unless polled"]
pub struct Wait<T> {
    promise: Promise<T>,
    state: WaitState<T>,
}

enum WaitState<T> {
    Idle,
    Suspended { cell: Arc<ResumeCell<T>> },
    Finished,
}

// hand-off between the settlement callback and the suspended poll
struct ResumeCell<T> {
    state: Mutex<CellState<T>>,
}

struct CellState<T> {
    outcome: Option<Outcome<T>>,
    waker: Option<Waker>,
}

// rejection reasons surface as failures only when a task is resumed
fn resume<T>(outcome: Outcome<T>) -> Result<T, Failure> {
    match outcome {
        Ok(value) => Ok(value),
        Err(reason) => Err(reason.into_failure()),
    }
}

impl<T> Future for Wait<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, Failure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        match &this.state {
            WaitState::Idle => {
                // being inside a task gates entry even when the promise has
                // already settled
                let id = match unsafe { waker::task_data(cx) } {
                    Some(data) => data.context.id,
                    None => {
                        this.state = WaitState::Finished;
                        return Poll::Ready(Err(Failure::InvalidState(
                            "wait must run inside a logical task",
                        )));
                    }
                };

                if let Some(outcome) = this.promise.settled() {
                    // no suspension happens, so a pending cancellation
                    // request stays latent until the next registration
                    this.state = WaitState::Finished;
                    return Poll::Ready(resume(outcome));
                }

                let target: Arc<dyn CancelTarget> = Arc::new(this.promise.clone());
                if Registry::global().register(id, target).is_err() {
                    this.state = WaitState::Finished;
                    return Poll::Ready(Err(Failure::InvalidState(
                        "task is already awaiting a promise",
                    )));
                }

                let cell = Arc::new(ResumeCell {
                    state: Mutex::new(CellState {
                        outcome: None,
                        waker: Some(cx.waker().clone()),
                    }),
                });

                let subscriber = Arc::clone(&cell);
                this.promise.subscribe(move |outcome| {
                    // the task counts as running again from the moment its
                    // promise settles
                    Registry::global().unregister(id);

                    let waker = {
                        let mut state = subscriber.state.lock();
                        state.outcome = Some(outcome);
                        state.waker.take()
                    };
                    // wake with the cell unlocked; resumption re-polls the
                    // task on this stack
                    if let Some(waker) = waker {
                        waker.wake();
                    }
                });

                this.state = WaitState::Suspended { cell };
                Poll::Pending
            }
            WaitState::Suspended { cell } => {
                let cell = Arc::clone(cell);
                let outcome = {
                    let mut state = cell.state.lock();
                    match state.outcome.take() {
                        Some(outcome) => Some(outcome),
                        None => {
                            state.waker = Some(cx.waker().clone());
                            None
                        }
                    }
                };

                match outcome {
                    Some(outcome) => {
                        this.state = WaitState::Finished;
                        Poll::Ready(resume(outcome))
                    }
                    None => Poll::Pending,
                }
            }
            WaitState::Finished => panic!("Wait polled after completion"),
        }
    }
}

impl<T> FusedFuture for Wait<T>
where
    T: Clone + Send + 'static,
{
    fn is_terminated(&self) -> bool {
        matches!(self.state, WaitState::Finished)
    }
}
