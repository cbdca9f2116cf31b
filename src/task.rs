use futures::task::{self, ArcWake};
use parking_lot::Mutex;
use pin_project::pin_project;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::Failure;
use crate::promise::Promise;
use crate::registry::{Registry, TaskId};
use crate::waker;

/// Identity carried through every poll of a logical task's body.
#[derive(Clone)]
pub(crate) struct TaskContext {
    pub(crate) id: TaskId,
}

// a future wrapper polls the inner future with the task identity embedded in
// the context
#[pin_project]
struct WithContext<Fut> {
    #[pin]
    inner: Fut,
    context: TaskContext,
}

impl<Fut> Future for WithContext<Fut>
where
    Fut: Future,
{
    type Output = Fut::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let original = cx.waker().clone();
        let waker = unsafe { waker::task_waker(this.context.clone(), original) };
        let mut new_cx = Context::from_waker(&waker);

        this.inner.poll(&mut new_cx)
    }
}

struct Slot {
    future: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    notified: bool,
    done: bool,
}

/// A logical task's body and the state needed to re-poll it.
///
/// Waking re-runs the task on the waker's own stack. A wake arriving while
/// the body is out of the slot (mid-poll) only marks `notified`; the poller
/// picks the notification up before parking the body again.
struct RawTask {
    slot: Mutex<Slot>,
}

impl RawTask {
    fn new(future: Pin<Box<dyn Future<Output = ()> + Send>>) -> Self {
        RawTask {
            slot: Mutex::new(Slot {
                future: Some(future),
                notified: false,
                done: false,
            }),
        }
    }

    fn run(this: &Arc<RawTask>) {
        loop {
            let mut future = {
                let mut slot = this.slot.lock();
                if slot.done {
                    return;
                }
                match slot.future.take() {
                    Some(future) => future,
                    None => {
                        // another frame is mid-poll; have it go around again
                        slot.notified = true;
                        return;
                    }
                }
            };

            // poll with the slot unlocked so the body may settle promises
            // whose callbacks wake this task
            let waker = task::waker(Arc::clone(this));
            let mut cx = Context::from_waker(&waker);
            let poll = future.as_mut().poll(&mut cx);

            let mut slot = this.slot.lock();
            match poll {
                Poll::Ready(()) => {
                    slot.done = true;
                    return;
                }
                Poll::Pending => {
                    slot.future = Some(future);
                    if !slot.notified {
                        return;
                    }
                    slot.notified = false;
                }
            }
        }
    }
}

impl ArcWake for RawTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        RawTask::run(arc_self);
    }
}

/// Runs a blocking-style future as a logical task and returns a promise for
/// its outcome.
///
/// The body starts on the caller's stack and runs until its first suspension.
/// From then on it is resumed by settlement of whatever it awaits, so no
/// executor is involved. A body that never suspends settles the returned
/// promise before `spawn` returns.
///
/// Requesting cancellation of the returned promise does not settle it; it
/// asks the task to stop by failing its current and future suspensions with
/// [`Failure::Canceled`]. The task is free to catch that and finish some
/// other way.
pub fn spawn<Fut, T>(future: Fut) -> Promise<T>
where
    Fut: Future<Output = Result<T, Failure>> + Send + 'static,
    T: Clone + Send + 'static,
{
    let id = TaskId::next();
    Registry::global().enroll(id);

    let (promise, deferred) = Promise::pending_on_cancel(move || {
        Registry::global().request_cancel(id);
    });

    let body = async move {
        let outcome = future.await;

        // retire before settling so subscribers observe a finished task
        Registry::global().retire(id);
        match outcome {
            Ok(value) => deferred.resolve(value),
            Err(failure) => deferred.reject(failure),
        }
    };

    let task = Arc::new(RawTask::new(Box::pin(WithContext {
        inner: body,
        context: TaskContext { id },
    })));
    RawTask::run(&task);

    promise
}

/// Wraps a future-returning function so that every call runs as its own
/// logical task.
pub fn async_fn<F>(f: F) -> AsyncFn<F> {
    AsyncFn { f }
}

/// A reusable entry point into task execution, created by [`async_fn`].
pub struct AsyncFn<F> {
    f: F,
}

impl<F> AsyncFn<F> {
    /// Calls the wrapped function and runs the produced future as a fresh
    /// logical task.
    pub fn start<A, Fut, T>(&self, args: A) -> Promise<T>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, Failure>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        spawn((self.f)(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_body_settles_before_spawn_returns() {
        let promise = spawn(async { Ok::<_, Failure>("done") });

        assert_eq!(promise.settled().unwrap().unwrap(), "done");
    }

    struct WakeOnce {
        woken: bool,
    }

    impl Future for WakeOnce {
        type Output = Result<u32, Failure>;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.woken {
                Poll::Ready(Ok(7))
            } else {
                self.woken = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    #[test]
    fn wake_during_poll_reruns_the_body() {
        let promise = spawn(WakeOnce { woken: false });

        assert_eq!(promise.settled().unwrap().unwrap(), 7);
    }

    #[test]
    fn async_fn_starts_a_task_per_call() {
        let double = async_fn(|n: u32| async move { Ok::<_, Failure>(n * 2) });

        assert_eq!(double.start(2).settled().unwrap().unwrap(), 4);
        assert_eq!(double.start(21).settled().unwrap().unwrap(), 42);
    }
}
