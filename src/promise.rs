use parking_lot::Mutex;

use std::mem;
use std::sync::Arc;

use crate::error::{Outcome, Reason};

type SettleFn<T> = Box<dyn FnOnce(Outcome<T>) + Send>;
type CancelFn = Box<dyn FnOnce() + Send>;

enum State<T> {
    Pending {
        callbacks: Vec<SettleFn<T>>,
        on_cancel: Option<CancelFn>,
        cancel_requested: bool,
    },
    Settled(Outcome<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
}

/// Consumer handle to an eventually-settled value.
///
/// A promise settles at most once, with a value or a [`Reason`]. Settlement
/// callbacks run on the settler's stack, in attachment order; attaching to an
/// already-settled promise runs the callback immediately. A promise whose
/// producer goes away without settling stays pending forever and never
/// resumes its awaiters.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Promise<T> {
    /// Creates an unsettled promise and its producer handle.
    pub fn pending() -> (Promise<T>, Deferred<T>) {
        Self::new_pending(None)
    }

    /// Like [`Promise::pending`], with a cancellation handler supplied by the
    /// producer. The handler runs at most once, on the first cancellation
    /// request arriving before settlement.
    pub fn pending_on_cancel<F>(on_cancel: F) -> (Promise<T>, Deferred<T>)
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new_pending(Some(Box::new(on_cancel) as CancelFn))
    }

    fn new_pending(on_cancel: Option<CancelFn>) -> (Promise<T>, Deferred<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State::Pending {
                callbacks: Vec::new(),
                on_cancel,
                cancel_requested: false,
            }),
        });

        (
            Promise {
                shared: shared.clone(),
            },
            Deferred { shared },
        )
    }

    /// An already-fulfilled promise.
    pub fn resolved(value: T) -> Promise<T> {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Settled(Ok(value))),
            }),
        }
    }

    /// An already-rejected promise.
    pub fn rejected(reason: impl Into<Reason>) -> Promise<T> {
        Promise {
            shared: Arc::new(Shared {
                state: Mutex::new(State::Settled(Err(reason.into()))),
            }),
        }
    }

    /// The settled outcome, if settlement has happened.
    pub fn settled(&self) -> Option<Outcome<T>>
    where
        T: Clone,
    {
        match &*self.shared.state.lock() {
            State::Settled(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Attaches a settlement callback.
    ///
    /// Already settled: the callback runs before `subscribe` returns. Still
    /// pending: the callback runs inside the settling call, after every
    /// callback attached earlier.
    pub fn subscribe<F>(&self, callback: F)
    where
        F: FnOnce(Outcome<T>) + Send + 'static,
        T: Clone,
    {
        let immediate = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    None
                }
                State::Settled(outcome) => Some((callback, outcome.clone())),
            }
        };

        if let Some((callback, outcome)) = immediate {
            callback(outcome);
        }
    }

    /// Advisory request to stop producing this value.
    ///
    /// Forwards to the producer's cancellation handler, which decides whether
    /// and how to stop; the promise itself is not settled by this call. A
    /// no-op on settled promises and on repeated requests.
    pub fn request_cancel(&self) {
        let hook = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Settled(_) => return,
                State::Pending {
                    cancel_requested,
                    on_cancel,
                    ..
                } => {
                    if *cancel_requested {
                        return;
                    }
                    *cancel_requested = true;
                    on_cancel.take()
                }
            }
        };

        // Runs unlocked: the handler may reject this promise or cascade into
        // a nested task.
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// The one capability the task registry needs from whatever a task is
/// suspended on.
pub(crate) trait CancelTarget: Send + Sync {
    fn request_cancel(&self);
}

impl<T: Send> CancelTarget for Promise<T> {
    fn request_cancel(&self) {
        Promise::request_cancel(self);
    }
}

/// Producer handle of a [`Promise`].
///
/// The first settlement wins; every later `resolve` or `reject` is a no-op.
pub struct Deferred<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Deferred<T> {
    pub fn resolve(&self, value: T)
    where
        T: Clone,
    {
        self.settle(Ok(value));
    }

    pub fn reject(&self, reason: impl Into<Reason>)
    where
        T: Clone,
    {
        self.settle(Err(reason.into()));
    }

    /// Whether a consumer has requested cancellation. Producers use this to
    /// decide whether to keep working.
    pub fn cancel_requested(&self) -> bool {
        match &*self.shared.state.lock() {
            State::Pending {
                cancel_requested, ..
            } => *cancel_requested,
            State::Settled(_) => false,
        }
    }

    fn settle(&self, outcome: Outcome<T>)
    where
        T: Clone,
    {
        let callbacks = {
            let mut state = self.shared.state.lock();
            let prev = mem::replace(&mut *state, State::Settled(outcome.clone()));
            match prev {
                State::Pending { callbacks, .. } => callbacks,
                State::Settled(first) => {
                    // first settlement wins
                    *state = State::Settled(first);
                    return;
                }
            }
        };

        // Delivery happens unlocked and in attachment order; a callback may
        // re-subscribe, settle other promises, or resume a suspended task.
        for callback in callbacks {
            callback(outcome.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Failure;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn settles_once() {
        let (promise, deferred) = Promise::pending();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        promise.subscribe(move |outcome| {
            assert_eq!(outcome.unwrap(), 1);
            h.fetch_add(1, Ordering::SeqCst);
        });

        deferred.resolve(1);
        deferred.resolve(2);
        deferred.reject(Failure::Canceled);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(promise.settled().unwrap().unwrap(), 1);
    }

    #[test]
    fn delivers_in_attachment_order() {
        let (promise, deferred) = Promise::pending();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            promise.subscribe(move |_| order.lock().push(tag));
        }

        deferred.resolve(());
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn subscribe_after_settlement_runs_immediately() {
        let promise = Promise::resolved(7);
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        promise.subscribe(move |outcome| {
            assert_eq!(outcome.unwrap(), 7);
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_runs_hook_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let (promise, deferred) = Promise::<()>::pending_on_cancel(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!deferred.cancel_requested());
        promise.request_cancel();
        promise.request_cancel();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(deferred.cancel_requested());
    }

    #[test]
    fn cancel_after_settlement_is_a_no_op() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let (promise, deferred) = Promise::pending_on_cancel(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        deferred.resolve(5);
        promise.request_cancel();

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(promise.settled().unwrap().unwrap(), 5);
    }

    #[test]
    fn rejection_reason_reaches_subscribers() {
        let (promise, deferred) = Promise::<i32>::pending();
        let seen = Arc::new(Mutex::new(None));

        let s = seen.clone();
        promise.subscribe(move |outcome| {
            *s.lock() = Some(outcome.unwrap_err());
        });

        deferred.reject(Reason::value(42u8));

        match seen.lock().take().unwrap() {
            Reason::Value(payload) => {
                assert_eq!(payload.type_name(), "u8");
                assert_eq!(*payload.downcast_ref::<u8>().unwrap(), 42);
            }
            other => panic!("expected raw payload, got {:?}", other),
        };
    }
}
