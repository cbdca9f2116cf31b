use parking_lot::Mutex;

use std::sync::Arc;

use crate::error::{Failure, Outcome, Payload, Reason};
use crate::promise::{CancelTarget, Deferred, Promise};

/// A lazy, finite, non-restartable sequence of yielded promises with
/// computation in between.
///
/// This is the resume protocol of a generator: after a yielded promise
/// settles, the sequence is resumed either with the value ([`send`]) or with
/// the rejection reason thrown in at the yield point ([`throw_into`]), which
/// it may catch and recover from. Every call returns either the next step or
/// the failure the sequence raised.
///
/// [`send`]: Steps::send
/// [`throw_into`]: Steps::throw_into
pub trait Steps: Send {
    type Item: Clone + Send + 'static;
    type Return: Clone + Send + 'static;

    /// Runs up to the first yield point.
    fn advance(&mut self) -> StepResult<Self::Item, Self::Return>;

    /// Resumes the last yield point with the value its promise resolved to.
    fn send(&mut self, value: Self::Item) -> StepResult<Self::Item, Self::Return>;

    /// Resumes the last yield point by raising `reason` there.
    ///
    /// The reason arrives exactly as the promise rejected with it; coercion
    /// to a [`Failure`] is the business of whoever observes it escaping.
    fn throw_into(&mut self, reason: Reason) -> StepResult<Self::Item, Self::Return>;
}

pub type StepResult<V, R> = Result<Step<V, R>, Reason>;

/// One step of a [`Steps`] sequence.
pub enum Step<V, R> {
    /// The sequence yielded and expects to be resumed.
    Yield(Yielded<V>),
    /// The sequence finished with its return value.
    Done(R),
}

/// What a sequence produced at a yield point.
///
/// Only promises can be driven; yielding anything else fails the whole
/// coroutine with [`Failure::UnexpectedValue`] naming the produced type.
pub enum Yielded<V> {
    Promise(Promise<V>),
    Value(Payload),
}

impl<V> From<Promise<V>> for Yielded<V> {
    fn from(promise: Promise<V>) -> Self {
        Yielded::Promise(promise)
    }
}

/// What launching a coroutine function produced.
pub enum Launch<S: Steps> {
    /// A sequence to drive to completion.
    Sequence(S),
    /// A plain value; the result promise resolves with it immediately.
    Immediate(S::Return),
}

struct Driver<S: Steps> {
    inner: Mutex<DriverInner<S>>,
}

struct DriverInner<S: Steps> {
    // absent while a protocol call is running, or once the sequence finished
    steps: Option<S>,
    // the promise the sequence is suspended on, for cancellation forwarding
    current: Option<Arc<dyn CancelTarget>>,
    deferred: Option<Deferred<S::Return>>,
    live: bool,
}

enum Feed<V> {
    First,
    Send(V),
    Throw(Reason),
}

/// Drives a generator-style function to completion and returns a promise for
/// its final return value.
///
/// `f` is invoked once. Raising settles the result promise as rejected, and
/// returning [`Launch::Immediate`] settles it as resolved, both before
/// `coroutine` returns. A [`Launch::Sequence`] is advanced step by step: each
/// yielded promise is awaited, its value is sent back into the sequence, and
/// a rejection is thrown into the sequence instead, which may catch it and
/// continue. Promises that are already settled are fed back without leaving
/// the current stack.
///
/// Requesting cancellation of the result promise cancels whatever promise
/// the sequence is currently suspended on and stops driving. The sequence is
/// abandoned, not forcibly closed, and the result promise never settles.
pub fn coroutine<S, F>(f: F) -> Promise<S::Return>
where
    S: Steps + 'static,
    F: FnOnce() -> Result<Launch<S>, Reason>,
{
    let steps = match f() {
        Err(reason) => return Promise::rejected(reason),
        Ok(Launch::Immediate(value)) => return Promise::resolved(value),
        Ok(Launch::Sequence(steps)) => steps,
    };

    let driver = Arc::new(Driver {
        inner: Mutex::new(DriverInner {
            steps: Some(steps),
            current: None,
            deferred: None,
            live: true,
        }),
    });

    let cancel_driver = Arc::clone(&driver);
    let (promise, deferred) = Promise::pending_on_cancel(move || {
        let current = {
            let mut inner = cancel_driver.inner.lock();
            inner.live = false;
            // dropping the deferred abandons the result for good
            inner.deferred = None;
            inner.current.take()
        };
        if let Some(current) = current {
            current.request_cancel();
        }
    });

    driver.inner.lock().deferred = Some(deferred);
    drive(&driver, Feed::First);

    promise
}

fn drive<S>(driver: &Arc<Driver<S>>, first: Feed<S::Item>)
where
    S: Steps + 'static,
{
    let mut steps = {
        let mut inner = driver.inner.lock();
        if !inner.live {
            return;
        }
        match inner.steps.take() {
            Some(steps) => steps,
            None => return,
        }
    };
    let mut feed = first;

    loop {
        // protocol calls run with the driver unlocked; the sequence may
        // settle promises or start coroutines of its own
        let result = match feed {
            Feed::First => steps.advance(),
            Feed::Send(value) => steps.send(value),
            Feed::Throw(reason) => steps.throw_into(reason),
        };

        let yielded = match result {
            Err(reason) => {
                settle(driver, Err(reason));
                return;
            }
            Ok(Step::Done(value)) => {
                settle(driver, Ok(value));
                return;
            }
            Ok(Step::Yield(Yielded::Value(payload))) => {
                settle(driver, Err(Failure::UnexpectedValue(payload).into()));
                return;
            }
            Ok(Step::Yield(Yielded::Promise(promise))) => promise,
        };

        if let Some(outcome) = yielded.settled() {
            // already settled: keep driving on this stack
            feed = match outcome {
                Ok(value) => Feed::Send(value),
                Err(reason) => Feed::Throw(reason),
            };
            continue;
        }

        {
            let mut inner = driver.inner.lock();
            if !inner.live {
                // canceled during the last protocol call; the sequence
                // stays wherever it stopped
                return;
            }
            inner.steps = Some(steps);
            inner.current = Some(Arc::new(yielded.clone()));
        }

        let continuation = Arc::clone(driver);
        yielded.subscribe(move |outcome| {
            {
                let mut inner = continuation.inner.lock();
                if !inner.live {
                    return;
                }
                inner.current = None;
            }
            let feed = match outcome {
                Ok(value) => Feed::Send(value),
                Err(reason) => Feed::Throw(reason),
            };
            drive(&continuation, feed);
        });
        return;
    }
}

fn settle<S>(driver: &Arc<Driver<S>>, outcome: Outcome<S::Return>)
where
    S: Steps,
{
    let deferred = {
        let mut inner = driver.inner.lock();
        inner.live = false;
        inner.current = None;
        inner.deferred.take()
    };
    // settle with the driver unlocked; subscribers run arbitrary code
    if let Some(deferred) = deferred {
        match outcome {
            Ok(value) => deferred.resolve(value),
            Err(reason) => deferred.reject(reason),
        }
    }
}
