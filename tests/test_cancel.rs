use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use task_bridge::{spawn, wait, Failure, Promise, Reason};

fn failure_of<T>(promise: &Promise<T>) -> Failure
where
    T: Clone + Send + std::fmt::Debug + 'static,
{
    match promise.settled() {
        Some(Err(Reason::Failure(failure))) => failure,
        other => panic!("expected a failed settlement, got {:?}", other),
    }
}

#[test]
fn test_cancel_cascades_to_the_leaf_producer() {
    let leaf_canceled = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&leaf_canceled);
    let (leaf, leaf_deferred) = Promise::<u32>::pending_on_cancel(move || {
        flag.store(true, Ordering::SeqCst);
    });

    let inner = spawn(async move { wait(&leaf).await });
    let inner_handle = inner.clone();
    let outer = spawn(async move { wait(&inner_handle).await });

    outer.request_cancel();

    // the request ran down through both suspended tasks to the producer
    assert!(leaf_canceled.load(Ordering::SeqCst));
    assert!(outer.settled().is_none());

    // the producer honors it in its own time; the failure unwinds back up
    leaf_deferred.reject(Failure::Canceled);

    assert!(matches!(failure_of(&inner), Failure::Canceled));
    assert!(matches!(failure_of(&outer), Failure::Canceled));
}

#[test]
fn test_cancel_is_advisory_until_the_producer_acts() {
    let requests = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&requests);
    let (leaf, deferred) = Promise::<u32>::pending_on_cancel(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let outer = spawn(async move { wait(&leaf).await });
    outer.request_cancel();

    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert!(outer.settled().is_none());

    // the producer decides to finish normally instead
    deferred.resolve(3);

    assert_eq!(outer.settled().unwrap().unwrap(), 3);
}

#[test]
fn test_pending_cancellation_reaches_the_next_suspension() {
    let (first, first_deferred) = Promise::<u32>::pending();

    let second_hooked = Arc::new(AtomicBool::new(false));
    let hook = Arc::clone(&second_hooked);
    let (second, second_deferred) = Promise::<u32>::pending_on_cancel(move || {
        hook.store(true, Ordering::SeqCst);
    });

    let outer = spawn(async move {
        let a = wait(&first).await?;
        let b = wait(&second).await?;
        Ok::<_, Failure>(a + b)
    });

    // first's producer has no hook; the request goes nowhere for now
    outer.request_cancel();
    assert!(!second_hooked.load(Ordering::SeqCst));

    first_deferred.resolve(1);

    // suspending again forwards the standing request to the new producer
    assert!(second_hooked.load(Ordering::SeqCst));

    second_deferred.reject(Failure::Canceled);
    assert!(matches!(failure_of(&outer), Failure::Canceled));
}

#[test]
fn test_cancel_after_settlement_is_a_no_op() {
    let hooked = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&hooked);
    let (leaf, deferred) = Promise::<u32>::pending_on_cancel(move || {
        flag.store(true, Ordering::SeqCst);
    });

    let outer = spawn(async move { wait(&leaf).await });
    deferred.resolve(8);
    assert_eq!(outer.settled().unwrap().unwrap(), 8);

    outer.request_cancel();

    assert!(!hooked.load(Ordering::SeqCst));
}

#[test]
fn test_a_task_may_catch_the_injected_failure() {
    let (leaf, deferred) = Promise::<u32>::pending();

    let outer = spawn(async move {
        match wait(&leaf).await {
            Ok(value) => Ok(value),
            Err(failure) if failure.is_canceled() => Ok(0),
            Err(failure) => Err(failure),
        }
    });

    deferred.reject(Failure::Canceled);

    // cancellation is a failure like any other; the task ran to completion
    assert_eq!(outer.settled().unwrap().unwrap(), 0);
}
