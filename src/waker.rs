use std::task::{Context, RawWaker, RawWakerVTable, Waker};

use crate::task::TaskContext;

pub(crate) struct TaskData {
    pub(crate) context: TaskContext,
    original: Waker,
}

pub(crate) unsafe fn task_data<'c, 'w>(cx: &'c mut Context<'w>) -> Option<&'w TaskData> {
    let waker = cx.waker();

    if waker.vtable() != &VTABLE {
        // polled under a foreign waker
        // no logical task is running here
        None
    } else {
        let data_ref = &*waker.data().cast::<TaskData>();
        Some(data_ref)
    }
}

pub(crate) unsafe fn task_waker(context: TaskContext, original: Waker) -> Waker {
    Waker::from_raw(raw_waker(context, original))
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, wake, wake_by_ref, drop);

fn raw_waker(context: TaskContext, original: Waker) -> RawWaker {
    let data = Box::into_raw(Box::new(TaskData { context, original }));

    RawWaker::new(data.cast(), &VTABLE)
}

unsafe fn clone(data: *const ()) -> RawWaker {
    let data_ref = &*data.cast::<TaskData>();
    raw_waker(data_ref.context.clone(), data_ref.original.clone())
}

unsafe fn wake(data: *const ()) {
    let data = Box::from_raw(data.cast::<TaskData>() as *mut TaskData);
    data.original.wake();
}

unsafe fn wake_by_ref(data: *const ()) {
    let data_ref = &*data.cast::<TaskData>();
    data_ref.original.wake_by_ref();
}

unsafe fn drop(data: *const ()) {
    Box::from_raw(data.cast::<TaskData>() as *mut TaskData);
}
