use parking_lot::Mutex;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use crate::promise::CancelTarget;

/// Identity of a logical task, unique for the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub(crate) struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> TaskId {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Default)]
struct TaskEntry {
    awaiting: Option<Arc<dyn CancelTarget>>,
    cancel_requested: bool,
}

#[derive(Debug)]
pub(crate) struct AlreadyAwaiting;

/// Process-wide bookkeeping for running logical tasks.
///
/// A task has an entry for its whole lifetime; `awaiting` is populated
/// exactly while the task is suspended on a promise. The table never settles
/// a promise itself. Cancellation requests are forwarded to the recorded
/// target, and a nested task is reached through that target's own
/// cancellation hook, so cascading needs no knowledge of what the target is.
pub(crate) struct Registry {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl Registry {
    fn new() -> Registry {
        Registry {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    /// Adds a task to the table when its startable is invoked.
    pub(crate) fn enroll(&self, id: TaskId) {
        self.tasks.lock().insert(id, TaskEntry::default());
    }

    /// Drops every trace of a finished task.
    pub(crate) fn retire(&self, id: TaskId) {
        self.tasks.lock().remove(&id);
    }

    /// Records that `id` is suspended on `target`.
    ///
    /// A task suspends on at most one promise at a time; a second
    /// registration without an intervening settlement is refused. A
    /// cancellation that arrived while the task was running is forwarded to
    /// `target` here, so the request reaches whatever the task suspends on
    /// next.
    pub(crate) fn register(
        &self,
        id: TaskId,
        target: Arc<dyn CancelTarget>,
    ) -> Result<(), AlreadyAwaiting> {
        let forward = {
            let mut tasks = self.tasks.lock();
            let entry = tasks.entry(id).or_default();
            if entry.awaiting.is_some() {
                return Err(AlreadyAwaiting);
            }
            entry.awaiting = Some(target.clone());
            entry.cancel_requested
        };

        // Forwarding runs unlocked: the target's hook may reenter the table.
        if forward {
            target.request_cancel();
        }
        Ok(())
    }

    /// Clears the suspension record; no-op when `id` is not suspended.
    pub(crate) fn unregister(&self, id: TaskId) {
        if let Some(entry) = self.tasks.lock().get_mut(&id) {
            entry.awaiting = None;
        }
    }

    /// The promise `id` is currently suspended on, if any.
    pub(crate) fn current_target(&self, id: TaskId) -> Option<Arc<dyn CancelTarget>> {
        self.tasks
            .lock()
            .get(&id)
            .and_then(|entry| entry.awaiting.clone())
    }

    pub(crate) fn cancel_requested(&self, id: TaskId) -> bool {
        self.tasks
            .lock()
            .get(&id)
            .map_or(false, |entry| entry.cancel_requested)
    }

    /// Marks `id` as cancelled and forwards the request to its current
    /// suspension. Idempotent; a no-op for finished or unknown tasks.
    pub(crate) fn request_cancel(&self, id: TaskId) {
        let target = {
            let mut tasks = self.tasks.lock();
            match tasks.get_mut(&id) {
                Some(entry) if !entry.cancel_requested => {
                    entry.cancel_requested = true;
                    entry.awaiting.clone()
                }
                _ => return,
            }
        };

        if let Some(target) = target {
            target.request_cancel();
        }
    }
}
