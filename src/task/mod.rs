//! The task type and its completion accounting.
//!
//! A [`Task`] is the unit of work in the library. It bundles a payload with a
//! reference count that tracks outstanding work (the payload itself plus any
//! children spawned under it), an optional parent backlink, an optional
//! continuation, and a thread-affinity tag.
//!
//! The reference count starts at 1 (the task's own pending payload). Spawning
//! a child adds one count on the parent; the child removes it when it
//! completes. A task therefore reaches zero only once its payload and every
//! descendant have returned, at which point its continuation (if any) is
//! handed back to the scheduler and all waiters are woken.

use crate::runtime::dispatcher::Handle;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub mod id;
pub use id::{TaskId, WorkerId};

/// Thread-affinity tag for a task.
///
/// Tasks with [`Affinity::Main`] are only ever processed on the main thread,
/// inside `process_main`. Everything else may run on any stealable worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    Main,
    None,
}

type Payload = Box<dyn FnOnce() + Send + 'static>;

/// A unit of work to be dispatched onto the worker pool.
///
/// Tasks are shared through `Arc` and mutated only through interior
/// synchronization, so they can move freely between the submitting thread,
/// the owning worker, and thieves.
pub struct Task {
    id: TaskId,

    /// Outstanding-work count: 1 for the pending payload plus 1 per
    /// still-running child. Strictly decreasing once it hits zero.
    refcount: AtomicUsize,

    /// Backlink to the task that spawned this one. Only the refcount of the
    /// parent is ever touched through this link.
    parent: Mutex<Option<Arc<Task>>>,

    /// Forward link scheduled when the refcount reaches zero.
    continuation: Mutex<Option<Arc<Task>>>,

    affinity: Mutex<Affinity>,

    /// Taken exactly once, by the worker that processes the task.
    payload: Mutex<Option<Payload>>,

    completed: Mutex<bool>,
    completion: Condvar,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("refcount", &self.refcount)
            .field("affinity", &*self.affinity.lock())
            .finish_non_exhaustive()
    }
}

/// Creates a task from a callable, discarding its result.
pub fn from_fn<F>(f: F) -> Arc<Task>
where
    F: FnOnce() + Send + 'static,
{
    Arc::new(Task::new(Box::new(f)))
}

/// Creates a task from a callable, storing its result into `out`.
///
/// The cell is written before the task's own completion accounting runs, so a
/// return from [`Task::wait`] is guaranteed to observe the stored value.
pub fn returning<F, R>(f: F, out: &ResultCell<R>) -> Arc<Task>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let cell = out.clone();
    from_fn(move || cell.set(f()))
}

impl Task {
    fn new(payload: Payload) -> Self {
        Self {
            id: TaskId::next(),
            refcount: AtomicUsize::new(1),
            parent: Mutex::new(None),
            continuation: Mutex::new(None),
            affinity: Mutex::new(Affinity::None),
            payload: Mutex::new(Some(payload)),
            completed: Mutex::new(false),
            completion: Condvar::new(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    pub fn parent(&self) -> Option<Arc<Task>> {
        self.parent.lock().clone()
    }

    pub fn continuation(&self) -> Option<Arc<Task>> {
        self.continuation.lock().clone()
    }

    pub fn affinity(&self) -> Affinity {
        *self.affinity.lock()
    }

    /// Stores the parent backlink. The caller is responsible for incrementing
    /// the parent's refcount *before* making this task reachable to any
    /// worker; the dispatcher's spawn path does both in the right order.
    pub fn set_parent(&self, parent: Arc<Task>) {
        *self.parent.lock() = Some(parent);
    }

    /// Stores the forward link and returns it, so chains compose:
    ///
    /// ```ignore
    /// first.set_continuation(second).set_continuation(third);
    /// ```
    pub fn set_continuation(&self, continuation: Arc<Task>) -> Arc<Task> {
        *self.continuation.lock() = Some(continuation.clone());
        continuation
    }

    /// Stores the affinity tag. Ignored once the task has been submitted.
    pub fn set_affinity(&self, affinity: Affinity) {
        *self.affinity.lock() = affinity;
    }

    /// Blocks the calling thread until the refcount reaches zero.
    ///
    /// Waiting from inside a task body is not advised, as it parks the worker
    /// instead of letting it process other tasks in the meantime.
    pub fn wait(&self) {
        let mut completed = self.completed.lock();
        while !*completed {
            self.completion.wait(&mut completed);
        }
    }

    /// Adds one outstanding-work count. Used when spawning children, to keep
    /// the parent pending until the child finishes.
    pub fn increment_refcount(&self) {
        let prev = self.refcount.fetch_add(1, Ordering::Relaxed);
        debug_assert!(prev > 0, "refcount resurrected after completion");
    }

    /// Removes one outstanding-work count. On the transition to zero the
    /// continuation (if any) is pushed to the front of the deque of whichever
    /// worker drove this decrement, and all waiters are woken.
    pub(crate) fn decrement_refcount(&self, dispatcher: &Handle) {
        let prev = self.refcount.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "refcount underflow");

        if prev == 1 {
            if let Some(continuation) = self.continuation.lock().clone() {
                dispatcher.push_task(continuation);
            }

            // The flag write is ordered under the mutex so a waiter either
            // observes it or is already parked on the condvar.
            let mut completed = self.completed.lock();
            *completed = true;
            drop(completed);
            self.completion.notify_all();
        }
    }

    /// Executes the payload, then removes this task's count from its parent
    /// (possibly completing the parent), and finally removes its own.
    pub(crate) fn process(&self, dispatcher: &Handle) {
        let payload = self.payload.lock().take();
        if let Some(payload) = payload {
            payload();
        }

        let parent = self.parent.lock().clone();
        if let Some(parent) = parent {
            parent.decrement_refcount(dispatcher);
        }

        self.decrement_refcount(dispatcher);
    }
}

/// A shared out-slot for capturing a task payload's return value.
///
/// Cloning is shallow; all clones observe the same slot.
#[derive(Debug)]
pub struct ResultCell<R>(Arc<Mutex<Option<R>>>);

impl<R> ResultCell<R> {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(None)))
    }

    /// Takes the stored value, leaving the cell empty.
    pub fn take(&self) -> Option<R> {
        self.0.lock().take()
    }

    fn set(&self, value: R) {
        *self.0.lock() = Some(value);
    }
}

impl<R> Default for ResultCell<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for ResultCell<R> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
