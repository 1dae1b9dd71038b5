//! Worker threads and the steal loop.

use crate::runtime::dispatcher::Handle;
use crate::task::{Task, WorkerId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tracing::trace;

#[cfg(test)]
use crate::utils::scheduler::{Call, Method};

/// CPU concession before a steal attempt when the local deque is empty. A
/// tuning knob, not part of the scheduling contract.
const STEAL_BACKOFF: Duration = Duration::from_micros(1);

type Deque = VecDeque<Arc<Task>>;

/// An execution vehicle with a private deque of pending tasks.
///
/// Stealable workers own a thread running [`Worker::run`] until stopped. The
/// main worker owns no thread; it is driven synchronously from the main
/// thread and is created with the stop flag already set, so its loop drains
/// the deque and returns.
#[derive(Debug)]
pub struct Worker {
    /// Stable identity; also the key of the total lock order used when two
    /// deque mutexes must be held at once.
    id: WorkerId,

    /// False only for the main worker, which never steals and is never
    /// offered to the placement policy.
    stealable: bool,

    stop: AtomicBool,

    /// Front is shared by owner takes and thief steals; the back is touched
    /// only by external submission. Deliberately a symmetric mutex-guarded
    /// deque rather than an owner/thief split; submissions are observed only
    /// after local and stolen work drains, and spawned work runs before
    /// previously submitted work on the same worker.
    deque: Mutex<Deque>,

    /// Task being executed, valid between take and completion.
    current: Mutex<Option<Arc<Task>>>,

    /// Fixed at thread start (at construction for the main worker).
    thread_id: std::sync::OnceLock<ThreadId>,
}

impl Worker {
    pub(crate) fn new_stealable() -> Self {
        Self {
            id: WorkerId::next(),
            stealable: true,
            stop: AtomicBool::new(false),
            deque: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            thread_id: std::sync::OnceLock::new(),
        }
    }

    /// The main worker does not manage a thread of execution. It is never
    /// started, stopped or joined, and only processes tasks when its loop is
    /// driven explicitly from the main thread. Its stop flag is set from
    /// birth, so the loop returns as soon as the deque drains.
    pub(crate) fn new_main() -> Self {
        let worker = Self {
            id: WorkerId::next(),
            stealable: false,
            stop: AtomicBool::new(true),
            deque: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            thread_id: std::sync::OnceLock::new(),
        };
        worker.bind_current_thread();
        worker
    }

    /// Records the calling thread as this worker's thread. Called once, from
    /// the worker's own thread before it enters the run loop.
    pub(crate) fn bind_current_thread(&self) {
        self.thread_id
            .set(thread::current().id())
            .expect("worker already bound to a thread");
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub(crate) fn is_stealable(&self) -> bool {
        self.stealable
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id.get().copied()
    }

    pub(crate) fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Number of tasks currently queued on this worker. Racy by nature; used
    /// as a load heuristic by placement policies.
    pub fn task_count(&self) -> usize {
        self.deque.lock().len()
    }

    pub(crate) fn current_task(&self) -> Option<Arc<Task>> {
        self.current.lock().clone()
    }

    /// Pushes to the back of the deque. Used by the dispatcher for new
    /// top-level work, so submissions keep their relative order.
    pub(crate) fn submit(&self, task: Arc<Task>) {
        self.deque.lock().push_back(task);
    }

    /// Pushes to the front of the deque. Used only on the owning worker, for
    /// spawned children and published continuations, so freshly produced
    /// dependents run next (LIFO locality).
    pub(crate) fn push(&self, task: Arc<Task>) {
        self.deque.lock().push_front(task);
    }

    /// Locks this worker's deque and `other`'s in the order of their worker
    /// ids, so two workers stealing from each other at the same time cannot
    /// deadlock. Callers must not pass `other == self`.
    fn lock_in_order<'a>(
        &'a self,
        other: &'a Worker,
    ) -> (MutexGuard<'a, Deque>, MutexGuard<'a, Deque>) {
        debug_assert!(self.id != other.id, "worker cannot lock itself twice");

        if self.id < other.id {
            let mine = self.deque.lock();
            let theirs = other.deque.lock();
            (mine, theirs)
        } else {
            let theirs = other.deque.lock();
            let mine = self.deque.lock();
            (mine, theirs)
        }
    }

    /// The worker's main loop.
    ///
    /// Repeatedly takes from the front of the local deque and processes. When
    /// the deque is empty: a stopped worker exits, the main worker spins back
    /// to the pop (its stop flag is always set, so in practice it exits), and
    /// a stealable worker backs off briefly and then tries to take the front
    /// of a randomly chosen victim's deque.
    pub(crate) fn run(&self, dispatcher: &Handle) {
        loop {
            // The pop is the emptiness check; it happens under the lock, so
            // the shutdown drain cannot miss a concurrently submitted task.
            let task = self.deque.lock().pop_front();

            if let Some(task) = task {
                self.process(task, dispatcher);
                continue;
            }

            if self.stop.load(Ordering::Acquire) {
                break;
            }

            if !self.stealable {
                continue;
            }

            // Yield CPU time to others before going after their work.
            thread::yield_now();
            thread::sleep(STEAL_BACKOFF);

            let victim = dispatcher.choose_victim();
            if victim.id == self.id {
                continue;
            }

            let stolen = {
                let (_mine, mut theirs) = self.lock_in_order(&victim);
                theirs.pop_front()
            };

            if let Some(task) = stolen {
                trace!(task_id = %task.id(), thief = ?self.id, victim = ?victim.id, "stole task");

                #[cfg(test)]
                dispatcher.track(
                    Method::Steal,
                    Call::Steal {
                        id: task.id(),
                        thief: self.id,
                        victim: victim.id,
                    },
                );

                self.process(task, dispatcher);
            }
        }
    }

    fn process(&self, task: Arc<Task>, dispatcher: &Handle) {
        trace!(task_id = %task.id(), worker_id = ?self.id, "executing task");

        *self.current.lock() = Some(task.clone());
        task.process(dispatcher);
        *self.current.lock() = None;
    }
}
