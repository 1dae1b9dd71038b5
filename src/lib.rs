//! An in-process fork/join task scheduler with work stealing.
//!
//! Tasks are created from callables, submitted onto a pool of worker threads,
//! and composed through parent/child spawning and continuation links. Load is
//! balanced at submission by a pluggable placement policy and rebalanced
//! dynamically by work stealing. Tasks tagged with main-thread affinity drain
//! through a dedicated lane driven by [`process_main`].
//!
//! The scheduler is a process-wide singleton. Configure it, initialize it
//! from the main thread, then submit freely from any thread:
//!
//! ```no_run
//! let out = taskling::task::ResultCell::new();
//! let task = taskling::task::returning(|| 2 + 2, &out);
//!
//! taskling::set_worker_count(2);
//! taskling::initialize();
//!
//! taskling::submit(task.clone()).unwrap();
//! task.wait();
//! assert_eq!(out.take(), Some(4));
//!
//! taskling::shutdown().unwrap();
//! ```

use std::sync::Arc;
use std::sync::LazyLock;

pub mod error;
pub use error::DispatchError;

pub mod runtime;
pub use runtime::{LeastLoaded, Placement, Random, RoundRobin, Worker};

pub mod task;
pub use task::{Affinity, ResultCell, Task, TaskId};

pub(crate) mod utils;

use runtime::dispatcher::{Dispatcher, Handle};

/// The process-wide dispatcher, constructed lazily at first use.
fn global() -> &'static Handle {
    static GLOBAL: LazyLock<Handle> = LazyLock::new(|| Dispatcher::new().into_handle());
    &GLOBAL
}

/// Sets the placement policy consulted at submission time. Effective only
/// before [`initialize`]; a silent no-op afterwards.
///
/// Defaults to [`LeastLoaded`].
pub fn set_placement<P>(placement: P)
where
    P: Placement + 'static,
{
    global().set_placement(Arc::new(placement));
}

/// Returns the configured placement policy.
pub fn placement() -> Arc<dyn Placement> {
    global().placement()
}

/// Sets the number of stealable worker threads created by [`initialize`].
/// Effective only before [`initialize`]; a silent no-op afterwards.
///
/// Defaults to the available parallelism of the machine.
pub fn set_worker_count(count: usize) {
    global().set_worker_count(count);
}

/// Returns the configured number of stealable workers.
pub fn worker_count() -> usize {
    global().worker_count()
}

/// Sets the name generator for scheduler threads: index 0 names the main
/// lane, indices 1 and up name the stealable workers. Effective only before
/// [`initialize`].
pub fn set_thread_name<F>(f: F)
where
    F: Fn(usize) -> String + Send + Sync + 'static,
{
    global().set_thread_name(f);
}

/// Sets the stack size for worker threads. Effective only before
/// [`initialize`].
pub fn set_thread_stack_size(bytes: usize) {
    global().set_thread_stack_size(bytes);
}

/// Starts the scheduler: records the calling thread as the main thread and
/// spins up the worker pool.
///
/// Must be called from the main thread before any scheduling operation.
/// Repeated calls are ineffective and leave the worker set unchanged.
pub fn initialize() {
    global().initialize();
}

/// Returns true once [`initialize`] has completed.
pub fn initialized() -> bool {
    global().initialized()
}

/// Stops all stealable workers and blocks until their threads have joined.
/// Safe to call repeatedly. Call before process exit.
pub fn shutdown() -> Result<(), DispatchError> {
    global().shutdown()
}

/// Submits a task for asynchronous execution.
///
/// Tasks with [`Affinity::Main`] are queued on the main lane and run only
/// inside [`process_main`]; everything else is placed onto a stealable worker
/// by the configured policy.
pub fn submit(task: Arc<Task>) -> Result<(), DispatchError> {
    global().submit(task)
}

/// Spawns a task as a child of the currently executing task.
///
/// The parent stays pending, and its continuation deferred, until the child
/// completes. The child is pushed to the front of the calling worker's deque,
/// so it runs before previously queued work. Must be called from inside a
/// task payload.
pub fn spawn(task: Arc<Task>) -> Result<(), DispatchError> {
    global().spawn(task)
}

/// Drains the main lane on the calling thread, which must be the thread that
/// called [`initialize`]. Returns once all queued main-affinity work is done.
pub fn process_main() -> Result<(), DispatchError> {
    global().process_main()
}

/// Introspection on the currently executing task.
///
/// Every function here requires task-execution context: the calling thread
/// must be a worker currently processing a task (the main thread counts only
/// inside [`process_main`](crate::process_main)).
pub mod current {
    use super::{Arc, DispatchError, Task, global};

    /// Returns the currently executing task.
    pub fn task() -> Result<Arc<Task>, DispatchError> {
        global()
            .current_worker()?
            .current_task()
            .ok_or(DispatchError::TaskContext)
    }

    /// Returns the parent of the currently executing task, if any.
    pub fn parent() -> Result<Option<Arc<Task>>, DispatchError> {
        Ok(task()?.parent())
    }

    /// Returns the continuation of the currently executing task, if any.
    pub fn continuation() -> Result<Option<Arc<Task>>, DispatchError> {
        Ok(task()?.continuation())
    }

    /// Returns the refcount of the currently executing task.
    pub fn refcount() -> Result<usize, DispatchError> {
        Ok(task()?.refcount())
    }
}
