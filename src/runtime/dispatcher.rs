//! Central dispatch: owns the worker set, routes submissions through the
//! placement policy, and resolves the calling thread to its worker.

use crate::error::DispatchError;
use crate::runtime::policy::{LeastLoaded, Placement};
use crate::runtime::worker::Worker;
use crate::task::{Affinity, Task};
use crate::utils::ScopeGuard;
use crate::utils::thread::set_current_thread_name;
use anyhow::{Result, anyhow};
use parking_lot::Mutex;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, OnceLock};
use std::thread::{self, ThreadId};
use tracing::{debug, trace, warn};

#[cfg(test)]
use crate::utils::scheduler::{Call, Method, Tracker};

/// Name generator for worker threads. Index 0 is the main worker's thread.
#[derive(Clone)]
pub(crate) struct ThreadNameFn(Arc<dyn Fn(usize) -> String + Send + Sync + 'static>);

impl ThreadNameFn {
    pub(crate) fn name(&self, index: usize) -> String {
        (self.0)(index)
    }
}

impl Default for ThreadNameFn {
    fn default() -> Self {
        ThreadNameFn(Arc::new(|index| format!("taskling-{index}")))
    }
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configuration consumed at initialization. Setters are accepted only while
/// the dispatcher is unconfigured; afterwards they are silent no-ops.
#[derive(Debug, Clone)]
pub(crate) struct DispatchConfig {
    /// Initial-placement policy for submissions without main affinity.
    pub(crate) placement: Arc<dyn Placement>,

    /// Number of stealable workers to start. The main worker is extra.
    pub(crate) worker_count: usize,

    pub(crate) thread_name: ThreadNameFn,

    /// Stack size for worker threads; platform default when unset.
    pub(crate) thread_stack_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            placement: Arc::new(LeastLoaded),
            worker_count: thread::available_parallelism().map_or(1, |n| n.get()),
            thread_name: ThreadNameFn::default(),
            thread_stack_size: None,
        }
    }
}

/// The worker list, fixed at initialization: main worker at index 0, the
/// stealable pool at indices 1 and up. Never resized afterwards, so readers
/// take no lock.
#[derive(Debug)]
pub(crate) struct WorkerSet {
    workers: Vec<Arc<Worker>>,
    main_thread_id: ThreadId,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerSet {
    fn new(dispatcher: &Handle) -> Self {
        let cfg = dispatcher.config.lock().clone();

        // The initializing thread is the main lane.
        set_current_thread_name(&cfg.thread_name.name(0));

        let mut workers = vec![Arc::new(Worker::new_main())];
        for _ in 0..cfg.worker_count {
            workers.push(Arc::new(Worker::new_stealable()));
        }

        // Spawning threads is async; the barrier holds initialization back
        // until every worker has recorded its thread id.
        let barrier = Arc::new(Barrier::new(cfg.worker_count + 1));

        let handles = workers
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, worker)| {
                spawn_worker_thread(dispatcher.clone(), worker.clone(), barrier.clone(), &cfg, index)
            })
            .collect::<Vec<_>>();

        barrier.wait();

        debug!(worker_count = cfg.worker_count, "worker set started");

        Self {
            workers,
            main_thread_id: thread::current().id(),
            handles: Mutex::new(handles),
        }
    }

    pub(crate) fn main(&self) -> &Arc<Worker> {
        &self.workers[0]
    }

    pub(crate) fn stealable(&self) -> &[Arc<Worker>] {
        &self.workers[1..]
    }

    fn join_all(&self) -> Result<()> {
        let handles = self.handles.lock().drain(..).collect::<Vec<_>>();

        let panicked = handles
            .into_iter()
            .map(|handle| handle.join().is_err())
            .filter(|panicked| *panicked)
            .count();

        if panicked == 0 {
            Ok(())
        } else {
            Err(anyhow!("{} worker thread(s) panicked", panicked))
        }
    }
}

fn spawn_worker_thread(
    dispatcher: Handle,
    worker: Arc<Worker>,
    barrier: Arc<Barrier>,
    cfg: &DispatchConfig,
    index: usize,
) -> thread::JoinHandle<()> {
    let mut builder = thread::Builder::new().name(cfg.thread_name.name(index));

    if let Some(stack_size) = cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder
        .spawn(move || {
            worker.bind_current_thread();
            barrier.wait();

            // The worker set is being built while this thread starts; block
            // until it is published before touching dispatcher state.
            dispatcher.wait_for_workers();
            worker.run(&dispatcher);
        })
        .expect("failed to spawn worker thread")
}

/// Process-wide coordinator for the worker set.
///
/// Constructed unconfigured; transitions once to initialized when
/// [`Handle::initialize`] creates and starts the workers, and once to shut
/// down when [`Handle::shutdown`] stops and joins them.
#[derive(Debug)]
pub struct Dispatcher {
    config: Mutex<DispatchConfig>,

    /// Doubles as the initialization latch: configuration setters are
    /// ineffective once this is populated.
    workers: OnceLock<WorkerSet>,

    /// Set while the main thread is draining the main lane; the main worker
    /// resolves as the current worker only in that window.
    main_processing: AtomicBool,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            config: Mutex::new(DispatchConfig::default()),
            workers: OnceLock::new(),
            main_processing: AtomicBool::new(false),

            #[cfg(test)]
            tracker: Tracker::new(),
        }
    }

    pub(crate) fn into_handle(self) -> Handle {
        Handle(Arc::new(self))
    }

    #[cfg(test)]
    pub(crate) fn track(&self, method: Method, call: Call) {
        self.tracker.record(method, call);
    }
}

/// Destruction doubles as shutdown: a dispatcher dropped without an explicit
/// [`Handle::shutdown`] still stops and joins whatever worker threads remain.
impl Drop for Dispatcher {
    fn drop(&mut self) {
        let Some(set) = self.workers.get() else {
            return;
        };

        for worker in set.stealable() {
            worker.stop();
        }

        if let Err(e) = set.join_all() {
            warn!("shutdown on drop joined with errors: {e:#}");
        }
    }
}

/// Cloneable reference to a dispatcher, shared with every worker thread.
#[derive(Debug, Clone)]
pub struct Handle(Arc<Dispatcher>);

impl Handle {
    /// Replaces the placement policy. Effective only before initialization.
    pub(crate) fn set_placement(&self, placement: Arc<dyn Placement>) {
        if self.workers.get().is_some() {
            return;
        }
        self.config.lock().placement = placement;
    }

    pub(crate) fn placement(&self) -> Arc<dyn Placement> {
        self.config.lock().placement.clone()
    }

    /// Sets the number of stealable workers to start. Effective only before
    /// initialization.
    pub(crate) fn set_worker_count(&self, count: usize) {
        if self.workers.get().is_some() {
            return;
        }
        self.config.lock().worker_count = count;
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.config.lock().worker_count
    }

    /// Sets the worker-thread name generator. Effective only before
    /// initialization.
    pub(crate) fn set_thread_name<F>(&self, f: F)
    where
        F: Fn(usize) -> String + Send + Sync + 'static,
    {
        if self.workers.get().is_some() {
            return;
        }
        self.config.lock().thread_name = ThreadNameFn(Arc::new(f));
    }

    /// Sets the stack size for worker threads. Effective only before
    /// initialization.
    pub(crate) fn set_thread_stack_size(&self, bytes: usize) {
        if self.workers.get().is_some() {
            return;
        }
        self.config.lock().thread_stack_size = Some(bytes);
    }

    /// Creates and starts the workers, recording the calling thread as the
    /// main thread. One-shot; repeated calls leave the worker set unchanged.
    pub(crate) fn initialize(&self) {
        self.workers.get_or_init(|| WorkerSet::new(self));
    }

    pub(crate) fn initialized(&self) -> bool {
        self.workers.get().is_some()
    }

    fn worker_set(&self) -> Result<&WorkerSet, DispatchError> {
        self.workers.get().ok_or(DispatchError::Uninitialized)
    }

    pub(super) fn wait_for_workers(&self) {
        let _ = self.workers.wait();
    }

    /// Signals every stealable worker to stop once drained, then joins their
    /// threads. Safe to call repeatedly; joined threads are not re-joined.
    /// The main worker needs no signalling, its stop flag is set from birth.
    pub(crate) fn shutdown(&self) -> Result<(), DispatchError> {
        let set = self.worker_set()?;

        for worker in set.stealable() {
            worker.stop();
        }

        if let Err(e) = set.join_all() {
            warn!("shutdown joined with errors: {e:#}");
        }

        debug!("dispatcher shut down");
        Ok(())
    }

    /// Places a task for execution: the main lane for main-affinity tasks,
    /// otherwise the back of the worker chosen by the placement policy.
    pub(crate) fn submit(&self, task: Arc<Task>) -> Result<(), DispatchError> {
        let set = self.worker_set()?;

        let worker = if task.affinity() == Affinity::Main {
            set.main()
        } else {
            // Snapshot the policy so selection runs under no lock.
            let placement = self.placement();
            placement
                .select(set.stealable())
                .ok_or(DispatchError::Placement)?
        };

        trace!(task_id = %task.id(), worker_id = ?worker.id(), "task submitted");

        #[cfg(test)]
        self.track(
            Method::Submit,
            Call::Submit {
                id: task.id(),
                worker: worker.id(),
            },
        );

        worker.submit(task);
        Ok(())
    }

    /// Spawns `task` as a child of the currently executing task: the parent
    /// gains one outstanding-work count before the child becomes reachable,
    /// and the child jumps to the front of the calling worker's deque.
    pub(crate) fn spawn(&self, task: Arc<Task>) -> Result<(), DispatchError> {
        let worker = self.current_worker()?;
        let parent = worker.current_task().ok_or(DispatchError::TaskContext)?;

        parent.increment_refcount();
        task.set_parent(parent);

        trace!(task_id = %task.id(), worker_id = ?worker.id(), "task spawned");

        #[cfg(test)]
        self.track(
            Method::Spawn,
            Call::Spawn {
                id: task.id(),
                worker: worker.id(),
            },
        );

        worker.push(task);
        Ok(())
    }

    /// Drains the main lane on the calling thread, which must be the thread
    /// that initialized the dispatcher. Returns once the main worker's deque
    /// is empty.
    pub(crate) fn process_main(&self) -> Result<(), DispatchError> {
        let set = self.worker_set()?;

        if thread::current().id() != set.main_thread_id {
            return Err(DispatchError::WrongThread);
        }

        self.main_processing.store(true, Ordering::Release);
        let _guard = ScopeGuard::new(|| self.main_processing.store(false, Ordering::Release));

        set.main().run(self);
        Ok(())
    }

    /// Resolves the calling thread to its worker.
    ///
    /// The main worker resolves only while the main-processing flag is set;
    /// anywhere else, a thread without a worker is outside task-execution
    /// context.
    pub(crate) fn current_worker(&self) -> Result<Arc<Worker>, DispatchError> {
        let set = self.worker_set()?;
        let thread_id = thread::current().id();

        let index = set
            .workers
            .iter()
            .position(|worker| worker.thread_id() == Some(thread_id))
            .ok_or(DispatchError::TaskContext)?;

        if index == 0 && !self.main_processing.load(Ordering::Acquire) {
            return Err(DispatchError::TaskContext);
        }

        Ok(set.workers[index].clone())
    }

    /// Picks a random stealable worker to steal from. May return the caller
    /// itself; the steal loop skips that case.
    pub(crate) fn choose_victim(&self) -> Arc<Worker> {
        let stealable = self
            .workers
            .get()
            .expect("dispatcher not initialized")
            .stealable();

        stealable[fastrand::usize(..stealable.len())].clone()
    }

    /// Pushes a task to the front of the calling worker's deque. Used when a
    /// completing task publishes its continuation, which by construction
    /// happens on a worker thread.
    pub(crate) fn push_task(&self, task: Arc<Task>) {
        let worker = self
            .current_worker()
            .expect("continuation published outside task execution");

        trace!(task_id = %task.id(), worker_id = ?worker.id(), "continuation pushed");

        #[cfg(test)]
        self.track(
            Method::PushTask,
            Call::PushTask {
                id: task.id(),
                worker: worker.id(),
            },
        );

        worker.push(task);
    }
}

#[doc(hidden)]
impl Deref for Handle {
    type Target = Arc<Dispatcher>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
