use std::fmt;
use std::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a task relative to all other tasks
/// created by this process.
///
/// IDs are assigned from a process-wide counter at construction, so they are
/// monotonically increasing in allocation order and are never re-used.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct TaskId(NonZeroU64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        // Safety: this number is unimaginably large, even if the process was
        // creating 1 billion tasks/sec, it would take 584 years to wrap around.
        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique task ID: bitspace exhausted")
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Stable per-worker sequence number.
///
/// Worker identities form a total order which the steal path uses to acquire
/// two deque mutexes in a consistent direction. We do not use
/// `std::thread::ThreadId` for this because the main worker exists before any
/// worker thread does, and because the order must be fixed at construction
/// rather than at thread start.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug)]
pub struct WorkerId(NonZeroU32);

impl WorkerId {
    pub(crate) fn next() -> WorkerId {
        static COUNTER: AtomicU32 = AtomicU32::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(id) = NonZeroU32::new(id) else {
            Self::exhausted();
        };

        WorkerId(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique worker ID: bitspace exhausted")
    }
}
