//! Initial-placement policies for submitted tasks.
//!
//! A policy picks the worker a fresh submission lands on. It is consulted
//! under no lock, so the deque lengths it reads are racy; that is fine, they
//! only steer a heuristic. Work stealing corrects any bad initial choice.

use crate::runtime::worker::Worker;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Selects an initial worker for a freshly submitted task out of the
/// stealable pool.
///
/// Returning `None` means the policy cannot place the task; the dispatcher
/// surfaces this as a placement error. Implementations must not retain worker
/// references across calls.
pub trait Placement: Send + Sync + fmt::Debug {
    fn select<'a>(&self, stealable: &'a [Arc<Worker>]) -> Option<&'a Arc<Worker>>;
}

/// Picks the worker with the fewest queued tasks, earliest index on ties.
/// The default policy.
#[derive(Debug, Default)]
pub struct LeastLoaded;

impl Placement for LeastLoaded {
    fn select<'a>(&self, stealable: &'a [Arc<Worker>]) -> Option<&'a Arc<Worker>> {
        stealable.iter().min_by_key(|worker| worker.task_count())
    }
}

/// Cycles through the pool in submission order.
///
/// The counter is owned by the policy instance, so two round-robin policies
/// never interfere with each other's rotation. Wrap-around is benign.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Placement for RoundRobin {
    fn select<'a>(&self, stealable: &'a [Arc<Worker>]) -> Option<&'a Arc<Worker>> {
        if stealable.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % stealable.len();
        stealable.get(index)
    }
}

/// Picks a uniformly random worker.
#[derive(Debug, Default)]
pub struct Random;

impl Placement for Random {
    fn select<'a>(&self, stealable: &'a [Arc<Worker>]) -> Option<&'a Arc<Worker>> {
        if stealable.is_empty() {
            return None;
        }

        stealable.get(fastrand::usize(..stealable.len()))
    }
}
