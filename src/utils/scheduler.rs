#![allow(unused)]

//! Test-only introspection on dispatcher calls.

use crate::task::{TaskId, WorkerId};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    Submit,
    Spawn,
    PushTask,
    Steal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Submit { id: TaskId, worker: WorkerId },
    Spawn { id: TaskId, worker: WorkerId },
    PushTask { id: TaskId, worker: WorkerId },
    Steal { id: TaskId, thief: WorkerId, victim: WorkerId },
}

/// Records every tracked dispatcher call so tests can assert on placement,
/// spawning and stealing without sleeping or polling.
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::Submit, Vec::new());
        map.insert(Method::Spawn, Vec::new());
        map.insert(Method::PushTask, Vec::new());
        map.insert(Method::Steal, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}
