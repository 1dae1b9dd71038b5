use super::dispatcher::{Dispatcher, Handle};
use super::policy::Placement;
use super::worker::Worker;
use crate::task::{self, Affinity, ResultCell};
use crate::utils::scheduler::Method;
use anyhow::Result;
use parking_lot::Mutex;
use rstest::rstest;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn init_dispatcher(worker_count: usize) -> Handle {
    let dispatcher = Dispatcher::new().into_handle();
    dispatcher.set_worker_count(worker_count);
    dispatcher.initialize();
    dispatcher
}

#[test]
fn test_empty_task_completes() -> Result<()> {
    let dispatcher = init_dispatcher(2);

    let task = task::from_fn(|| {});
    dispatcher.submit(task.clone())?;
    task.wait();

    assert_eq!(task.refcount(), 0);
    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_parent_with_two_spawned_children() -> Result<()> {
    let dispatcher = init_dispatcher(2);
    let counter = Arc::new(AtomicUsize::new(0));

    let parent = {
        let dispatcher = dispatcher.clone();
        let counter = counter.clone();
        task::from_fn(move || {
            for _ in 0..2 {
                let counter = counter.clone();
                let child = task::from_fn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                dispatcher.spawn(child).unwrap();
            }
        })
    };

    dispatcher.submit(parent.clone())?;
    parent.wait();

    // Both children finished before the parent completed.
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert_eq!(parent.refcount(), 0);
    assert_eq!(dispatcher.tracker.num_calls(&Method::Spawn), 2);

    dispatcher.shutdown()?;
    Ok(())
}

#[rstest]
#[case::one_worker(1)]
#[case::two_workers(2)]
#[case::four_workers(4)]
fn test_fan_out_join(#[case] worker_count: usize) -> Result<()> {
    let dispatcher = init_dispatcher(worker_count);
    let counter = Arc::new(AtomicUsize::new(0));

    let tasks = (0..16)
        .map(|_| {
            let counter = counter.clone();
            task::from_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect::<Vec<_>>();

    for task in &tasks {
        dispatcher.submit(task.clone())?;
    }
    for task in &tasks {
        task.wait();
    }

    assert_eq!(counter.load(Ordering::SeqCst), 16);
    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_continuation_chain_runs_in_order() -> Result<()> {
    let dispatcher = init_dispatcher(2);
    let log = Arc::new(Mutex::new(Vec::new()));

    let record = |value: u32| {
        let log = log.clone();
        task::from_fn(move || log.lock().push(value))
    };

    let first = record(1);
    let second = record(2);
    let third = record(3);

    first
        .set_continuation(second.clone())
        .set_continuation(third.clone());

    dispatcher.submit(first)?;
    third.wait();

    assert_eq!(*log.lock(), vec![1, 2, 3]);

    // Each completed link published the next one to a worker's front.
    assert_eq!(dispatcher.tracker.num_calls(&Method::PushTask), 2);

    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_continuation_fires_after_all_descendants() -> Result<()> {
    let dispatcher = init_dispatcher(2);
    let counter = Arc::new(AtomicUsize::new(0));
    let observed = ResultCell::new();

    let parent = {
        let dispatcher = dispatcher.clone();
        let counter = counter.clone();
        task::from_fn(move || {
            for _ in 0..4 {
                let counter = counter.clone();
                let child = task::from_fn(move || {
                    // Slow children; the continuation still has to wait for
                    // every one of them.
                    thread::sleep(Duration::from_millis(5));
                    counter.fetch_add(1, Ordering::SeqCst);
                });
                dispatcher.spawn(child).unwrap();
            }
        })
    };

    let continuation = {
        let counter = counter.clone();
        task::returning(move || counter.load(Ordering::SeqCst), &observed)
    };

    parent.set_continuation(continuation.clone());
    dispatcher.submit(parent)?;
    continuation.wait();

    assert_eq!(observed.take(), Some(4));
    dispatcher.shutdown()?;
    Ok(())
}

/// Pins every submission onto one worker so the rest of the pool can only
/// get work by stealing it.
#[derive(Debug)]
struct Pinned;

impl Placement for Pinned {
    fn select<'a>(&self, stealable: &'a [Arc<Worker>]) -> Option<&'a Arc<Worker>> {
        stealable.first()
    }
}

#[test]
fn test_work_is_stolen_from_a_loaded_worker() -> Result<()> {
    let dispatcher = Dispatcher::new().into_handle();
    dispatcher.set_worker_count(3);
    dispatcher.set_placement(Arc::new(Pinned));
    dispatcher.initialize();

    let threads_seen = Arc::new(Mutex::new(HashSet::new()));

    let tasks = (0..60)
        .map(|_| {
            let threads_seen = threads_seen.clone();
            task::from_fn(move || {
                threads_seen.lock().insert(thread::current().id());
                thread::sleep(Duration::from_micros(500));
            })
        })
        .collect::<Vec<_>>();

    for task in &tasks {
        dispatcher.submit(task.clone())?;
    }
    for task in &tasks {
        task.wait();
    }

    // Everything landed on one deque, so any execution elsewhere was a steal.
    assert!(threads_seen.lock().len() > 1);
    assert!(dispatcher.tracker.num_calls(&Method::Steal) > 0);

    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_single_worker_preserves_submission_order() -> Result<()> {
    let dispatcher = init_dispatcher(1);
    let log = Arc::new(Mutex::new(Vec::new()));

    let tasks = (0..10)
        .map(|value| {
            let log = log.clone();
            task::from_fn(move || log.lock().push(value))
        })
        .collect::<Vec<_>>();

    for task in &tasks {
        dispatcher.submit(task.clone())?;
    }
    for task in &tasks {
        task.wait();
    }

    // One worker and nobody to steal: back-of-deque order is execution order.
    assert_eq!(*log.lock(), (0..10).collect::<Vec<_>>());

    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_main_affinity_runs_on_the_main_thread() -> Result<()> {
    let dispatcher = init_dispatcher(1);
    let main_thread = thread::current().id();
    let ran_on = ResultCell::new();

    let main_task = task::returning(move || thread::current().id(), &ran_on);
    main_task.set_affinity(Affinity::Main);

    // Submit the main-affinity task from a worker, the way a pipeline would
    // hand results back to its driver.
    let producer = {
        let dispatcher = dispatcher.clone();
        let main_task = main_task.clone();
        task::from_fn(move || dispatcher.submit(main_task).unwrap())
    };

    dispatcher.submit(producer.clone())?;
    producer.wait();

    // The task sits in the main lane until the main thread drains it.
    assert_eq!(main_task.refcount(), 1);
    dispatcher.process_main()?;
    main_task.wait();

    assert_eq!(ran_on.take(), Some(main_thread));
    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_child_spawned_under_main_task_stays_on_main_lane() -> Result<()> {
    let dispatcher = init_dispatcher(1);
    let main_thread = thread::current().id();
    let child_ran_on = ResultCell::new();

    let child = task::returning(move || thread::current().id(), &child_ran_on);
    let parent = {
        let dispatcher = dispatcher.clone();
        let child = child.clone();
        task::from_fn(move || dispatcher.spawn(child).unwrap())
    };

    parent.set_affinity(Affinity::Main);
    dispatcher.submit(parent.clone())?;
    dispatcher.process_main()?;
    parent.wait();

    // The child inherits no affinity but runs on the spawning worker, which
    // is the main worker while process_main drives it.
    assert_eq!(child.affinity(), Affinity::None);
    assert_eq!(child.parent().unwrap().id(), parent.id());
    assert_eq!(child_ran_on.take(), Some(main_thread));

    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_zero_workers_main_lane_still_drains() -> Result<()> {
    let dispatcher = init_dispatcher(0);
    let counter = Arc::new(AtomicUsize::new(0));

    let task = {
        let counter = counter.clone();
        task::from_fn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    };
    task.set_affinity(Affinity::Main);

    dispatcher.submit(task.clone())?;
    dispatcher.process_main()?;
    task.wait();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    dispatcher.shutdown()?;
    Ok(())
}

#[rstest]
#[case::two_workers(2)]
#[case::four_workers(4)]
fn test_spawn_tree_stress(#[case] worker_count: usize) -> Result<()> {
    let dispatcher = init_dispatcher(worker_count);
    let counter = Arc::new(AtomicUsize::new(0));

    let root = {
        let dispatcher = dispatcher.clone();
        let counter = counter.clone();
        task::from_fn(move || {
            for _ in 0..4 {
                let dispatcher_inner = dispatcher.clone();
                let counter = counter.clone();
                let child = task::from_fn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    for _ in 0..4 {
                        let counter = counter.clone();
                        let grandchild = task::from_fn(move || {
                            counter.fetch_add(1, Ordering::SeqCst);
                        });
                        dispatcher_inner.spawn(grandchild).unwrap();
                    }
                });
                dispatcher.spawn(child).unwrap();
            }
        })
    };

    dispatcher.submit(root.clone())?;
    root.wait();

    // 4 children and 16 grandchildren, all done before the root completed.
    assert_eq!(counter.load(Ordering::SeqCst), 20);
    assert_eq!(root.refcount(), 0);

    dispatcher.shutdown()?;
    Ok(())
}

#[test]
fn test_current_task_introspection_from_inside_a_payload() -> Result<()> {
    let dispatcher = init_dispatcher(1);
    let seen = ResultCell::new();

    let probe = {
        let dispatcher = dispatcher.clone();
        task::returning(
            move || {
                let worker = dispatcher.current_worker().unwrap();
                let current = worker.current_task().unwrap();
                (current.id(), current.refcount())
            },
            &seen,
        )
    };

    dispatcher.submit(probe.clone())?;
    probe.wait();

    let (id, refcount) = seen.take().unwrap();
    assert_eq!(id, probe.id());
    // Observed mid-execution, before the final decrement.
    assert_eq!(refcount, 1);

    dispatcher.shutdown()?;
    Ok(())
}
