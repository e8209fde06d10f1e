use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::unbounded;
use parking_lot::Mutex;

use strata_scheduler::TaskScheduler;

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    done()
}

#[test]
fn test_every_task_runs_once_across_producers() {
    strata_test_utils::init_tracing_for_tests();
    let scheduler = TaskScheduler::new(4).expect("scheduler");
    let counter = Arc::new(AtomicUsize::new(0));
    let tokens: Vec<_> = (0..3).map(|_| scheduler.create_producer()).collect();
    for i in 0..300 {
        let counter = Arc::clone(&counter);
        scheduler
            .schedule_task(
                &tokens[i % tokens.len()],
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("enqueue");
    }
    assert!(wait_until(Duration::from_secs(10), || {
        counter.load(Ordering::SeqCst) == 300
    }));
}

#[test]
fn test_tasks_run_on_several_workers() {
    let scheduler = TaskScheduler::new(3).expect("scheduler");
    let token = scheduler.create_producer();
    let names = Arc::new(Mutex::new(HashSet::new()));
    // Each task blocks until three are running at once.
    let (started_tx, started_rx) = unbounded::<()>();
    let (release_tx, release_rx) = unbounded::<()>();
    for _ in 0..3 {
        let names = Arc::clone(&names);
        let started = started_tx.clone();
        let release = release_rx.clone();
        token
            .enqueue(Box::new(move || {
                let name = std::thread::current().name().map(str::to_string);
                names.lock().insert(name);
                started.send(()).unwrap();
                release.recv().unwrap();
            }))
            .expect("enqueue");
    }
    for _ in 0..3 {
        started_rx
            .recv_timeout(Duration::from_secs(10))
            .expect("task started");
    }
    for _ in 0..3 {
        release_tx.send(()).unwrap();
    }
    let names = names.lock();
    assert_eq!(names.len(), 3);
    assert!(names.iter().flatten().all(|n| n.starts_with("strata-worker-")));
}

#[test]
fn test_set_threads_scales_up_and_down() {
    let scheduler = TaskScheduler::with_poll_interval(2, Duration::from_millis(5)).expect("scheduler");
    assert_eq!(scheduler.thread_count(), 2);
    scheduler.set_threads(6).expect("grow");
    assert_eq!(scheduler.thread_count(), 6);
    scheduler.set_threads(1).expect("shrink");
    assert_eq!(scheduler.thread_count(), 1);

    let token = scheduler.create_producer();
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..20 {
        let done = Arc::clone(&done);
        token
            .enqueue(Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("enqueue");
    }
    assert!(wait_until(Duration::from_secs(10), || done.load(Ordering::SeqCst) == 20));

    scheduler.set_threads(0).expect("stop");
    assert_eq!(scheduler.thread_count(), 0);
    let late = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&late);
    token
        .enqueue(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }))
        .expect("enqueue");
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(late.load(Ordering::SeqCst), 0);
    assert!(scheduler.try_execute_one(Duration::from_millis(10)));
    assert_eq!(late.load(Ordering::SeqCst), 1);
}

#[test]
fn test_panicking_task_keeps_worker_alive() {
    let scheduler = TaskScheduler::new(1).expect("scheduler");
    let token = scheduler.create_producer();
    token
        .enqueue(Box::new(|| panic!("task failure")))
        .expect("enqueue");
    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    token
        .enqueue(Box::new(move || {
            flag.fetch_add(1, Ordering::SeqCst);
        }))
        .expect("enqueue");
    assert!(wait_until(Duration::from_secs(10), || ran.load(Ordering::SeqCst) == 1));
    assert_eq!(scheduler.thread_count(), 1);
}
