//! Scheduler liveness and shutdown scenarios on the lab backend.
//!
//! Covers the wakeup and termination contracts: a registration made while
//! a worker is blocked is not lost, each event dispatches exactly once
//! across concurrent workers, retirement is deterministic, and stop
//! unblocks every worker in bounded time.

mod common;

use remux::{
    CompletionFn, Demux, ErrorKind, Interest, LabDemux, Scheduler, SchedulerConfig,
};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source wrapper for lab-backend tests; the lab backend never hands
/// descriptors to the kernel, so any value works.
struct FakeSource(RawFd);

impl AsRawFd for FakeSource {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// A deliberately long poll timeout: these tests pass only if wakeups
/// come from interrupts, never from the timeout expiring.
fn lab_scheduler() -> (Arc<Scheduler>, Arc<LabDemux>) {
    let lab = Arc::new(LabDemux::new());
    let scheduler = Scheduler::new(
        Arc::clone(&lab) as Arc<dyn Demux>,
        SchedulerConfig {
            poll_timeout: Duration::from_secs(60),
            ..SchedulerConfig::default()
        },
    )
    .expect("scheduler");
    (Arc::new(scheduler), lab)
}

fn counting(counter: &Arc<AtomicUsize>) -> CompletionFn {
    let counter = Arc::clone(counter);
    Box::new(move |res| {
        assert!(res.is_ok());
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

#[test]
fn registration_against_blocked_worker_is_not_lost() {
    common::init_test_logging();
    let (scheduler, lab) = lab_scheduler();
    let guard = scheduler.work_guard();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        std::thread::spawn(move || scheduler.run().expect("run"))
    };
    // Let the worker block inside wait before anything is registered.
    std::thread::sleep(Duration::from_millis(50));

    let fired = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    scheduler
        .register(&FakeSource(3), Interest::READABLE, counting(&fired))
        .expect("register");
    lab.inject_readable(3);
    guard.release();

    let dispatched = worker.join().expect("worker join");
    // Well under the 60s poll timeout: the wakeup was an interrupt.
    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(dispatched, 1);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn each_event_dispatches_exactly_once_across_workers() {
    common::init_test_logging();
    const OPS: usize = 32;
    let (scheduler, lab) = lab_scheduler();
    let guard = scheduler.work_guard();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run().expect("run"))
        })
        .collect();

    let fired = Arc::new(AtomicUsize::new(0));
    for i in 0..OPS {
        let fd = 10 + i as RawFd;
        scheduler
            .register(&FakeSource(fd), Interest::READABLE, counting(&fired))
            .expect("register");
        lab.inject_readable(fd);
    }
    guard.release();

    let dispatched: usize = workers
        .into_iter()
        .map(|w| w.join().expect("worker join"))
        .sum();

    assert_eq!(dispatched, OPS);
    assert_eq!(fired.load(Ordering::SeqCst), OPS);
    assert_eq!(lab.pending_len(), 0);
}

#[test]
fn callback_can_register_next_operation_mid_run() {
    common::init_test_logging();
    let (scheduler, lab) = lab_scheduler();

    let second_fired = Arc::new(AtomicUsize::new(0));
    {
        let chained = Arc::clone(&scheduler);
        let lab_inner = Arc::clone(&lab);
        let second_fired = Arc::clone(&second_fired);
        scheduler
            .register(
                &FakeSource(3),
                Interest::READABLE,
                Box::new(move |res| {
                    assert!(res.is_ok());
                    // Runs on a worker thread, outside all scheduler
                    // locks; registering here must be legal.
                    chained
                        .register(&FakeSource(4), Interest::READABLE, counting(&second_fired))
                        .expect("chained register");
                    lab_inner.inject_readable(4);
                }),
            )
            .expect("register");
    }

    lab.inject_readable(3);
    let dispatched = scheduler.run().expect("run");
    assert_eq!(dispatched, 2);
    assert_eq!(second_fired.load(Ordering::SeqCst), 1);
}

#[test]
fn stop_unblocks_all_workers_in_bounded_time() {
    common::init_test_logging();
    let (scheduler, _lab) = lab_scheduler();
    let _guard = scheduler.work_guard();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run().expect("run"))
        })
        .collect();
    std::thread::sleep(Duration::from_millis(50));

    let start = Instant::now();
    scheduler.stop();
    for worker in workers {
        worker.join().expect("worker join");
    }
    // One interrupt from stop plus one chained per exiting worker; no
    // worker should ride out the 60s timeout.
    assert!(start.elapsed() < Duration::from_secs(10));
    assert!(scheduler.is_stopped());

    let err = scheduler
        .register(&FakeSource(3), Interest::READABLE, Box::new(|_| {}))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Shutdown);
}

#[test]
fn retirement_is_idempotent_under_a_running_worker() {
    common::init_test_logging();
    let (scheduler, lab) = lab_scheduler();
    let guard = scheduler.work_guard();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        std::thread::spawn(move || scheduler.run().expect("run"))
    };

    let outcomes = Arc::new(AtomicUsize::new(0));
    {
        let outcomes = Arc::clone(&outcomes);
        scheduler
            .register(
                &FakeSource(3),
                Interest::READABLE,
                Box::new(move |res| {
                    assert!(res.unwrap_err().is_cancelled());
                    outcomes.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("register");
    }

    scheduler.retire(3).expect("first retire");
    let err = scheduler.retire(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidDescriptor);
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);

    // A stale event for the retired descriptor is discarded, not
    // delivered to a recycled registration.
    lab.inject_readable(3);
    guard.release();
    worker.join().expect("worker join");
    assert_eq!(outcomes.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.outstanding(), 0);
}

#[test]
fn cancel_races_dispatch_without_double_completion() {
    common::init_test_logging();
    const ROUNDS: usize = 50;
    let (scheduler, lab) = lab_scheduler();

    for round in 0..ROUNDS {
        let guard = scheduler.work_guard();
        let worker = {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run().expect("run"))
        };

        let completions = Arc::new(AtomicUsize::new(0));
        let handle = {
            let completions = Arc::clone(&completions);
            scheduler
                .register(
                    &FakeSource(3),
                    Interest::READABLE,
                    Box::new(move |_| {
                        completions.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .expect("register")
        };

        lab.inject_readable(3);
        // Cancellation and dispatch race; exactly one side wins the
        // operation and the loser gets a deterministic error.
        match scheduler.cancel(handle) {
            Ok(()) => {}
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState),
        }

        guard.release();
        worker.join().expect("worker join");
        assert_eq!(
            completions.load(Ordering::SeqCst),
            1,
            "round {round}: operation must complete exactly once"
        );
        scheduler.retire(3).expect("retire between rounds");
    }
}
