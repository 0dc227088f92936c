//! Cross-thread publication stress against the OS demultiplexer.
//!
//! An owning thread registers descriptors while worker threads run the
//! wait/dispatch loop. Every completion must be observed exactly once,
//! and no worker may ever see a half-registered descriptor: the
//! construct-then-publish discipline guarantees a state reached through
//! the scheduler is fully built.

mod common;

use remux::{Interest, Scheduler, SchedulerConfig};
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn stress_config() -> SchedulerConfig {
    SchedulerConfig {
        poll_timeout: Duration::from_millis(100),
        ..SchedulerConfig::default()
    }
}

#[test]
fn registrations_race_running_workers() {
    common::init_test_logging();
    const STREAMS: usize = 64;

    let scheduler = Arc::new(Scheduler::with_os_demux(stress_config()).expect("scheduler"));
    // Held until every registration lands so idle workers do not return
    // before the first descriptor is published.
    let guard = scheduler.work_guard();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run().expect("worker run"))
        })
        .collect();

    let completions = Arc::new(AtomicUsize::new(0));
    let seen: Arc<Vec<AtomicBool>> =
        Arc::new((0..STREAMS).map(|_| AtomicBool::new(false)).collect());

    let mut pairs = Vec::with_capacity(STREAMS);
    for i in 0..STREAMS {
        let (reader, writer) = UnixStream::pair().expect("socketpair");
        reader.set_nonblocking(true).expect("nonblocking");

        let completions = Arc::clone(&completions);
        let seen = Arc::clone(&seen);
        scheduler
            .register(
                &reader,
                Interest::READABLE,
                Box::new(move |res| {
                    let readiness = res.expect("readiness");
                    assert!(readiness.is_readable() || readiness.is_hup());
                    let already = seen[i].swap(true, Ordering::SeqCst);
                    assert!(!already, "stream {i} completed twice");
                    completions.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("register");

        // Make the descriptor ready after its watch is in place; the
        // interrupt issued by register keeps blocked workers current.
        (&writer).write_all(b"x").expect("write");
        pairs.push((reader, writer));
    }

    guard.release();

    let dispatched: usize = workers
        .into_iter()
        .map(|w| w.join().expect("worker join"))
        .sum();

    assert_eq!(dispatched, STREAMS);
    assert_eq!(completions.load(Ordering::SeqCst), STREAMS);
    assert!(seen.iter().all(|flag| flag.load(Ordering::SeqCst)));
    drop(pairs);
}

#[test]
fn multiple_owning_threads_publish_concurrently() {
    common::init_test_logging();
    const OWNERS: usize = 4;
    const PER_OWNER: usize = 16;

    let scheduler = Arc::new(Scheduler::with_os_demux(stress_config()).expect("scheduler"));
    let guard = scheduler.work_guard();

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            std::thread::spawn(move || scheduler.run().expect("worker run"))
        })
        .collect();

    let completions = Arc::new(AtomicUsize::new(0));
    let owners: Vec<_> = (0..OWNERS)
        .map(|_| {
            let scheduler = Arc::clone(&scheduler);
            let completions = Arc::clone(&completions);
            std::thread::spawn(move || {
                let mut pairs = Vec::with_capacity(PER_OWNER);
                for _ in 0..PER_OWNER {
                    let (reader, writer) = UnixStream::pair().expect("socketpair");
                    reader.set_nonblocking(true).expect("nonblocking");
                    let completions = Arc::clone(&completions);
                    scheduler
                        .register(
                            &reader,
                            Interest::READABLE,
                            Box::new(move |res| {
                                assert!(res.is_ok());
                                completions.fetch_add(1, Ordering::SeqCst);
                            }),
                        )
                        .expect("register");
                    (&writer).write_all(b"x").expect("write");
                    pairs.push((reader, writer));
                }
                pairs
            })
        })
        .collect();

    // Descriptors must outlive dispatch; collect them before releasing
    // the guard that lets workers drain.
    let mut all_pairs = Vec::new();
    for owner in owners {
        all_pairs.extend(owner.join().expect("owner join"));
    }
    guard.release();

    let dispatched: usize = workers
        .into_iter()
        .map(|w| w.join().expect("worker join"))
        .sum();

    assert_eq!(dispatched, OWNERS * PER_OWNER);
    assert_eq!(completions.load(Ordering::SeqCst), OWNERS * PER_OWNER);
    drop(all_pairs);
}

#[test]
fn reregistering_a_descriptor_delivers_again() {
    common::init_test_logging();
    let scheduler = Scheduler::with_os_demux(stress_config()).expect("scheduler");

    let (reader, writer) = UnixStream::pair().expect("socketpair");
    reader.set_nonblocking(true).expect("nonblocking");
    let completions = Arc::new(AtomicUsize::new(0));

    for round in 1..=2usize {
        let completions_cb = Arc::clone(&completions);
        scheduler
            .register(
                &reader,
                Interest::READABLE,
                Box::new(move |res| {
                    assert!(res.expect("readiness").is_readable());
                    completions_cb.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .expect("register");
        (&writer).write_all(b"x").expect("write");

        scheduler.run().expect("run");
        assert_eq!(completions.load(Ordering::SeqCst), round);
    }
}
