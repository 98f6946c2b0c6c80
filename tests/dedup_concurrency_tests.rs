//! Concurrent request tests
//!
//! Many threads asking for the same result at once must trigger exactly one
//! dispatch, and every caller must see exactly one terminal event.

mod fixtures;

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use batchd_protocol::{ProgressEvent, ProgressPayload, RecordingListener, WorkRequest};
use fixtures::*;
use tempfile::TempDir;

const CALLERS: usize = 24;

#[test]
fn test_identical_requests_dispatch_once() {
    let temp_dir = TempDir::new().unwrap();
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let worker = Arc::new(make_worker(&temp_dir, &dispatcher));
    let stale = Arc::new(AtomicBool::new(false));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let worker = Arc::clone(&worker);
            let barrier = Arc::clone(&barrier);
            let packet = Packet::new("shared", &format!("request{}", i), &stale);
            thread::spawn(move || {
                let listener = Arc::new(RecordingListener::new());
                barrier.wait();
                worker.handle(WorkRequest::task(packet), listener.clone());
                listener
            })
        })
        .collect();

    let listeners: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("Thread panicked"))
        .collect();

    assert_eq!(dispatcher.count(), 1, "exactly one computation is launched");
    dispatcher.start(0);
    dispatcher.progress(0);
    dispatcher.success(0);

    for listener in &listeners {
        assert_eq!(
            listener.wait_for_terminal(Duration::from_secs(5)),
            Some(ProgressEvent::Succeeded)
        );
        assert_eq!(listener.terminal_count(), 1);
    }
    assert!(!worker.registry().is_work_in_progress());
    assert_eq!(worker.store().stats().unwrap().entries, 1);
}

#[test]
fn test_requests_racing_completion_see_one_terminal() {
    let temp_dir = TempDir::new().unwrap();
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let worker = Arc::new(make_worker(&temp_dir, &dispatcher));
    let stale = Arc::new(AtomicBool::new(false));

    worker.handle(
        WorkRequest::task(Packet::new("racing", "first", &stale)),
        Arc::new(RecordingListener::new()),
    );
    let barrier = Arc::new(Barrier::new(CALLERS + 1));

    let handles: Vec<_> = (0..CALLERS)
        .map(|i| {
            let worker = Arc::clone(&worker);
            let barrier = Arc::clone(&barrier);
            let packet = Packet::new("racing", &format!("late{}", i), &stale);
            thread::spawn(move || {
                let listener = Arc::new(RecordingListener::new());
                barrier.wait();
                worker.handle(WorkRequest::task(packet), listener.clone());
                listener
            })
        })
        .collect();

    barrier.wait();
    dispatcher.success(0);

    for handle in handles {
        let listener = handle.join().expect("Thread panicked");
        assert_eq!(
            listener.wait_for_terminal(Duration::from_secs(5)),
            Some(ProgressEvent::Succeeded)
        );
        assert_eq!(listener.terminal_count(), 1);
        assert!(listener
            .payloads()
            .iter()
            .any(|p| matches!(p, ProgressPayload::CachedResult { .. })));
    }
    assert_eq!(dispatcher.count(), 1, "late callers join or hit the cache");
}

#[test]
fn test_distinct_requests_run_in_parallel() {
    let temp_dir = TempDir::new().unwrap();
    let dispatcher = Arc::new(ScriptedDispatcher::new());
    let worker = Arc::new(make_worker(&temp_dir, &dispatcher));
    let stale = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let worker = Arc::clone(&worker);
            let packet = Packet::new(&format!("task-{}", i), "r", &stale);
            thread::spawn(move || {
                let listener = Arc::new(RecordingListener::new());
                worker.handle(WorkRequest::task(packet), listener.clone());
                listener
            })
        })
        .collect();
    let listeners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(dispatcher.count(), 8);
    assert_eq!(worker.registry().in_flight().len(), 8);
    for i in 0..8 {
        dispatcher.success(i);
    }
    for listener in listeners {
        assert_eq!(listener.terminal(), Some(ProgressEvent::Succeeded));
    }
    assert_eq!(worker.store().list_entries().unwrap().len(), 8);
}
