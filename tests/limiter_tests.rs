//! Process limiter with real child processes: one process per lane, kill-all. Uses `sh`, so Unix only.
#![cfg(unix)]

use mediascan::ProcessError;
use mediascan::engine::limiter::ProcessLimiter;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn test_same_lane_never_overlaps() {
    let limiter = Arc::new(ProcessLimiter::new());
    let start = Instant::now();
    let handles: Vec<_> = (0..3)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.run_quiet("ffprobe", "sh", &["-c", "sleep 0.2"]))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert!(start.elapsed() >= Duration::from_millis(600));
}

#[test]
fn test_different_lanes_run_in_parallel() {
    let limiter = Arc::new(ProcessLimiter::new());
    let start = Instant::now();
    let handles: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|lane| {
            let limiter = Arc::clone(&limiter);
            thread::spawn(move || limiter.run_quiet(lane, "sh", &["-c", "sleep 0.3"]))
        })
        .collect();
    for h in handles {
        h.join().unwrap().unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(850));
}

#[test]
fn test_collects_both_streams() {
    let limiter = ProcessLimiter::new();
    let out = limiter
        .run_collect("x", "sh", &["-c", "printf hello; printf oops >&2"], &|_: &[u8]| {})
        .unwrap();
    assert_eq!(out.stdout, b"hello");
    assert_eq!(out.stderr, b"oops");
}

#[test]
fn test_failures_release_the_lane() {
    let limiter = ProcessLimiter::new();
    match limiter.run_quiet("x", "sh", &["-c", "exit 3"]) {
        Err(ProcessError::Exit { code, .. }) => assert_eq!(code, 3),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        limiter.run_quiet("x", "/nonexistent/tool", &["-v"]),
        Err(ProcessError::Spawn { .. })
    ));
    assert_eq!(limiter.queue_len("x"), 0);
    limiter.run_quiet("x", "sh", &["-c", "true"]).unwrap();
}

#[test]
fn test_kill_all_stops_running_and_rejects_new() {
    let limiter = Arc::new(ProcessLimiter::new());
    let runner = {
        let limiter = Arc::clone(&limiter);
        thread::spawn(move || limiter.run_quiet("slow", "sleep", &["5"]))
    };
    wait_until(|| limiter.running_count() == 1);

    let start = Instant::now();
    limiter.kill_all_and_clear_queue();
    let result = runner.join().unwrap();
    assert!(matches!(result, Err(ProcessError::Killed { .. })));
    assert!(start.elapsed() < Duration::from_secs(4));

    assert!(limiter.is_shut_down());
    assert!(matches!(
        limiter.run_quiet("other", "sh", &["-c", "true"]),
        Err(ProcessError::ShuttingDown)
    ));
}
