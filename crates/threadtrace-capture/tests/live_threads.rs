#![cfg(target_os = "linux")]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;

use threadtrace_capture::{CaptureConfig, ProcfsIntrospector, ThreadIntrospector};
use threadtrace_types::{StackSnapshot, StackStatus};

fn generous_config() -> CaptureConfig {
    CaptureConfig {
        sample_timeout: Duration::from_secs(2),
        ..CaptureConfig::default()
    }
}

#[inline(never)]
fn park_here(ready: Arc<Barrier>, release: Arc<Barrier>) {
    ready.wait();
    release.wait();
}

#[test]
fn parked_threads_show_their_own_frames() {
    let ready = Arc::new(Barrier::new(3));
    let release = Arc::new(Barrier::new(3));

    let workers: Vec<_> = ["parked-a", "parked-b"]
        .into_iter()
        .map(|name| {
            let ready = Arc::clone(&ready);
            let release = Arc::clone(&release);
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || park_here(ready, release))
                .unwrap()
        })
        .collect();
    ready.wait();

    let snapshot = ProcfsIntrospector::new(generous_config()).snapshot().unwrap();

    release.wait();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(snapshot.pid, std::process::id());
    for name in ["parked-a", "parked-b"] {
        let thread = snapshot
            .threads
            .iter()
            .find(|t| t.name.as_deref() == Some(name))
            .unwrap_or_else(|| panic!("{name} missing from snapshot"));
        assert_eq!(thread.status, StackStatus::Captured);
        assert!(
            thread.frames.iter().any(|f| f.scope.contains("park_here")),
            "{name} frames: {:#?}",
            thread.frames
        );
        assert!(
            thread
                .frames
                .iter()
                .all(|f| !f.scope.contains("sigprof_handler")),
            "signal handler frames must be trimmed"
        );
    }
}

fn scopes_by_name(snapshot: &StackSnapshot, name: &str) -> Vec<String> {
    snapshot
        .threads
        .iter()
        .find(|t| t.name.as_deref() == Some(name))
        .unwrap_or_else(|| panic!("{name} missing from snapshot"))
        .frames
        .iter()
        .map(|f| f.scope.clone())
        .collect()
}

#[test]
fn successive_captures_of_parked_threads_agree() {
    let names = ["parked-again-a", "parked-again-b"];
    let ready = Arc::new(Barrier::new(names.len() + 1));
    let release = Arc::new(Barrier::new(names.len() + 1));

    let workers: Vec<_> = names
        .into_iter()
        .map(|name| {
            let ready = Arc::clone(&ready);
            let release = Arc::clone(&release);
            std::thread::Builder::new()
                .name(name.to_string())
                .spawn(move || park_here(ready, release))
                .unwrap()
        })
        .collect();
    ready.wait();
    // Let the workers settle into the release barrier.
    std::thread::sleep(Duration::from_millis(50));

    let introspector = ProcfsIntrospector::new(generous_config());
    let first = introspector.snapshot().unwrap();
    let second = introspector.snapshot().unwrap();

    release.wait();
    for worker in workers {
        worker.join().unwrap();
    }

    for name in names {
        let before = scopes_by_name(&first, name);
        let after = scopes_by_name(&second, name);
        assert!(
            before.iter().any(|s| s.contains("park_here")),
            "{name} frames: {before:#?}"
        );
        assert_eq!(before, after, "{name} changed between captures");
    }
}

#[test]
fn thread_ids_are_unique_within_a_snapshot() {
    let snapshot = ProcfsIntrospector::new(generous_config()).snapshot().unwrap();
    let mut ids: Vec<u64> = snapshot.threads.iter().map(|t| t.thread_id.get()).collect();
    let total = ids.len();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), total);
}

#[test]
fn churning_threads_do_not_break_capture() {
    let stop = Arc::new(AtomicBool::new(false));
    let spawner = {
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                let _ = std::thread::spawn(|| std::thread::yield_now()).join();
            }
        })
    };

    let introspector = ProcfsIntrospector::new(CaptureConfig {
        sample_timeout: Duration::from_millis(50),
        ..CaptureConfig::default()
    });
    for _ in 0..20 {
        let snapshot = introspector.snapshot().expect("capture must tolerate exiting threads");
        assert!(!snapshot.threads.is_empty());
    }

    stop.store(true, Ordering::Relaxed);
    spawner.join().unwrap();
}
