use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;

use tracing::info;

#[inline(never)]
fn park_until_released(release: mpsc::Receiver<()>) {
    // Blocks until the sender is dropped.
    let _ = release.recv();
}

pub fn run(workers: usize, json: bool) -> Result<(), String> {
    if workers == 0 {
        return Err("--workers must be at least 1".to_string());
    }

    let ready = Arc::new(Barrier::new(workers + 1));
    let mut releases = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for index in 0..workers {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let ready = Arc::clone(&ready);
        let handle = thread::Builder::new()
            .name(format!("parked.worker.{index}"))
            .spawn(move || {
                ready.wait();
                park_until_released(release_rx);
            })
            .map_err(|e| format!("failed to spawn worker {index}: {e}"))?;
        releases.push(release_tx);
        handles.push(handle);
    }

    ready.wait();
    info!(workers, "all workers parked; capturing");

    let result = if json {
        print_snapshot_json()
    } else {
        super::print_trace()
    };

    drop(releases);
    for handle in handles {
        let _ = handle.join();
    }
    result
}

fn print_snapshot_json() -> Result<(), String> {
    let snapshot = threadtrace::system_tracer()
        .snapshot()
        .map_err(|e| e.to_string())?;
    let json = facet_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())?;
    println!("{json}");
    Ok(())
}
