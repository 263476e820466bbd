use std::time::Duration;

use tracing::{info, warn};

const WORKER_THREADS: usize = 3;
const WORKER_NAME: &str = "demo.runtime.worker";

fn register_current_worker() {
    #[cfg(unix)]
    threadtrace::register_thread(WORKER_NAME);
}

fn deregister_current_worker() {
    #[cfg(unix)]
    threadtrace::deregister_thread();
}

pub fn run() -> Result<(), String> {
    if !threadtrace::capture_capabilities().enumerates_all_threads {
        warn!("only registered threads are visible on this platform; relying on on_thread_start");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name(WORKER_NAME)
        .on_thread_start(register_current_worker)
        .on_thread_stop(deregister_current_worker)
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))?;

    runtime.block_on(async {
        for index in 0..WORKER_THREADS {
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    info!(index, "idle sleeper woke up");
                }
            });
        }

        // Let the runtime finish starting its workers.
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::spawn(async { super::print_trace() })
            .await
            .map_err(|e| format!("dump task failed: {e}"))?
    })?;

    runtime.shutdown_timeout(Duration::from_millis(100));
    Ok(())
}
