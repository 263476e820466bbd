//! Dump every thread's stack when the process receives `SIGUSR1`.
//!
//! ```no_run
//! let watcher = threadtrace::watch::spawn_dump_on_signal(threadtrace::watch::DumpTarget::Stderr)
//!     .expect("failed to install SIGUSR1 watcher");
//! // kill -USR1 <pid>
//! # watcher.stop();
//! ```

use std::io::{self, Write};
use std::path::PathBuf;
use std::thread::JoinHandle;

use signal_hook::consts::signal::SIGUSR1;
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use threadtrace_capture::register_thread_guard;

use crate::dump::{DumpFile, process_name, write_dump};
use crate::render::render_lines;
use crate::system_tracer;
use crate::tracer::write_lines;

const WATCH_THREAD_NAME: &str = "threadtrace-watch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpTarget {
    /// Rendered lines on stderr.
    Stderr,
    /// A JSON dump file in this directory.
    Directory(PathBuf),
}

/// A running watcher thread. Dropping it leaves the thread running for the
/// rest of the process; call [`DumpWatcher::stop`] to shut it down.
pub struct DumpWatcher {
    handle: Handle,
    thread: JoinHandle<()>,
}

impl DumpWatcher {
    pub fn stop(self) {
        self.handle.close();
        if self.thread.join().is_err() {
            warn!("stack dump watcher panicked");
        }
    }
}

/// Spawn a thread that dumps all stacks to `target` on every `SIGUSR1`.
pub fn spawn_dump_on_signal(target: DumpTarget) -> io::Result<DumpWatcher> {
    let mut signals = Signals::new([SIGUSR1])?;
    let handle = signals.handle();

    let thread = std::thread::Builder::new()
        .name(WATCH_THREAD_NAME.to_string())
        .spawn(move || {
            // Linux truncates thread names to 15 bytes; register the full one.
            let _registration = register_thread_guard(WATCH_THREAD_NAME);
            for _ in signals.forever() {
                dump_once(&target);
            }
        })?;

    info!(pid = std::process::id(), "stack dumps armed; trigger with kill -USR1");
    Ok(DumpWatcher { handle, thread })
}

fn dump_once(target: &DumpTarget) {
    let snapshot = match system_tracer().snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(%e, "stack dump requested but capture failed");
            return;
        }
    };

    match target {
        DumpTarget::Stderr => {
            let lines = render_lines(&snapshot);
            if let Err(e) = write_lines(&mut io::stderr().lock(), &lines) {
                warn!(%e, "failed to write stack dump to stderr");
            }
        }
        DumpTarget::Directory(dir) => {
            let dump = DumpFile::new(process_name(), snapshot);
            match write_dump(dir, &dump) {
                Ok(path) => info!(path = %path.display(), "wrote stack dump"),
                Err(e) => warn!(%e, "failed to write stack dump"),
            }
        }
    }
    let _ = io::stderr().flush();
}
