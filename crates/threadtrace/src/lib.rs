//! Print or collect the call stack of every live thread in the process.
//!
//! ```no_run
//! // Print every thread's stack to stdout.
//! threadtrace::print_current_trace().unwrap();
//!
//! // Or keep the lines.
//! let lines = threadtrace::capture_trace(false, false).unwrap().unwrap();
//! assert!(lines[0].starts_with("\n# ThreadID: "));
//! ```
//!
//! Output, per thread:
//!
//! ```text
//!
//! # ThreadID: <id>
//! File: "<path>", line <n>, in <scope>
//!   <trimmed source line>
//! ```
//!
//! Thread ids are display-only and may change between captures.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::OnceLock;

pub mod dump;
pub mod render;
mod tracer;
#[cfg(unix)]
pub mod watch;

pub use threadtrace_capture::{
    CaptureCapabilities, CaptureConfig, CaptureError, SystemIntrospector, ThreadIntrospector,
    UnsupportedIntrospector, capture_capabilities,
};
#[cfg(unix)]
pub use threadtrace_capture::{ThreadGuard, deregister_thread, register_thread, register_thread_guard};
pub use threadtrace_types::{FrameEntry, StackSnapshot, StackStatus, ThreadId, ThreadStack};
pub use tracer::{TraceOptions, Tracer};

use tracer::ExitGuard;

#[derive(Debug)]
pub enum TraceError {
    Capture(CaptureError),
    Output(io::Error),
}

impl fmt::Display for TraceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capture(e) => write!(f, "stack capture failed: {e}"),
            Self::Output(e) => write!(f, "writing stack trace failed: {e}"),
        }
    }
}

impl Error for TraceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Capture(e) => Some(e),
            Self::Output(e) => Some(e),
        }
    }
}

impl From<CaptureError> for TraceError {
    fn from(e: CaptureError) -> Self {
        Self::Capture(e)
    }
}

impl From<io::Error> for TraceError {
    fn from(e: io::Error) -> Self {
        Self::Output(e)
    }
}

/// Process-wide tracer over the platform introspector, configured from the
/// environment on first use.
pub fn system_tracer() -> &'static Tracer<SystemIntrospector> {
    static SYSTEM: OnceLock<Tracer<SystemIntrospector>> = OnceLock::new();
    SYSTEM.get_or_init(|| Tracer::new(SystemIntrospector::default()))
}

/// Capture every live thread's stack.
///
/// With `print_output`, the lines go to stdout and `Ok(None)` is returned;
/// otherwise they are returned and nothing is printed. With `quit_after`,
/// the process exits with status 0 afterwards, whatever happened.
pub fn capture_trace(
    print_output: bool,
    quit_after: bool,
) -> Result<Option<Vec<String>>, TraceError> {
    let _exit = ExitGuard::arm(quit_after);
    let options = TraceOptions {
        print_output,
        quit_after: false,
    };
    system_tracer().run(options, io::stdout())
}

/// [`capture_trace`] with the default options: print, don't quit.
pub fn print_current_trace() -> Result<(), TraceError> {
    let defaults = TraceOptions::default();
    capture_trace(defaults.print_output, defaults.quit_after).map(|_| ())
}
