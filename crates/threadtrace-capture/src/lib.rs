//! Stack collection for every live thread of the current process.
//!
//! The calling thread walks its own stack directly. Every other thread is
//! interrupted with `SIGPROF`; the handler records raw instruction pointers
//! into a pre-allocated slot table of atomics and returns. The collector then
//! symbolizes those addresses off the signal path.
//!
//! On Linux, threads are enumerated from `/proc/self/task`. On other unix
//! targets only threads that called [`register_thread`] (plus the caller) are
//! visible. Elsewhere, capture fails with
//! [`CaptureError::DiagnosticsUnavailable`].
//!
//! Unwinding inside a signal handler is not strictly async-signal-safe, but
//! it is the same technique pprof-rs and Servo's hang monitor rely on.

use std::error::Error;
use std::fmt;

use threadtrace_types::StackSnapshot;

mod config;
mod source;
mod symbolize;

#[cfg(unix)]
mod collect;
#[cfg(target_os = "linux")]
mod procfs;
#[cfg(unix)]
mod registry;
#[cfg(unix)]
mod signal;

pub use config::{CaptureConfig, MAX_FRAMES_ENV, POLL_MS_ENV, SOURCE_LINES_ENV, TIMEOUT_MS_ENV};
pub use source::SourceCache;

#[cfg(target_os = "linux")]
pub use procfs::ProcfsIntrospector;
#[cfg(unix)]
pub use registry::{
    RegistryIntrospector, ThreadGuard, deregister_thread, register_thread, register_thread_guard,
};

/// Instruction pointers a slot can hold per thread.
pub const SLOT_FRAMES: usize = 256;

/// The introspector that sees the most threads on this platform.
#[cfg(target_os = "linux")]
pub type SystemIntrospector = ProcfsIntrospector;
#[cfg(all(unix, not(target_os = "linux")))]
pub type SystemIntrospector = RegistryIntrospector;
#[cfg(not(unix))]
pub type SystemIntrospector = UnsupportedIntrospector;

/// Something that can produce a stack snapshot of a set of threads.
///
/// The real implementations talk to the OS; tests substitute fixed
/// snapshots.
pub trait ThreadIntrospector {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError>;
}

impl<T: ThreadIntrospector + ?Sized> ThreadIntrospector for &T {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        (**self).snapshot()
    }
}

impl<T: ThreadIntrospector + ?Sized> ThreadIntrospector for Box<T> {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        (**self).snapshot()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureCapabilities {
    /// Every thread is visible without opting in.
    pub enumerates_all_threads: bool,
    /// Other threads' stacks can be sampled at all.
    pub samples_other_threads: bool,
}

pub fn capture_capabilities() -> CaptureCapabilities {
    CaptureCapabilities {
        enumerates_all_threads: cfg!(target_os = "linux"),
        samples_other_threads: cfg!(unix),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The platform cannot enumerate threads or walk their stacks.
    DiagnosticsUnavailable { reason: String },
    /// Installing the `SIGPROF` handler failed.
    SignalInstall { errno: i32 },
}

impl CaptureError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DiagnosticsUnavailable {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DiagnosticsUnavailable { reason } => {
                write!(f, "thread diagnostics unavailable: {reason}")
            }
            Self::SignalInstall { errno } => {
                write!(f, "failed to install SIGPROF handler (errno {errno})")
            }
        }
    }
}

impl Error for CaptureError {}

/// Introspector for targets without any thread sampling support.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedIntrospector;

impl ThreadIntrospector for UnsupportedIntrospector {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        Err(CaptureError::unavailable(format!(
            "thread introspection is not implemented on {}",
            std::env::consts::OS
        )))
    }
}

#[cfg(not(unix))]
impl UnsupportedIntrospector {
    pub fn new(_config: CaptureConfig) -> Self {
        Self
    }
}

#[cfg(unix)]
pub(crate) fn unix_millis_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
