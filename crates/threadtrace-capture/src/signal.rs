//! `SIGPROF`-driven sampling of other threads' stacks.
//!
//! Each signalled thread is assigned a slot before the signal goes out. The
//! handler finds the slot keyed by its own thread id, claims it, writes raw
//! instruction pointers, and marks it filled. Slots are plain atomics so the
//! handler never locks or allocates.

use std::io;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{CaptureConfig, CaptureError, SLOT_FRAMES};

/// Maximum number of threads sampled in one sweep. Larger sets are split
/// into consecutive sweeps.
pub(crate) const MAX_THREADS: usize = 256;

const IDLE: u8 = 0;
const ARMED: u8 = 1;
const WRITING: u8 = 2;
const FILLED: u8 = 3;

struct StackSlot {
    state: AtomicU8,
    /// Thread key this slot waits for (see [`current_key`]).
    key: AtomicU64,
    len: AtomicUsize,
    ips: Box<[AtomicUsize]>,
}

impl StackSlot {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            key: AtomicU64::new(0),
            len: AtomicUsize::new(0),
            ips: (0..SLOT_FRAMES).map(|_| AtomicUsize::new(0)).collect(),
        }
    }
}

static STACK_SLOTS: OnceLock<Vec<StackSlot>> = OnceLock::new();
static COLLECTION_IN_PROGRESS: AtomicBool = AtomicBool::new(false);
/// Serializes collectors; the slot table has a single owner at a time.
static COLLECTOR: Mutex<()> = parking_lot::const_mutex(());

fn slots() -> &'static Vec<StackSlot> {
    STACK_SLOTS.get_or_init(|| (0..MAX_THREADS).map(|_| StackSlot::new()).collect())
}

/// What came back from one signalled thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SampleOutcome {
    /// Innermost-first instruction pointers.
    Captured(Vec<usize>),
    /// The thread was signalled but never answered.
    TimedOut,
    /// The thread was gone by the time we signalled it.
    Vanished,
}

/// Identity of the calling thread, comparable with the keys handed to
/// [`sample_threads`].
#[cfg(target_os = "linux")]
pub(crate) fn current_key() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn current_key() -> u64 {
    unsafe { libc::pthread_self() as usize as u64 }
}

#[cfg(target_os = "linux")]
fn send_sigprof(key: u64) -> io::Result<()> {
    let rc = unsafe {
        libc::syscall(
            libc::SYS_tgkill,
            libc::getpid(),
            key as libc::pid_t,
            libc::SIGPROF,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(target_os = "linux"))]
fn send_sigprof(key: u64) -> io::Result<()> {
    let rc = unsafe { libc::pthread_kill(key as usize as libc::pthread_t, libc::SIGPROF) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(rc))
    }
}

/// Install the `SIGPROF` handler, once per process.
///
/// Any previously installed `SIGPROF` disposition (for example an
/// interval-timer profiler) is replaced.
fn ensure_handler() -> Result<(), CaptureError> {
    static INSTALLED: OnceLock<Result<(), i32>> = OnceLock::new();
    let installed = *INSTALLED.get_or_init(|| {
        // The handler must never be the one to allocate the table.
        let _ = slots();

        unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = sigprof_handler as *const () as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            if libc::sigaction(libc::SIGPROF, &sa, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error().raw_os_error().unwrap_or(0));
            }
        }
        debug!("installed SIGPROF stack sampling handler");
        Ok(())
    });
    installed.map_err(|errno| CaptureError::SignalInstall { errno })
}

/// Runs in signal context on the target thread.
extern "C" fn sigprof_handler(
    _sig: libc::c_int,
    _info: *mut libc::siginfo_t,
    _ctx: *mut libc::c_void,
) {
    if !COLLECTION_IN_PROGRESS.load(Ordering::Acquire) {
        return;
    }
    let Some(slots) = STACK_SLOTS.get() else {
        return;
    };

    let saved_errno = errno::get();
    let self_key = current_key();

    for slot in slots.iter() {
        if slot.key.load(Ordering::Acquire) != self_key {
            continue;
        }
        if slot
            .state
            .compare_exchange(ARMED, WRITING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            continue;
        }

        let mut len = 0;
        unsafe {
            backtrace::trace_unsynchronized(|frame| {
                let ip = frame.ip() as usize;
                if ip == 0 || len >= slot.ips.len() {
                    return false;
                }
                slot.ips[len].store(ip, Ordering::Relaxed);
                len += 1;
                true
            });
        }
        slot.len.store(len, Ordering::Relaxed);
        slot.state.store(FILLED, Ordering::Release);
        break;
    }

    errno::set(saved_errno);
}

/// Sample every thread in `keys`. The caller's own key must not be among
/// them: a thread cannot wait for its own signal handler.
///
/// Results are index-aligned with `keys`.
pub(crate) fn sample_threads(
    keys: &[u64],
    config: &CaptureConfig,
) -> Result<Vec<SampleOutcome>, CaptureError> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    ensure_handler()?;

    let _collector = COLLECTOR.lock();
    let mut outcomes = Vec::with_capacity(keys.len());
    for chunk in keys.chunks(MAX_THREADS) {
        outcomes.extend(sweep_once(chunk, config));
    }
    Ok(outcomes)
}

/// Signal every thread in `keys` (at most [`MAX_THREADS`]) and wait for
/// their answers.
fn sweep_once(keys: &[u64], config: &CaptureConfig) -> Vec<SampleOutcome> {
    let slots = slots();

    for (slot, &key) in slots.iter().zip(keys) {
        slot.len.store(0, Ordering::Relaxed);
        slot.key.store(key, Ordering::Release);
        slot.state.store(ARMED, Ordering::Release);
    }

    // Begin collection; the handler checks this flag first.
    COLLECTION_IN_PROGRESS.store(true, Ordering::Release);

    let mut signalled = vec![false; keys.len()];
    for (i, &key) in keys.iter().enumerate() {
        match send_sigprof(key) {
            Ok(()) => signalled[i] = true,
            Err(e) if e.raw_os_error() == Some(libc::ESRCH) => {
                debug!(thread = key, "thread exited before it could be sampled");
            }
            Err(e) => {
                warn!(thread = key, %e, "failed to signal thread");
            }
        }
    }

    let expected = signalled.iter().filter(|s| **s).count();
    let deadline = Instant::now() + config.sample_timeout;
    loop {
        let answered = slots
            .iter()
            .zip(&signalled)
            .filter(|(slot, signalled)| **signalled && slot.state.load(Ordering::Acquire) == FILLED)
            .count();
        if answered >= expected || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(config.poll_interval);
    }

    COLLECTION_IN_PROGRESS.store(false, Ordering::Release);

    slots
        .iter()
        .zip(keys)
        .zip(signalled)
        .map(|((slot, &key), signalled)| {
            let captured = disarm(slot);
            match (signalled, captured) {
                (_, Some(ips)) => SampleOutcome::Captured(ips),
                (true, None) => {
                    debug!(thread = key, "thread did not answer SIGPROF in time");
                    SampleOutcome::TimedOut
                }
                (false, None) => SampleOutcome::Vanished,
            }
        })
        .collect()
}

/// Return `slot` to idle, handing back its frames if the handler filled it.
/// Waits out a handler that is mid-write.
fn disarm(slot: &StackSlot) -> Option<Vec<usize>> {
    loop {
        match slot
            .state
            .compare_exchange(ARMED, IDLE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => return None,
            Err(FILLED) => {
                let len = slot.len.load(Ordering::Relaxed).min(slot.ips.len());
                let ips = slot.ips[..len]
                    .iter()
                    .map(|ip| ip.load(Ordering::Relaxed))
                    .collect();
                slot.state.store(IDLE, Ordering::Release);
                return Some(ips);
            }
            Err(WRITING) => std::hint::spin_loop(),
            Err(_) => return None,
        }
    }
}

mod errno {
    #[cfg(target_os = "linux")]
    fn location() -> *mut libc::c_int {
        unsafe { libc::__errno_location() }
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    fn location() -> *mut libc::c_int {
        unsafe { libc::__error() }
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
    fn location() -> *mut libc::c_int {
        std::ptr::null_mut()
    }

    pub(super) fn get() -> libc::c_int {
        let ptr = location();
        if ptr.is_null() { 0 } else { unsafe { *ptr } }
    }

    pub(super) fn set(value: libc::c_int) {
        let ptr = location();
        if !ptr.is_null() {
            unsafe { *ptr = value };
        }
    }
}
