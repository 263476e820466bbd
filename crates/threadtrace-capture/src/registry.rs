//! Opt-in thread registry.
//!
//! On targets without a way to enumerate threads, only registered threads
//! (and the caller) are sampled. On Linux every thread is visible anyway and
//! registration only attaches a friendlier name than the kernel's 15-byte
//! `comm`.

use parking_lot::Mutex;
use threadtrace_types::StackSnapshot;

use crate::collect::{ThreadCandidate, collect};
use crate::signal::current_key;
use crate::{CaptureConfig, CaptureError, SourceCache, ThreadIntrospector};

struct ThreadEntry {
    key: u64,
    name: String,
}

static THREAD_REGISTRY: Mutex<Vec<ThreadEntry>> = parking_lot::const_mutex(Vec::new());

/// Register the calling thread under `name`.
/// Call this from thread startup (e.g. tokio's `on_thread_start`) and pair
/// it with [`deregister_thread`], or use [`register_thread_guard`].
pub fn register_thread(name: &str) {
    let key = current_key();
    let mut reg = THREAD_REGISTRY.lock();
    reg.retain(|e| e.key != key);
    reg.push(ThreadEntry {
        key,
        name: name.to_string(),
    });
}

/// Deregister the calling thread.
/// Call this from thread teardown (e.g. tokio's `on_thread_stop`).
pub fn deregister_thread() {
    let key = current_key();
    THREAD_REGISTRY.lock().retain(|e| e.key != key);
}

/// RAII guard that deregisters the thread on drop.
pub struct ThreadGuard(());

impl Drop for ThreadGuard {
    fn drop(&mut self) {
        deregister_thread();
    }
}

/// Register the calling thread and return a guard that deregisters on drop.
pub fn register_thread_guard(name: &str) -> ThreadGuard {
    register_thread(name);
    ThreadGuard(())
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn registered_name(key: u64) -> Option<String> {
    THREAD_REGISTRY
        .lock()
        .iter()
        .find(|e| e.key == key)
        .map(|e| e.name.clone())
}

/// Forget registrations whose thread is not in `live` (sorted ascending).
/// Threads that exit without deregistering would otherwise lend their name
/// to whichever thread later reuses the id.
#[cfg(target_os = "linux")]
pub(crate) fn retain_live(live: &[u64]) {
    THREAD_REGISTRY
        .lock()
        .retain(|e| live.binary_search(&e.key).is_ok());
}

fn registered() -> Vec<ThreadCandidate> {
    THREAD_REGISTRY
        .lock()
        .iter()
        .map(|e| ThreadCandidate {
            key: e.key,
            name: Some(e.name.clone()),
        })
        .collect()
}

/// Samples the calling thread plus every registered thread.
pub struct RegistryIntrospector {
    config: CaptureConfig,
    sources: SourceCache,
}

impl RegistryIntrospector {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config: config.clamped(),
            sources: SourceCache::new(),
        }
    }
}

impl Default for RegistryIntrospector {
    fn default() -> Self {
        Self::new(CaptureConfig::from_env())
    }
}

impl ThreadIntrospector for RegistryIntrospector {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        let mut threads = registered();
        let self_key = current_key();
        if !threads.iter().any(|t| t.key == self_key) {
            threads.insert(
                0,
                ThreadCandidate {
                    key: self_key,
                    name: std::thread::current().name().map(str::to_owned),
                },
            );
        }
        collect(threads, &self.config, &self.sources)
    }
}
