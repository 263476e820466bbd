//! Thread enumeration through `/proc/self/task`.

use std::path::Path;

use threadtrace_types::StackSnapshot;
use tracing::debug;

use crate::collect::{ThreadCandidate, collect};
use crate::registry::{registered_name, retain_live};
use crate::{CaptureConfig, CaptureError, SourceCache, ThreadIntrospector};

const TASK_DIR: &str = "/proc/self/task";

/// Samples every thread of the process.
pub struct ProcfsIntrospector {
    config: CaptureConfig,
    sources: SourceCache,
}

impl ProcfsIntrospector {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config: config.clamped(),
            sources: SourceCache::new(),
        }
    }
}

impl Default for ProcfsIntrospector {
    fn default() -> Self {
        Self::new(CaptureConfig::from_env())
    }
}

impl ThreadIntrospector for ProcfsIntrospector {
    fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        let tids = list_tasks(Path::new(TASK_DIR))?;
        retain_live(&tids);
        let threads = tids
            .into_iter()
            .map(|tid| ThreadCandidate {
                key: tid,
                name: registered_name(tid).or_else(|| read_comm(tid)),
            })
            .collect();
        collect(threads, &self.config, &self.sources)
    }
}

/// Thread ids under `task_dir`, ascending.
fn list_tasks(task_dir: &Path) -> Result<Vec<u64>, CaptureError> {
    let entries = std::fs::read_dir(task_dir).map_err(|e| {
        CaptureError::unavailable(format!("cannot list {}: {e}", task_dir.display()))
    })?;

    let mut tids: Vec<u64> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
        .collect();
    tids.sort_unstable();

    if tids.is_empty() {
        return Err(CaptureError::unavailable(format!(
            "{} lists no threads",
            task_dir.display()
        )));
    }
    Ok(tids)
}

fn read_comm(tid: u64) -> Option<String> {
    let path = format!("{TASK_DIR}/{tid}/comm");
    match std::fs::read_to_string(&path) {
        Ok(name) => Some(name.trim_end().to_string()).filter(|n| !n.is_empty()),
        Err(e) => {
            debug!(tid, %e, "thread name unavailable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::current_key;

    #[test]
    fn lists_the_calling_thread() {
        let tids = list_tasks(Path::new(TASK_DIR)).unwrap();
        assert!(tids.contains(&current_key()));
        assert!(tids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn missing_task_dir_is_unavailable_not_empty() {
        let err = list_tasks(Path::new("/proc/self/no-such-task-dir")).expect_err("must fail");
        assert!(matches!(err, CaptureError::DiagnosticsUnavailable { .. }));
    }

    #[test]
    fn exited_threads_lose_their_registration() {
        let key = std::thread::spawn(|| {
            crate::register_thread("exits-registered");
            current_key()
        })
        .join()
        .unwrap();
        assert_eq!(registered_name(key).as_deref(), Some("exits-registered"));

        // The task directory can outlive the join by a moment.
        let introspector = ProcfsIntrospector::new(CaptureConfig::default());
        for _ in 0..50 {
            introspector.snapshot().unwrap();
            if registered_name(key).is_none() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert_eq!(registered_name(key), None);
    }

    #[test]
    fn comm_names_the_thread() {
        let handle = std::thread::Builder::new()
            .name("comm-probe".to_string())
            .spawn(|| read_comm(current_key()))
            .unwrap();
        assert_eq!(handle.join().unwrap().as_deref(), Some("comm-probe"));
    }
}
