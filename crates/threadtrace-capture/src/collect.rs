use threadtrace_types::{StackSnapshot, ThreadId, ThreadStack};
use tracing::{debug, warn};

use crate::signal::{SampleOutcome, current_key, sample_threads};
use crate::symbolize::{resolve_frames, trace_current};
use crate::{CaptureConfig, CaptureError, SLOT_FRAMES, SourceCache, unix_millis_now};

/// A thread found by enumeration, not yet sampled.
pub(crate) struct ThreadCandidate {
    pub key: u64,
    pub name: Option<String>,
}

/// Sample `threads` and assemble a snapshot in the same order.
///
/// The calling thread is walked directly; all others go through `SIGPROF`.
/// Threads that vanished before they could be signalled are left out.
pub(crate) fn collect(
    threads: Vec<ThreadCandidate>,
    config: &CaptureConfig,
    sources: &SourceCache,
) -> Result<StackSnapshot, CaptureError> {
    let self_key = current_key();
    let own_ips = trace_current(SLOT_FRAMES);

    let others: Vec<u64> = threads
        .iter()
        .map(|t| t.key)
        .filter(|&key| key != self_key)
        .collect();
    let mut outcomes = sample_threads(&others, config)?.into_iter();

    let mut stacks = Vec::with_capacity(threads.len());
    for candidate in threads {
        let outcome = if candidate.key == self_key {
            SampleOutcome::Captured(own_ips.clone())
        } else {
            outcomes.next().unwrap_or(SampleOutcome::Vanished)
        };

        let Ok(thread_id) = ThreadId::new(candidate.key) else {
            warn!(key = candidate.key, "skipping thread with a zero id");
            continue;
        };

        match outcome {
            SampleOutcome::Captured(ips) => {
                let frames = resolve_frames(&ips, config, sources);
                stacks.push(ThreadStack::captured(thread_id, candidate.name, frames));
            }
            SampleOutcome::TimedOut => {
                stacks.push(ThreadStack::timed_out(thread_id, candidate.name));
            }
            SampleOutcome::Vanished => {
                debug!(%thread_id, "dropping thread that exited mid-capture");
            }
        }
    }

    Ok(StackSnapshot::new(
        std::process::id(),
        unix_millis_now(),
        stacks,
    ))
}
