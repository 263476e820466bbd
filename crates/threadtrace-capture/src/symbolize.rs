//! Turning raw instruction pointers into [`FrameEntry`] values.

use std::ffi::c_void;
use std::path::PathBuf;

use threadtrace_types::FrameEntry;

use crate::{CaptureConfig, SLOT_FRAMES};
use crate::source::SourceCache;

pub(crate) const UNKNOWN_FILE: &str = "<unknown>";

/// Leading path segments of frames that belong to the capture itself: the
/// unwinder and this crate, including trait impls on this crate's types.
const MACHINERY_PREFIXES: &[&str] = &[
    "backtrace::",
    "<backtrace::",
    "threadtrace_capture::",
    "<threadtrace_capture::",
];

/// Blanket impls such as `<&T as ThreadIntrospector>` demangle with a
/// foreign self type, so they are matched by the trait path instead.
const MACHINERY_TRAIT: &str = " as threadtrace_capture::";

/// Signal-return trampolines, matched by exact name.
const TRAMPOLINES: &[&str] = &["__restore_rt", "__kernel_rt_sigreturn", "_sigtramp"];

/// Machinery frames only ever sit at the innermost end of a stack; don't
/// look further than this for them.
const TRIM_WINDOW: usize = 48;

struct Resolved {
    file: Option<PathBuf>,
    line: u32,
    scope: String,
}

/// Collect the calling thread's instruction pointers, innermost first.
pub(crate) fn trace_current(max_frames: usize) -> Vec<usize> {
    let mut ips = Vec::with_capacity(max_frames.min(64));
    backtrace::trace(|frame| {
        let ip = frame.ip() as usize;
        if ip == 0 || ips.len() >= max_frames {
            return false;
        }
        ips.push(ip);
        true
    });
    ips
}

/// Resolve innermost-first `ips` into frames ordered outermost first, with
/// capture machinery removed and source lines attached. At most
/// `config.max_frames` of the innermost frames are kept.
pub(crate) fn resolve_frames(
    ips: &[usize],
    config: &CaptureConfig,
    sources: &SourceCache,
) -> Vec<FrameEntry> {
    let mut resolved = Vec::with_capacity(ips.len());
    // A zero ip is the unwinder's end marker, not a frame.
    for &ip in ips.iter().filter(|&&ip| ip != 0) {
        resolve_ip(ip, &mut resolved);
    }

    let mut frames: Vec<FrameEntry> = resolved
        .into_iter()
        .filter_map(|r| {
            let file = r
                .file
                .as_deref()
                .map(|p| p.display().to_string())
                .filter(|f| !f.is_empty())
                .unwrap_or_else(|| UNKNOWN_FILE.to_string());
            let frame = FrameEntry::new(file, r.line, r.scope).ok()?;
            if !config.source_lines || r.line == 0 {
                return Some(frame);
            }
            match r.file.as_deref().and_then(|p| sources.line(p, r.line)) {
                Some(text) => Some(frame.with_source(text)),
                None => Some(frame),
            }
        })
        .collect();

    trim_machinery(&mut frames);
    frames.truncate(config.max_frames);
    frames.reverse();
    frames
}

fn resolve_ip(ip: usize, out: &mut Vec<Resolved>) {
    let before = out.len();
    backtrace::resolve(ip as *mut c_void, |symbol| {
        let scope = symbol
            .name()
            .map(|name| format!("{name:#}"))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("0x{ip:x}"));
        out.push(Resolved {
            file: symbol.filename().map(|p| p.to_path_buf()),
            line: symbol.lineno().unwrap_or(0),
            scope,
        });
    });
    if out.len() == before {
        out.push(Resolved {
            file: None,
            line: 0,
            scope: format!("0x{ip:x}"),
        });
    }
}

fn is_machinery(scope: &str) -> bool {
    MACHINERY_PREFIXES.iter().any(|p| scope.starts_with(p))
        || scope.contains(MACHINERY_TRAIT)
        || TRAMPOLINES.contains(&scope)
}

/// Frames that can sit between machinery frames: the system unwinder,
/// closure-call shims, and addresses with no symbol.
fn is_unwind_glue(scope: &str) -> bool {
    scope.starts_with("_Unwind_")
        || scope.starts_with("core::ops::function::")
        || scope.starts_with("0x")
}

/// Drop the innermost run of capture machinery. `frames` is innermost first.
///
/// The run ends at the first frame that is neither machinery nor unwinder
/// glue; glue is only dropped when machinery sits beyond it.
pub(crate) fn trim_machinery(frames: &mut Vec<FrameEntry>) {
    let mut cut = 0;
    for (i, frame) in frames.iter().enumerate().take(TRIM_WINDOW) {
        if is_machinery(&frame.scope) {
            cut = i + 1;
        } else if !is_unwind_glue(&frame.scope) {
            break;
        }
    }
    frames.drain(..cut);
}
