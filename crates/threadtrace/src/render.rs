//! Text rendering of stack snapshots.
//!
//! ```text
//!
//! # ThreadID: 4242
//! File: "src/main.rs", line 12, in app::main
//!   worker.run();
//! ```

use threadtrace_types::{FrameEntry, StackSnapshot, ThreadId, ThreadStack};

/// Header line for one thread. Starts with a newline so printed dumps get a
/// blank line between threads.
pub fn thread_header(thread_id: ThreadId) -> String {
    format!("\n# ThreadID: {thread_id}")
}

pub fn frame_line(frame: &FrameEntry) -> String {
    format!(
        "File: \"{}\", line {}, in {}",
        frame.file, frame.line, frame.scope
    )
}

pub fn render_thread(stack: &ThreadStack, out: &mut Vec<String>) {
    out.push(thread_header(stack.thread_id));
    for frame in &stack.frames {
        out.push(frame_line(frame));
        if let Some(text) = frame.display_source() {
            out.push(format!("  {text}"));
        }
    }
}

/// Every thread's header and frames, in snapshot order.
pub fn render_lines(snapshot: &StackSnapshot) -> Vec<String> {
    let mut out = Vec::new();
    for stack in &snapshot.threads {
        render_thread(stack, &mut out);
    }
    out
}
