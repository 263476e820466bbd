use std::io::{self, Write};

use threadtrace_capture::{CaptureError, ThreadIntrospector};
use threadtrace_types::StackSnapshot;

use crate::TraceError;
use crate::render::render_lines;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceOptions {
    /// Write the lines to the sink and return nothing, instead of returning
    /// them.
    pub print_output: bool,
    /// Exit the process with status 0 once everything else is done, on every
    /// path including errors and panics.
    pub quit_after: bool,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            print_output: true,
            quit_after: false,
        }
    }
}

/// Exits the process when dropped, if armed.
///
/// Created before any work so that early returns and unwinding still reach
/// the exit.
pub(crate) struct ExitGuard {
    armed: bool,
}

impl ExitGuard {
    pub(crate) fn arm(armed: bool) -> Self {
        Self { armed }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = io::stdout().flush();
            let _ = io::stderr().flush();
            std::process::exit(0);
        }
    }
}

/// Captures and renders stacks through an injected [`ThreadIntrospector`].
pub struct Tracer<I> {
    introspector: I,
}

impl<I: ThreadIntrospector> Tracer<I> {
    pub fn new(introspector: I) -> Self {
        Self { introspector }
    }

    pub fn introspector(&self) -> &I {
        &self.introspector
    }

    pub fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
        self.introspector.snapshot()
    }

    pub fn lines(&self) -> Result<Vec<String>, CaptureError> {
        Ok(render_lines(&self.snapshot()?))
    }

    /// Capture every thread's stack, then either write the lines to `out`
    /// (returning `None`) or hand them back.
    pub fn run<W: Write>(
        &self,
        options: TraceOptions,
        out: W,
    ) -> Result<Option<Vec<String>>, TraceError> {
        let _exit = ExitGuard::arm(options.quit_after);
        // Declared after the guard so it is dropped (and flushed) first.
        let mut out = out;

        let lines = self.lines()?;
        if !options.print_output {
            return Ok(Some(lines));
        }
        write_lines(&mut out, &lines)?;
        Ok(None)
    }
}

pub(crate) fn write_lines<W: Write>(out: &mut W, lines: &[String]) -> io::Result<()> {
    for line in lines {
        writeln!(out, "{line}")?;
    }
    out.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadtrace_capture::UnsupportedIntrospector;
    use threadtrace_types::{FrameEntry, ThreadId, ThreadStack};

    struct FixedIntrospector(StackSnapshot);

    impl ThreadIntrospector for FixedIntrospector {
        fn snapshot(&self) -> Result<StackSnapshot, CaptureError> {
            Ok(self.0.clone())
        }
    }

    fn frame(file: &str, line: u32, scope: &str, source: Option<&str>) -> FrameEntry {
        let frame = FrameEntry::new(file, line, scope).unwrap();
        match source {
            Some(text) => frame.with_source(text),
            None => frame,
        }
    }

    fn two_thread_snapshot() -> StackSnapshot {
        StackSnapshot::new(
            99,
            0,
            vec![
                ThreadStack::captured(
                    ThreadId::new(101).unwrap(),
                    Some("main".to_string()),
                    vec![
                        frame("src/main.rs", 20, "app::main", Some("    run_jobs();")),
                        frame("src/jobs.rs", 7, "app::jobs::run_jobs", Some("   \t ")),
                        frame("<unknown>", 0, "0x7f0012345678", None),
                    ],
                ),
                ThreadStack::timed_out(ThreadId::new(102).unwrap(), Some("stuck".to_string())),
                ThreadStack::captured(
                    ThreadId::new(103).unwrap(),
                    None,
                    vec![frame("src/worker.rs", 3, "app::worker", Some("loop { park(); }"))],
                ),
            ],
        )
    }

    #[test]
    fn renders_headers_frames_and_trimmed_sources() {
        let tracer = Tracer::new(FixedIntrospector(two_thread_snapshot()));
        let lines = tracer.lines().unwrap();
        insta::assert_debug_snapshot!(lines, @r#"
        [
            "\n# ThreadID: 101",
            "File: \"src/main.rs\", line 20, in app::main",
            "  run_jobs();",
            "File: \"src/jobs.rs\", line 7, in app::jobs::run_jobs",
            "File: \"<unknown>\", line 0, in 0x7f0012345678",
            "\n# ThreadID: 102",
            "\n# ThreadID: 103",
            "File: \"src/worker.rs\", line 3, in app::worker",
            "  loop { park(); }",
        ]
        "#);
    }

    #[test]
    fn returning_and_printing_carry_the_same_lines() {
        let tracer = Tracer::new(FixedIntrospector(two_thread_snapshot()));

        let returned = tracer
            .run(
                TraceOptions {
                    print_output: false,
                    quit_after: false,
                },
                io::sink(),
            )
            .unwrap()
            .expect("lines must be returned when not printing");

        let mut printed = Vec::new();
        let result = tracer
            .run(TraceOptions::default(), &mut printed)
            .unwrap();
        assert_eq!(result, None);

        let printed = String::from_utf8(printed).unwrap();
        let expected: String = returned.iter().map(|l| format!("{l}\n")).collect();
        assert_eq!(printed, expected);
    }

    #[test]
    fn returned_lines_do_not_touch_the_sink() {
        let tracer = Tracer::new(FixedIntrospector(two_thread_snapshot()));
        let mut sink = Vec::new();
        let options = TraceOptions {
            print_output: false,
            quit_after: false,
        };
        let lines = tracer.run(options, &mut sink).unwrap().unwrap();
        assert!(!lines.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn introspection_failure_is_an_error_not_an_empty_trace() {
        let tracer = Tracer::new(UnsupportedIntrospector);
        let err = tracer
            .run(
                TraceOptions {
                    print_output: false,
                    quit_after: false,
                },
                io::sink(),
            )
            .expect_err("unsupported platform must fail");
        assert!(matches!(
            err,
            TraceError::Capture(CaptureError::DiagnosticsUnavailable { .. })
        ));
    }

    #[test]
    fn write_errors_surface_as_output_errors() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let tracer = Tracer::new(FixedIntrospector(two_thread_snapshot()));
        let err = tracer.run(TraceOptions::default(), Broken).unwrap_err();
        assert!(matches!(err, TraceError::Output(ref e) if e.kind() == io::ErrorKind::BrokenPipe));
    }

    #[test]
    fn empty_thread_stack_still_gets_a_header() {
        let snapshot = StackSnapshot::new(
            1,
            0,
            vec![ThreadStack::captured(ThreadId::new(5).unwrap(), None, Vec::new())],
        );
        let lines = Tracer::new(FixedIntrospector(snapshot)).lines().unwrap();
        assert_eq!(lines, vec!["\n# ThreadID: 5".to_string()]);
    }
}
