use facet::Facet;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    ZeroId(&'static str),
    EmptyField(&'static str),
}

impl fmt::Display for InvariantError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroId(field) => write!(f, "{field} must be non-zero"),
            Self::EmptyField(field) => write!(f, "{field} must be non-empty"),
        }
    }
}

impl Error for InvariantError {}

/// Opaque, display-only thread handle.
///
/// On Linux this is the kernel TID; elsewhere it is the `pthread_t` value.
/// Distinct among threads that are alive at the same moment, but never
/// guaranteed stable across captures.
#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[facet(transparent)]
pub struct ThreadId(u64);

impl ThreadId {
    pub fn new(value: u64) -> Result<Self, InvariantError> {
        if value == 0 {
            return Err(InvariantError::ZeroId("thread_id"));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stack level.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    pub file: String,
    pub line: u32,
    /// Enclosing function, demangled and without the trailing hash.
    pub scope: String,
    /// Literal source line, as read from disk (untrimmed).
    pub source: Option<String>,
}

impl FrameEntry {
    pub fn new(
        file: impl Into<String>,
        line: u32,
        scope: impl Into<String>,
    ) -> Result<Self, InvariantError> {
        let file = file.into();
        if file.is_empty() {
            return Err(InvariantError::EmptyField("file"));
        }
        let scope = scope.into();
        if scope.is_empty() {
            return Err(InvariantError::EmptyField("scope"));
        }
        Ok(Self {
            file,
            line,
            scope,
            source: None,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The source text to show under the frame, if there is any worth showing.
    pub fn display_source(&self) -> Option<&str> {
        self.source
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

#[derive(Facet, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[facet(rename_all = "snake_case")]
pub enum StackStatus {
    /// Frames were collected.
    Captured,
    /// The thread never answered the sampling signal (blocked it, or is stuck
    /// in an uninterruptible syscall).
    TimedOut,
}

/// A single thread's call stack, outermost frame first.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct ThreadStack {
    pub thread_id: ThreadId,
    pub name: Option<String>,
    pub status: StackStatus,
    pub frames: Vec<FrameEntry>,
}

impl ThreadStack {
    pub fn captured(thread_id: ThreadId, name: Option<String>, frames: Vec<FrameEntry>) -> Self {
        Self {
            thread_id,
            name,
            status: StackStatus::Captured,
            frames,
        }
    }

    pub fn timed_out(thread_id: ThreadId, name: Option<String>) -> Self {
        Self {
            thread_id,
            name,
            status: StackStatus::TimedOut,
            frames: Vec::new(),
        }
    }
}

/// Every live thread's stack at one moment, in enumeration order.
#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct StackSnapshot {
    pub pid: u32,
    pub captured_at_unix_ms: u64,
    pub threads: Vec<ThreadStack>,
}

impl StackSnapshot {
    pub fn new(pid: u32, captured_at_unix_ms: u64, threads: Vec<ThreadStack>) -> Self {
        Self {
            pid,
            captured_at_unix_ms,
            threads,
        }
    }

    pub fn thread(&self, thread_id: ThreadId) -> Option<&ThreadStack> {
        self.threads.iter().find(|t| t.thread_id == thread_id)
    }

    pub fn timed_out_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| t.status == StackStatus::TimedOut)
            .count()
    }
}
