use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::SLOT_FRAMES;

pub const MAX_FRAMES_ENV: &str = "THREADTRACE_MAX_FRAMES";
pub const TIMEOUT_MS_ENV: &str = "THREADTRACE_TIMEOUT_MS";
pub const POLL_MS_ENV: &str = "THREADTRACE_POLL_MS";
pub const SOURCE_LINES_ENV: &str = "THREADTRACE_SOURCE_LINES";

const DEFAULT_MAX_FRAMES: usize = 128;
const DEFAULT_TIMEOUT_MS: u64 = 100;
const DEFAULT_POLL_MS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Frames kept per thread, counted from the innermost one. Capped at the
    /// slot capacity.
    pub max_frames: usize,
    /// How long to wait for signalled threads to answer.
    pub sample_timeout: Duration,
    /// Sleep between checks for answers.
    pub poll_interval: Duration,
    /// Whether to read source files to attach the executing line.
    pub source_lines: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            sample_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            source_lines: true,
        }
    }
}

impl CaptureConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unparsable values are
    /// reported and replaced by the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let max_frames = parse_or(&lookup, MAX_FRAMES_ENV, defaults.max_frames);
        let timeout_ms = parse_or(&lookup, TIMEOUT_MS_ENV, DEFAULT_TIMEOUT_MS);
        let poll_ms = parse_or(&lookup, POLL_MS_ENV, DEFAULT_POLL_MS);
        let source_lines = match lookup(SOURCE_LINES_ENV).as_deref().map(str::trim) {
            None => defaults.source_lines,
            Some("0" | "false" | "off" | "no") => false,
            Some("1" | "true" | "on" | "yes") => true,
            Some(other) => {
                warn!(key = SOURCE_LINES_ENV, value = other, "ignoring unrecognized boolean");
                defaults.source_lines
            }
        };

        Self {
            max_frames,
            sample_timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(poll_ms),
            source_lines,
        }
        .clamped()
    }

    pub(crate) fn clamped(mut self) -> Self {
        self.max_frames = self.max_frames.clamp(1, SLOT_FRAMES);
        if self.poll_interval.is_zero() {
            self.poll_interval = Duration::from_millis(1);
        }
        self
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(key, value = %raw, %e, "ignoring unparsable setting");
            default
        }
    }
}
