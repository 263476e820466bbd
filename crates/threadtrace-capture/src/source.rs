//! Source-line lookup for resolved frames.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// Lines of source files read so far, keyed by path.
///
/// Files that could not be read are remembered as `None` so each capture
/// hits the filesystem at most once per path.
#[derive(Default)]
pub struct SourceCache {
    files: Mutex<HashMap<PathBuf, Option<Arc<[String]>>>>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the 1-based `line` of `path`, untrimmed, or `None` if the file
    /// or line does not exist.
    pub fn line(&self, path: &Path, line: u32) -> Option<String> {
        let index = usize::try_from(line).ok()?.checked_sub(1)?;
        let lines = self.lines(path)?;
        lines.get(index).cloned()
    }

    fn lines(&self, path: &Path) -> Option<Arc<[String]>> {
        let mut files = self.files.lock();
        if let Some(cached) = files.get(path) {
            return cached.clone();
        }

        let loaded = match std::fs::read(path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                Some(text.lines().map(str::to_owned).collect::<Arc<[String]>>())
            }
            Err(e) => {
                debug!(path = %path.display(), %e, "source file unavailable");
                None
            }
        };
        files.insert(path.to_path_buf(), loaded.clone());
        loaded
    }

    pub fn clear(&self) {
        self.files.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("threadtrace-source-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("scratch dir must be creatable");
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("scratch file must be writable");
        path
    }

    #[test]
    fn reads_one_based_lines() {
        let path = scratch_file("lines.rs", "fn main() {\n    work();\n}\n");
        let cache = SourceCache::new();
        assert_eq!(cache.line(&path, 1).as_deref(), Some("fn main() {"));
        assert_eq!(cache.line(&path, 2).as_deref(), Some("    work();"));
        assert_eq!(cache.line(&path, 0), None);
        assert_eq!(cache.line(&path, 4), None);
    }

    #[test]
    fn remembers_file_contents_after_first_read() {
        let path = scratch_file("cached.rs", "first\n");
        let cache = SourceCache::new();
        assert_eq!(cache.line(&path, 1).as_deref(), Some("first"));

        std::fs::write(&path, "second\n").unwrap();
        assert_eq!(cache.line(&path, 1).as_deref(), Some("first"));

        cache.clear();
        assert_eq!(cache.line(&path, 1).as_deref(), Some("second"));
    }

    #[test]
    fn missing_files_yield_none() {
        let cache = SourceCache::new();
        let path = Path::new("/nonexistent/threadtrace/never.rs");
        assert_eq!(cache.line(path, 1), None);
        assert_eq!(cache.line(path, 1), None);
    }
}
