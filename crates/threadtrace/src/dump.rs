//! Snapshot dump files.
//!
//! A dump is a JSON file named `<process>-<pid>-<unix_ms>.json` holding one
//! [`DumpFile`]. Files are written under a temporary name and linked into
//! place, so readers never observe a partial dump and an existing dump is
//! never replaced.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use facet::Facet;
use threadtrace_types::StackSnapshot;
use tracing::{debug, warn};

pub const DEFAULT_DUMP_DIR: &str = "/tmp/threadtrace";
pub const DUMP_DIR_ENV: &str = "THREADTRACE_DUMP_DIR";

const DUMP_EXTENSION: &str = "json";
const MAX_NAME_ATTEMPTS: u32 = 1000;

#[derive(Facet, Debug, Clone, PartialEq, Eq)]
pub struct DumpFile {
    pub process_name: String,
    pub snapshot: StackSnapshot,
}

impl DumpFile {
    pub fn new(process_name: impl Into<String>, snapshot: StackSnapshot) -> Self {
        Self {
            process_name: process_name.into(),
            snapshot,
        }
    }

    pub fn file_name(&self) -> String {
        self.numbered_file_name(0)
    }

    /// `file_name` with `-<n>` before the extension for `n > 0`, used when
    /// several dumps land in the same millisecond.
    fn numbered_file_name(&self, n: u32) -> String {
        let stem = format!(
            "{}-{}-{}",
            sanitize(&self.process_name),
            self.snapshot.pid,
            self.snapshot.captured_at_unix_ms
        );
        if n == 0 {
            format!("{stem}.{DUMP_EXTENSION}")
        } else {
            format!("{stem}-{n}.{DUMP_EXTENSION}")
        }
    }
}

#[derive(Debug)]
pub enum DumpError {
    Io { path: PathBuf, source: io::Error },
    Encode(String),
    Decode { path: PathBuf, message: String },
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
            Self::Encode(message) => write!(f, "encode dump: {message}"),
            Self::Decode { path, message } => {
                write!(f, "decode dump {}: {message}", path.display())
            }
        }
    }
}

impl Error for DumpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> DumpError + '_ {
    move |source| DumpError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `$THREADTRACE_DUMP_DIR`, or [`DEFAULT_DUMP_DIR`].
pub fn dump_dir_from_env() -> PathBuf {
    std::env::var_os(DUMP_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DUMP_DIR))
}

/// Name of the running executable, for labelling dumps.
pub fn process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

/// Write `dump` into `dir` (created if needed) and return its path.
pub fn write_dump(dir: &Path, dump: &DumpFile) -> Result<PathBuf, DumpError> {
    std::fs::create_dir_all(dir).map_err(io_err(dir))?;

    let json = facet_json::to_string_pretty(dump).map_err(|e| DumpError::Encode(e.to_string()))?;
    static TMP_SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let tmp = dir.join(format!("{}.{seq}.tmp", dump.file_name()));
    std::fs::write(&tmp, json).map_err(io_err(&tmp))?;

    let published = publish(dir, dump, &tmp);
    let _ = std::fs::remove_file(&tmp);
    let path = published?;

    debug!(path = %path.display(), threads = dump.snapshot.threads.len(), "wrote stack dump");
    Ok(path)
}

/// Link the finished `tmp` file under the first free dump name. Linking
/// fails instead of replacing, so an existing dump is never overwritten.
fn publish(dir: &Path, dump: &DumpFile, tmp: &Path) -> Result<PathBuf, DumpError> {
    for n in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(dump.numbered_file_name(n));
        match std::fs::hard_link(tmp, &path) {
            Ok(()) => return Ok(path),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(io_err(&path)(e)),
        }
    }
    Err(DumpError::Io {
        path: dir.join(dump.file_name()),
        source: io::Error::new(
            io::ErrorKind::AlreadyExists,
            "every numbered dump name is taken",
        ),
    })
}

pub fn read_dump(path: &Path) -> Result<DumpFile, DumpError> {
    let text = std::fs::read_to_string(path).map_err(io_err(path))?;
    facet_json::from_str(&text).map_err(|e| DumpError::Decode {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn dump_paths(dir: &Path) -> Result<Vec<PathBuf>, DumpError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(dir)(e)),
    };
    Ok(entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == DUMP_EXTENSION))
        .collect())
}

/// Every readable dump in `dir`, oldest first. A missing directory holds no
/// dumps; files that fail to decode are skipped with a warning.
pub fn read_dumps(dir: &Path) -> Result<Vec<(PathBuf, DumpFile)>, DumpError> {
    let mut dumps = Vec::new();
    for path in dump_paths(dir)? {
        match read_dump(&path) {
            Ok(dump) => dumps.push((path, dump)),
            Err(e) => warn!(%e, "skipping unreadable dump"),
        }
    }
    dumps.sort_by_key(|(path, dump)| (dump.snapshot.captured_at_unix_ms, path.clone()));
    Ok(dumps)
}

/// Remove every dump file in `dir`, returning how many were removed.
pub fn clean_dumps(dir: &Path) -> Result<usize, DumpError> {
    let mut removed = 0;
    for path in dump_paths(dir)? {
        std::fs::remove_file(&path).map_err(io_err(&path))?;
        removed += 1;
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadtrace_types::{FrameEntry, ThreadId, ThreadStack};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "threadtrace-dump-{name}-{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn dump_at(captured_at_unix_ms: u64) -> DumpFile {
        let frames = vec![FrameEntry::new("src/main.rs", 4, "demo::main").unwrap()];
        DumpFile::new(
            "demo bin",
            StackSnapshot::new(
                77,
                captured_at_unix_ms,
                vec![ThreadStack::captured(ThreadId::new(77).unwrap(), None, frames)],
            ),
        )
    }

    #[test]
    fn file_names_are_filesystem_safe() {
        assert_eq!(dump_at(12).file_name(), "demo_bin-77-12.json");
        assert_eq!(DumpFile::new("", dump_at(1).snapshot).file_name(), "unknown-77-1.json");
    }

    #[test]
    fn written_dumps_are_read_back_oldest_first() {
        let dir = scratch_dir("read");
        let newer = write_dump(&dir, &dump_at(2_000)).unwrap();
        let older = write_dump(&dir, &dump_at(1_000)).unwrap();
        std::fs::write(dir.join("notes.txt"), "not a dump").unwrap();
        std::fs::write(dir.join("broken.json"), "{").unwrap();

        let dumps = read_dumps(&dir).unwrap();
        let paths: Vec<_> = dumps.iter().map(|(p, _)| p.clone()).collect();
        assert_eq!(paths, vec![older, newer]);
        assert_eq!(dumps[0].1, dump_at(1_000));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn same_millisecond_dumps_do_not_overwrite_each_other() {
        let dir = scratch_dir("collide");
        let first = write_dump(&dir, &dump_at(5)).unwrap();
        let second = write_dump(&dir, &dump_at(5)).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.file_name().unwrap(), "demo_bin-77-5.json");
        assert_eq!(second.file_name().unwrap(), "demo_bin-77-5-1.json");
        assert_eq!(read_dumps(&dir).unwrap().len(), 2);
        assert!(
            std::fs::read_dir(&dir)
                .unwrap()
                .all(|e| !e.unwrap().path().to_string_lossy().ends_with(".tmp")),
            "temporary files must be cleaned up"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_directory_has_no_dumps() {
        let dir = scratch_dir("missing");
        assert!(read_dumps(&dir).unwrap().is_empty());
        assert_eq!(clean_dumps(&dir).unwrap(), 0);
    }

    #[test]
    fn clean_removes_only_json_files() {
        let dir = scratch_dir("clean");
        write_dump(&dir, &dump_at(1)).unwrap();
        write_dump(&dir, &dump_at(2)).unwrap();
        std::fs::write(dir.join("keep.txt"), "keep").unwrap();

        assert_eq!(clean_dumps(&dir).unwrap(), 2);
        assert!(dir.join("keep.txt").exists());
        assert!(read_dumps(&dir).unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn decode_errors_name_the_file() {
        let dir = scratch_dir("decode");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "[1, 2").unwrap();

        let err = read_dump(&path).unwrap_err();
        assert!(matches!(err, DumpError::Decode { .. }));
        assert!(err.to_string().contains("bad.json"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
