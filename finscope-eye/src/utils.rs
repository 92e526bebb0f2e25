//! Utility functions shared by recording and snapshots

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Local time with millisecond resolution, safe for file names.
pub fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// Create `<dir>/<stem>_<timestamp>.<ext>` without ever replacing an existing file.
///
/// The directory is created if absent. On a name clash a numeric suffix is
/// appended until a free name is found.
pub fn create_unique_file(dir: &Path, stem: &str, ext: &str) -> io::Result<(File, PathBuf)> {
    fs::create_dir_all(dir)?;
    let base = format!("{}_{}", stem, file_timestamp());

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{}.{}", base, ext)
        } else {
            format!("{}_{}.{}", base, attempt, ext)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("No free file name for {:?} in {:?}", base, dir),
    ))
}

/// Spawn a named thread that keeps the caller's tracing subscriber.
pub(crate) fn spawn_thread<F, T>(name: impl Into<String>, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_files_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for _ in 0..5 {
            let (_file, path) = create_unique_file(dir.path(), "reef_detected", "mjpeg").unwrap();
            paths.push(path);
        }
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 5);
        for path in &paths {
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("reef_detected_"));
            assert!(name.ends_with(".mjpeg"));
        }
    }

    #[test]
    fn test_creates_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let (_file, path) = create_unique_file(&nested, "cam", "jpg").unwrap();
        assert!(path.starts_with(&nested));
        assert!(path.exists());
    }

    #[test]
    fn test_timestamp_has_millis() {
        let ts = file_timestamp();
        // YYYYmmdd_HHMMSS_mmm
        assert_eq!(ts.len(), 19);
        assert_eq!(ts.matches('_').count(), 2);
    }
}
