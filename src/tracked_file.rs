//! A watched file with content-hash change detection.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Semantic category assigned by the categorizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Settings,
    Context,
    Task,
    Requirement,
    SubFolder,
    Ignored,
}

#[derive(Debug)]
struct HashState {
    hash: String,
    modified: bool,
}

/// Identity is the absolute path. The hash/modified pair is guarded by a
/// mutex: the watcher thread rechecks hashes while the tick thread reads
/// content, and both transitions must serialize per file.
#[derive(Debug)]
pub struct TrackedFile {
    path: PathBuf,
    category: FileCategory,
    state: Mutex<HashState>,
}

impl TrackedFile {
    /// Track a file. The initial hash is computed immediately and the file
    /// starts out marked modified so it gets picked up on the next tick.
    pub fn new(path: impl Into<PathBuf>, category: FileCategory) -> Self {
        let path = path.into();
        let hash = compute_file_hash(&path);
        Self {
            path,
            category,
            state: Mutex::new(HashState {
                hash,
                modified: true,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub const fn category(&self) -> FileCategory {
        self.category
    }

    pub fn is_modified(&self) -> bool {
        self.state.lock().expect("tracked file lock poisoned").modified
    }

    pub fn set_modified(&self, modified: bool) {
        self.state.lock().expect("tracked file lock poisoned").modified = modified;
    }

    /// Read the file content and clear the modified flag. The flag stays
    /// untouched when the read fails so the file is retried later.
    pub fn content_and_clear_modified(&self) -> Option<String> {
        let mut state = self.state.lock().expect("tracked file lock poisoned");
        match std::fs::read_to_string(&self.path) {
            Ok(content) => {
                state.modified = false;
                Some(content)
            }
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "failed to read tracked file");
                None
            }
        }
    }

    /// Recompute the content hash. On a real change the new hash is stored,
    /// the modified flag is set, and true is returned.
    pub fn check_content_changed(&self) -> bool {
        let mut state = self.state.lock().expect("tracked file lock poisoned");
        let new_hash = compute_file_hash(&self.path);
        if new_hash != state.hash {
            state.hash = new_hash;
            state.modified = true;
            return true;
        }
        false
    }

    /// Last-write time, if the file still exists.
    pub fn last_write_time(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path).and_then(|m| m.modified()).ok()
    }

    #[cfg(test)]
    pub(crate) fn current_hash(&self) -> String {
        self.state.lock().expect("tracked file lock poisoned").hash.clone()
    }
}

/// SHA-256 of the file content as lowercase hex. Unreadable files hash to
/// the empty string, which can never collide with a real digest.
fn compute_file_hash(path: &Path) -> String {
    let Ok(data) = std::fs::read(path) else {
        return String::new();
    };
    let digest = Sha256::digest(&data);
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tracked(temp: &TempDir, name: &str, contents: &str) -> TrackedFile {
        let path = temp.path().join(name);
        std::fs::write(&path, contents).expect("write file");
        TrackedFile::new(path, FileCategory::Requirement)
    }

    #[test]
    fn new_file_starts_modified_with_hash() {
        let temp = TempDir::new().expect("tempdir");
        let file = tracked(&temp, "r.txt", "hello");
        assert!(file.is_modified());
        assert_eq!(file.current_hash().len(), 64);
    }

    #[test]
    fn reading_content_clears_modified() {
        let temp = TempDir::new().expect("tempdir");
        let file = tracked(&temp, "r.txt", "hello");
        assert_eq!(file.content_and_clear_modified().as_deref(), Some("hello"));
        assert!(!file.is_modified());
    }

    #[test]
    fn unchanged_content_is_not_a_change() {
        let temp = TempDir::new().expect("tempdir");
        let file = tracked(&temp, "r.txt", "same");
        file.content_and_clear_modified();

        // touch without changing bytes
        std::fs::write(file.path(), "same").expect("rewrite");
        assert!(!file.check_content_changed());
        assert!(!file.is_modified());
    }

    #[test]
    fn changed_content_sets_modified() {
        let temp = TempDir::new().expect("tempdir");
        let file = tracked(&temp, "r.txt", "one");
        file.content_and_clear_modified();

        std::fs::write(file.path(), "two").expect("rewrite");
        assert!(file.check_content_changed());
        assert!(file.is_modified());
    }

    #[test]
    fn failed_read_keeps_modified_flag() {
        let temp = TempDir::new().expect("tempdir");
        let file = tracked(&temp, "r.txt", "data");
        std::fs::remove_file(file.path()).expect("remove");
        assert!(file.content_and_clear_modified().is_none());
        assert!(file.is_modified());
    }
}
