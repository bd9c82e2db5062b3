//! File classification and per-category tracking.
//!
//! Every path the watcher reports is assigned to exactly one category. Each
//! category keeps its own set of tracked files together with a sticky dirty
//! flag and a counter of members whose modified flag is set; the counter
//! equals `|{f : f.modified}|` at every quiescent point.

use crate::prob::parse_prob_filename;
use crate::startup;
use crate::tracked_file::{FileCategory, TrackedFile};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

const MAGIC_SIGNATURES: &[&[u8]] = &[
    &[0x50, 0x4B, 0x03, 0x04], // ZIP / DOCX / XLSX / ODT
    &[0x89, 0x50, 0x4E, 0x47], // PNG
    &[0x25, 0x50, 0x44, 0x46], // PDF
    &[0xFF, 0xD8, 0xFF],       // JPEG
    &[0x47, 0x49, 0x46, 0x38], // GIF
    &[0x42, 0x4D],             // BMP
    &[0x7F, 0x45, 0x4C, 0x46], // ELF
    &[0x4D, 0x5A],             // Windows PE
];

const TEXT_SAMPLE_BYTES: usize = 256;
const MAX_NON_TEXT_RATIO: f64 = 0.10;

#[derive(Debug, Default)]
struct SetInner {
    files: BTreeMap<String, TrackedFile>,
    dirty: bool,
    modified_count: usize,
}

/// One category's files, guarded by its own mutex.
#[derive(Debug, Default)]
pub struct TrackedFileSet {
    inner: Mutex<SetInner>,
}

impl TrackedFileSet {
    fn lock(&self) -> std::sync::MutexGuard<'_, SetInner> {
        self.inner.lock().expect("tracked file set lock poisoned")
    }

    fn insert(&self, file: TrackedFile) {
        let mut inner = self.lock();
        let key = file.path().to_string_lossy().into_owned();
        let incoming_modified = file.is_modified();
        if let Some(old) = inner.files.insert(key, file) {
            if old.is_modified() {
                inner.modified_count -= 1;
            }
        }
        if incoming_modified {
            inner.modified_count += 1;
        }
        inner.dirty = true;
    }

    fn remove(&self, path: &str) -> bool {
        let mut inner = self.lock();
        if let Some(file) = inner.files.remove(path) {
            if file.is_modified() {
                inner.modified_count -= 1;
            }
            inner.dirty = true;
            return true;
        }
        false
    }

    /// Rehash a member file. `None` when the path is not tracked here;
    /// otherwise whether the content actually changed. The modified counter
    /// is incremented only on a false-to-true flag transition.
    fn recheck(&self, path: &str) -> Option<bool> {
        let mut inner = self.lock();
        // lock order: set mutex first, then the file mutex
        let (was_modified, changed) = {
            let file = inner.files.get(path)?;
            let was_modified = file.is_modified();
            (was_modified, file.check_content_changed())
        };
        if changed {
            if !was_modified {
                inner.modified_count += 1;
            }
            inner.dirty = true;
        }
        Some(changed)
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    pub fn clear_dirty(&self) {
        self.lock().dirty = false;
    }

    pub fn modified_count(&self) -> usize {
        self.lock().modified_count
    }

    pub fn len(&self) -> usize {
        self.lock().files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().files.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().files.contains_key(path.to_string_lossy().as_ref())
    }

    /// Concatenate every member's content in path order, clearing modified
    /// flags as content is read and decrementing the counter for each
    /// cleared file. Unreadable members are skipped and stay modified.
    pub fn collect_content(&self) -> String {
        let mut inner = self.lock();
        let mut combined = String::new();
        let mut cleared = 0usize;
        for file in inner.files.values() {
            let was_modified = file.is_modified();
            if let Some(content) = file.content_and_clear_modified() {
                combined.push_str(&content);
                if was_modified {
                    cleared += 1;
                }
            }
        }
        inner.modified_count -= cleared;
        combined
    }

    /// Newest last-write time across members.
    pub fn newest_write_time(&self) -> Option<SystemTime> {
        self.lock()
            .files
            .values()
            .filter_map(TrackedFile::last_write_time)
            .max()
    }

    /// Mark every member modified so it gets reconsidered, bumping the
    /// counter for each false-to-true transition.
    pub fn mark_all_modified(&self) {
        let mut inner = self.lock();
        let mut newly = 0usize;
        for file in inner.files.values() {
            if !file.is_modified() {
                file.set_modified(true);
                newly += 1;
            }
        }
        if newly > 0 {
            inner.modified_count += newly;
            inner.dirty = true;
        }
    }

    /// Visit each currently-modified member. After a visit the member's
    /// flag is cleared and the counter decremented, whether or not the
    /// visitor already consumed the content: the file has been considered.
    /// A visitor returning false stops the walk before its file is
    /// considered, leaving that file modified for a later tick.
    pub fn take_modified(&self, mut visit: impl FnMut(&TrackedFile) -> bool) {
        let mut inner = self.lock();
        let mut considered = 0usize;
        for file in inner.files.values() {
            if !file.is_modified() {
                continue;
            }
            if !visit(file) {
                break;
            }
            file.set_modified(false);
            considered += 1;
        }
        inner.modified_count -= considered;
    }
}

/// All six category sets. A path lives in at most one of them.
#[derive(Debug, Default)]
pub struct CategorizedFiles {
    pub settings: TrackedFileSet,
    pub context: TrackedFileSet,
    pub tasks: TrackedFileSet,
    pub requirements: TrackedFileSet,
    pub subfolders: TrackedFileSet,
    pub ignored: TrackedFileSet,
}

impl CategorizedFiles {
    fn set_for(&self, category: FileCategory) -> &TrackedFileSet {
        match category {
            FileCategory::Settings => &self.settings,
            FileCategory::Context => &self.context,
            FileCategory::Task => &self.tasks,
            FileCategory::Requirement => &self.requirements,
            FileCategory::SubFolder => &self.subfolders,
            FileCategory::Ignored => &self.ignored,
        }
    }

    /// Sets in the fixed lock order.
    fn all_sets(&self) -> [&TrackedFileSet; 6] {
        [
            &self.settings,
            &self.context,
            &self.tasks,
            &self.requirements,
            &self.subfolders,
            &self.ignored,
        ]
    }
}

/// Classifies paths and maintains the per-category sets for one session.
#[derive(Debug)]
pub struct FileCategorizer {
    files: CategorizedFiles,
    max_file_size_kb: u64,
    startup_ns: i64,
}

impl FileCategorizer {
    pub fn new(max_file_size_kb: u64) -> Self {
        Self::with_startup_timestamp(max_file_size_kb, startup::timestamp_ns())
    }

    /// Fixed startup timestamp, used by tests to make classification
    /// deterministic.
    pub fn with_startup_timestamp(max_file_size_kb: u64, startup_ns: i64) -> Self {
        Self {
            files: CategorizedFiles::default(),
            max_file_size_kb,
            startup_ns,
        }
    }

    pub fn categorized(&self) -> &CategorizedFiles {
        &self.files
    }

    /// Track a newly discovered path.
    pub fn add_file(&self, path: &Path) -> PathBuf {
        // a re-added path may have changed category; keep single-set membership
        self.remove_from_all(path);

        let category = self.categorize(path);
        let file = TrackedFile::new(path, category);
        self.files.set_for(category).insert(file);
        path.to_path_buf()
    }

    /// Re-check a path the watcher saw change. Returns `None` for ignored
    /// files, the path otherwise.
    pub fn modify_file(&self, path: &Path) -> Option<PathBuf> {
        let category = self.categorize(path);
        if category == FileCategory::Ignored {
            return None;
        }

        let key = path.to_string_lossy();
        match self.files.set_for(category).recheck(&key) {
            Some(true) => {
                tracing::info!(path = %path.display(), "tracked file content changed");
            }
            Some(false) => {}
            None => {
                tracing::warn!(path = %path.display(), "file not tracked yet (could be newly added)");
            }
        }
        Some(path.to_path_buf())
    }

    /// Forget a removed path wherever it lives.
    pub fn remove_file(&self, path: &Path) -> PathBuf {
        if self.remove_from_all(path) {
            tracing::info!(path = %path.display(), "removed tracked file");
        }
        path.to_path_buf()
    }

    fn remove_from_all(&self, path: &Path) -> bool {
        let key = path.to_string_lossy();
        let mut removed = false;
        for set in self.files.all_sets() {
            removed |= set.remove(&key);
        }
        removed
    }

    /// Classification rules, evaluated top to bottom.
    pub fn categorize(&self, path: &Path) -> FileCategory {
        if path.is_dir() {
            return FileCategory::SubFolder;
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        // our own writebacks; checked before the PROB parse so reply files
        // never re-enter a session
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        if stem.as_deref().is_some_and(|s| s.ends_with(".output")) {
            return FileCategory::Ignored;
        }

        if filename.starts_with("STNG") {
            return FileCategory::Settings;
        }
        if filename.starts_with("CNTX") {
            return FileCategory::Context;
        }
        if filename.starts_with("TASK") {
            return FileCategory::Task;
        }

        if let Some(info) = parse_prob_filename(&filename) {
            if info.timestamp < self.startup_ns {
                // left over from a previous run
                return FileCategory::Ignored;
            }
            return FileCategory::Requirement;
        }

        let Some(header) = read_prefix(path, 8) else {
            tracing::warn!(path = %path.display(), "could not open file for content check");
            return FileCategory::Ignored;
        };
        if MAGIC_SIGNATURES
            .iter()
            .any(|sig| header.len() >= sig.len() && header.starts_with(sig))
        {
            tracing::info!(path = %path.display(), "ignoring known binary type");
            return FileCategory::Ignored;
        }

        let Some(sample) = read_prefix(path, TEXT_SAMPLE_BYTES) else {
            tracing::warn!(path = %path.display(), "could not open file for content check");
            return FileCategory::Ignored;
        };
        if sample.is_empty() {
            tracing::info!(path = %path.display(), "ignoring empty file");
            return FileCategory::Ignored;
        }
        let non_text = sample
            .iter()
            .filter(|&&b| !matches!(b, b'\t' | b'\n' | b'\r') && (b < 0x20 || b == 0x7F))
            .count();
        let ratio = non_text as f64 / sample.len() as f64;
        if ratio > MAX_NON_TEXT_RATIO {
            tracing::info!(
                path = %path.display(),
                ratio = format!("{:.1}%", ratio * 100.0),
                "ignoring binary file"
            );
            return FileCategory::Ignored;
        }

        if let Ok(metadata) = std::fs::metadata(path) {
            let size = metadata.len();
            if size > self.max_file_size_kb * 1024 {
                self.write_oversize_note(path, size);
                tracing::warn!(path = %path.display(), size, "ignoring oversized file");
                return FileCategory::Ignored;
            }
        }

        FileCategory::Requirement
    }

    fn write_oversize_note(&self, path: &Path, size: u64) {
        let mut output_path = path.as_os_str().to_owned();
        output_path.push(".output.txt");
        let note = format!(
            "File '{}' is too large ({} bytes). Maximum allowed size is {} kB.\nProcessing was skipped.\n",
            path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
            size,
            self.max_file_size_kb,
        );
        if let Err(error) = std::fs::write(&output_path, note) {
            tracing::error!(path = %path.display(), %error, "failed to write oversized-file note");
        }
    }
}

fn read_prefix(path: &Path, len: usize) -> Option<Vec<u8>> {
    let mut file = std::fs::File::open(path).ok()?;
    let mut buffer = vec![0u8; len];
    let mut read = 0usize;
    loop {
        match file.read(&mut buffer[read..]) {
            Ok(0) => break,
            Ok(n) => {
                read += n;
                if read == len {
                    break;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::Interrupted => {}
            Err(_) => return None,
        }
    }
    buffer.truncate(read);
    Some(buffer)
}
