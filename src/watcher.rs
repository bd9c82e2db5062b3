//! Polling file watcher.
//!
//! Scans the queue root on a fixed interval and reports added, modified and
//! removed regular files over the event bus. Modification is detected by
//! last-write time only; the categorizer's content hash filters out false
//! positives. Leaf names starting with a dot are editor temp files and are
//! skipped.

use crate::event::{Event, EventBus};
use crate::pool::{TaskHandle, ThreadPool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One poll cycle's bookkeeping: remembered paths and their last-write
/// times. Kept separate from the thread plumbing so ticks are testable.
#[derive(Debug, Default)]
pub struct ScanState {
    files: HashMap<PathBuf, SystemTime>,
}

impl ScanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial scan: remember everything and report it as added.
    pub fn initial_scan(&mut self, root: &Path, bus: &EventBus) {
        visit_files(root, &mut |path, mtime| {
            self.files.insert(path.to_path_buf(), mtime);
            bus.push(Event::FileAdded(path.to_path_buf()));
        });
    }

    /// One poll tick. Returns false when the root is gone, which shuts the
    /// watcher down.
    pub fn scan(&mut self, root: &Path, bus: &EventBus) -> bool {
        if !root.exists() {
            tracing::info!(root = %root.display(), "watched folder no longer exists, requesting shutdown");
            bus.push(Event::EngineShutdown);
            return false;
        }

        let mut seen: HashMap<PathBuf, SystemTime> = HashMap::new();
        visit_files(root, &mut |path, mtime| {
            seen.insert(path.to_path_buf(), mtime);
            match self.files.get(path) {
                None => bus.push(Event::FileAdded(path.to_path_buf())),
                Some(previous) if *previous != mtime => {
                    bus.push(Event::FileModified(path.to_path_buf()));
                }
                Some(_) => {}
            }
        });

        for path in self.files.keys() {
            if !seen.contains_key(path) {
                bus.push(Event::FileRemoved(path.clone()));
            }
        }
        self.files = seen;
        true
    }
}

/// Recursively visit regular files under `root`, skipping dot-prefixed leaf
/// names. Transient errors are logged and the walk continues.
fn visit_files(root: &Path, visit: &mut impl FnMut(&Path, SystemTime)) {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(error) => {
            tracing::warn!(path = %root.display(), %error, "failed to read directory");
            return;
        }
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(path = %root.display(), %error, "failed to read directory entry");
                continue;
            }
        };
        let path = entry.path();

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to stat entry");
                continue;
            }
        };

        if file_type.is_dir() {
            visit_files(&path, visit);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }
        if path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'))
        {
            continue;
        }

        match entry.metadata().and_then(|m| m.modified()) {
            Ok(mtime) => visit(&path, mtime),
            Err(error) => {
                tracing::warn!(path = %path.display(), %error, "failed to read mtime");
            }
        }
    }
}

/// The long-lived watcher task. Lives on a pool worker; the stop flag is
/// checked once per interval and the task runs its current scan to the end
/// before exiting.
pub struct FileWatcher {
    root: PathBuf,
    interval: Duration,
    running: Arc<AtomicBool>,
    task: Option<TaskHandle>,
}

impl FileWatcher {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            root: root.into(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    pub fn start(&mut self, pool: &ThreadPool, bus: Arc<EventBus>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let root = self.root.clone();
        let interval = self.interval;
        let running = self.running.clone();

        self.task = Some(pool.submit(move || {
            let mut state = ScanState::new();
            state.initial_scan(&root, &bus);

            while running.load(Ordering::SeqCst) {
                std::thread::sleep(interval);
                if !state.scan(&root, &bus) {
                    break;
                }
            }
            true
        }));
    }

    /// Signal the watcher to stop and wait for its current scan to finish.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self.task.take() {
            while !task.poll_ready() {
                std::thread::sleep(Duration::from_millis(1));
            }
            tracing::info!("file watcher stopped");
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn drain_events(bus: &EventBus) -> Vec<Event> {
        bus.drain().into_iter().map(|e| e.event).collect()
    }

    #[test]
    fn initial_scan_reports_existing_files_as_added() {
        let temp = TempDir::new().expect("tempdir");
        std::fs::write(temp.path().join("a.txt"), "a").expect("write");
        std::fs::create_dir(temp.path().join("sub")).expect("mkdir");
        std::fs::write(temp.path().join("sub/b.txt"), "b").expect("write");

        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(temp.path(), &bus);

        let mut added: Vec<PathBuf> = drain_events(&bus)
            .into_iter()
            .map(|e| match e {
                Event::FileAdded(path) => path,
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        added.sort();
        assert_eq!(
            added,
            vec![temp.path().join("a.txt"), temp.path().join("sub/b.txt")]
        );
    }

    #[test]
    fn dot_files_are_skipped() {
        let temp = TempDir::new().expect("tempdir");
        std::fs::write(temp.path().join(".tmp123"), "x").expect("write");
        std::fs::write(temp.path().join("real.txt"), "r").expect("write");

        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(temp.path(), &bus);

        let events = drain_events(&bus);
        assert_eq!(events, vec![Event::FileAdded(temp.path().join("real.txt"))]);
    }

    #[test]
    fn new_file_is_reported_once() {
        let temp = TempDir::new().expect("tempdir");
        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(temp.path(), &bus);
        drain_events(&bus);

        std::fs::write(temp.path().join("new.txt"), "n").expect("write");
        assert!(state.scan(temp.path(), &bus));
        assert_eq!(
            drain_events(&bus),
            vec![Event::FileAdded(temp.path().join("new.txt"))]
        );

        assert!(state.scan(temp.path(), &bus));
        assert!(drain_events(&bus).is_empty());
    }

    #[test]
    fn mtime_change_is_reported_as_modified() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "one").expect("write");

        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(temp.path(), &bus);
        drain_events(&bus);

        let file = std::fs::File::options()
            .write(true)
            .open(&path)
            .expect("open");
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .expect("set mtime");

        assert!(state.scan(temp.path(), &bus));
        assert_eq!(drain_events(&bus), vec![Event::FileModified(path)]);
    }

    #[test]
    fn removed_file_is_reported_and_forgotten() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("a.txt");
        std::fs::write(&path, "a").expect("write");

        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(temp.path(), &bus);
        drain_events(&bus);

        std::fs::remove_file(&path).expect("remove");
        assert!(state.scan(temp.path(), &bus));
        assert_eq!(drain_events(&bus), vec![Event::FileRemoved(path)]);

        assert!(state.scan(temp.path(), &bus));
        assert!(drain_events(&bus).is_empty());
    }

    #[test]
    fn missing_root_requests_shutdown() {
        let temp = TempDir::new().expect("tempdir");
        let root = temp.path().join("queue");
        std::fs::create_dir(&root).expect("mkdir");

        let bus = EventBus::new();
        let mut state = ScanState::new();
        state.initial_scan(&root, &bus);
        drain_events(&bus);

        std::fs::remove_dir(&root).expect("rmdir");
        assert!(!state.scan(&root, &bus));
        assert_eq!(drain_events(&bus), vec![Event::EngineShutdown]);
    }

    #[test]
    fn threaded_watcher_delivers_events_and_stops() {
        let temp = TempDir::new().expect("tempdir");
        std::fs::write(temp.path().join("seed.txt"), "s").expect("write");

        let pool = ThreadPool::new(1);
        let bus = Arc::new(EventBus::new());
        let mut watcher = FileWatcher::new(temp.path(), Duration::from_millis(5));
        watcher.start(&pool, bus.clone());

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        let mut saw_added = false;
        while std::time::Instant::now() < deadline && !saw_added {
            saw_added = bus
                .drain()
                .iter()
                .any(|e| matches!(e.event, Event::FileAdded(_)));
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(saw_added, "initial scan event not observed");

        watcher.stop();
        pool.wait_all();
    }
}
