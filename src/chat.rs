//! Ad-hoc chat request correlation.
//!
//! Chat requests arrive out of band (the web endpoint); their replies come
//! back as `PROB_<id>_<ns>.output.txt` files. The pool hands out unique ids,
//! holds the pending entries in a slot vector with a free-index ring, and
//! expires entries that stay unanswered for 30 seconds.

use crate::clock::{Clock, WallClock};
use crate::error::Result;
use crate::prob::ProbFileInfo;
use crate::startup;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

pub const CHAT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_POOL_SIZE: usize = 16;
pub const DEFAULT_GROW_THRESHOLD: f64 = 0.7;

/// Outbound notification to whatever front end is listening.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub id: u64,
    pub text: String,
}

/// Sink for broadcast messages. Implementations that have shut down are
/// expected to drop messages silently.
pub trait Broadcast: Send + Sync {
    fn broadcast(&self, message: &BroadcastMessage);
}

/// Default sink: structured log lines only.
#[derive(Debug, Default)]
pub struct LogBroadcast;

impl Broadcast for LogBroadcast {
    fn broadcast(&self, message: &BroadcastMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => tracing::info!(%payload, "chat broadcast"),
            Err(error) => tracing::warn!(%error, "chat broadcast serialization failed"),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ChatEntry {
    id: u64,
    subsystem: String,
    message: String,
    created_ms: u64,
    answered: bool,
    expired: bool,
}

#[derive(Debug)]
struct PoolInner {
    entries: Vec<ChatEntry>,
    free_indices: VecDeque<usize>,
    next_id: u64,
    active_count: usize,
}

/// Correlation table for pending chat requests. All operations hold the one
/// pool mutex, so add / mark-answered / expire are linearizable.
pub struct ChatMessagePool<C: Clock = WallClock> {
    inner: Mutex<PoolInner>,
    grow_threshold: f64,
    clock: C,
}

impl ChatMessagePool<WallClock> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(WallClock::new())
    }
}

impl Default for ChatMessagePool<WallClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> ChatMessagePool<C> {
    pub fn with_clock(clock: C) -> Self {
        Self::with_capacity(DEFAULT_POOL_SIZE, DEFAULT_GROW_THRESHOLD, clock)
    }

    pub fn with_capacity(initial_size: usize, grow_threshold: f64, clock: C) -> Self {
        let initial_size = initial_size.max(1);
        tracing::info!(entries = initial_size, "chat message pool initialized");
        Self {
            inner: Mutex::new(PoolInner {
                entries: vec![ChatEntry::default(); initial_size],
                free_indices: (0..initial_size).collect(),
                next_id: 1,
                active_count: 0,
            }),
            grow_threshold,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().expect("chat pool lock poisoned")
    }

    /// Register a pending request and return its id. Ids are monotonic,
    /// never zero, and never reused within the process lifetime.
    pub fn add(&self, subsystem: &str, message: &str) -> u64 {
        let mut inner = self.lock();

        if inner.free_indices.is_empty()
            && inner.active_count as f64 / inner.entries.len() as f64 >= self.grow_threshold
        {
            let old_size = inner.entries.len();
            let new_size = old_size * 2;
            inner.entries.resize(new_size, ChatEntry::default());
            inner.free_indices.extend(old_size..new_size);
            tracing::info!(from = old_size, to = new_size, "chat message pool expanded");
        }

        let index = inner.free_indices.pop_front().unwrap_or(0);
        let id = inner.next_id;
        inner.next_id += 1;

        inner.entries[index] = ChatEntry {
            id,
            subsystem: subsystem.to_string(),
            message: message.to_string(),
            created_ms: self.clock.now_ms(),
            answered: false,
            expired: false,
        };
        inner.active_count += 1;
        id
    }

    /// Match a reply to its pending entry and reclaim the slot. Unknown or
    /// already-expired ids are reported as late answers.
    pub fn mark_answered(&self, id: u64, answer_text: &str, sink: &dyn Broadcast) {
        let mut inner = self.lock();

        for index in 0..inner.entries.len() {
            let entry = &mut inner.entries[index];
            if entry.id == id && !entry.expired && !entry.answered {
                entry.answered = true;
                sink.broadcast(&BroadcastMessage {
                    kind: "output",
                    id,
                    text: answer_text.to_string(),
                });

                inner.entries[index] = ChatEntry::default();
                inner.free_indices.push_back(index);
                inner.active_count -= 1;
                return;
            }
        }

        tracing::warn!(id, "late answer for expired chat message");
        sink.broadcast(&BroadcastMessage {
            kind: "late-answer",
            id,
            text: answer_text.to_string(),
        });
    }

    /// Reclaim entries older than the timeout, broadcasting once per entry.
    pub fn expire_old(&self, sink: &dyn Broadcast) {
        let now = self.clock.now_ms();
        let mut inner = self.lock();

        for index in 0..inner.entries.len() {
            let entry = &mut inner.entries[index];
            if entry.id != 0 && !entry.answered && now.saturating_sub(entry.created_ms) > CHAT_TIMEOUT_MS
            {
                let id = entry.id;
                entry.expired = true;
                tracing::warn!(
                    id,
                    subsystem = %entry.subsystem,
                    message = %entry.message,
                    "chat message expired"
                );
                sink.broadcast(&BroadcastMessage {
                    kind: "timeout",
                    id,
                    text: "Message expired after 30 seconds.".to_string(),
                });

                inner.entries[index] = ChatEntry::default();
                inner.free_indices.push_back(index);
                inner.active_count -= 1;
            }
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().active_count
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.len()
    }

    /// Register the request in the pool and drop the correlation file into
    /// the subsystem's session folder so the watcher picks it up.
    pub fn submit(&self, queue_root: &Path, subsystem: &str, message: &str) -> Result<u64> {
        let id = self.add(subsystem, message);
        let info = ProbFileInfo {
            id,
            timestamp: startup::now_ns(),
            is_output: false,
        };

        let session_dir = queue_root.join(subsystem);
        std::fs::create_dir_all(&session_dir)?;
        let path = session_dir.join(info.filename());
        std::fs::write(&path, message)?;
        tracing::info!(id, path = %path.display(), "chat request queued");
        Ok(id)
    }
}
