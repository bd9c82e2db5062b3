//! The per-session prompt environment.
//!
//! The environment is the concatenation of the session's Settings, Context
//! and Task content. It is complete only when all three parts are non-empty,
//! and dirty only when a recomputation actually produced a different string.

use crate::categorizer::CategorizedFiles;
use std::time::SystemTime;

#[derive(Debug, Default)]
pub struct Environment {
    combined: String,
    complete: bool,
    dirty: bool,
    timestamp: Option<SystemTime>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the combined string from the three category aggregates.
    pub fn assemble(
        &mut self,
        settings: &str,
        context: &str,
        tasks: &str,
        files: &CategorizedFiles,
    ) {
        if settings.is_empty() || context.is_empty() || tasks.is_empty() {
            self.complete = false;
            self.dirty = false;
            self.timestamp = None;
            return;
        }

        let combined = format!("{settings}{context}{tasks}");
        if combined == self.combined {
            self.dirty = false;
        } else {
            self.combined = combined;
            self.dirty = true;
            self.timestamp = [
                files.settings.newest_write_time(),
                files.context.newest_write_time(),
                files.tasks.newest_write_time(),
            ]
            .into_iter()
            .flatten()
            .max();
        }
        self.complete = true;
    }

    /// The combined string; clears the dirty flag.
    pub fn take(&mut self) -> &str {
        self.dirty = false;
        &self.combined
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Newest last-write time across the input files; `None` while the
    /// environment is incomplete. File-clock values only, never compared
    /// with correlation-file nanosecond timestamps.
    pub fn timestamp(&self) -> Option<SystemTime> {
        self.timestamp
    }
}
