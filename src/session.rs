//! Per-session orchestration.
//!
//! A session is one folder under the queue root. It owns its categorizer,
//! environment, state machine and the handles of its in-flight queries, and
//! is driven once per tick from the run loop. Query tasks capture values
//! only, so the session itself is free to change while a request runs.

use crate::api::{build_request_body, sanitize_for_json};
use crate::categorizer::FileCategorizer;
use crate::config::{Config, InterfaceType};
use crate::environment::Environment;
use crate::event::{Event, EventBus};
use crate::pool::{TaskHandle, ThreadPool};
use crate::query::{output_path_for, QueryJob};
use crate::state_machine::{SessionState, StateInfo, StateMachine};
use crate::tracked_file::TrackedFile;
use std::path::PathBuf;
use std::time::SystemTime;

/// Outstanding-query cap as a multiple of the configured thread count.
const INFLIGHT_FACTOR: f32 = 1.5;

pub struct Session {
    name: PathBuf,
    categorizer: FileCategorizer,
    environment: Environment,
    state_machine: StateMachine,
    settings: String,
    context: String,
    tasks: String,
    query_handles: Vec<TaskHandle>,
    completed: u64,
    url: String,
    model: String,
    interface_type: InterfaceType,
    max_threads: u32,
}

impl Session {
    pub fn from_config(name: impl Into<PathBuf>, config: &Config) -> Self {
        let api = config.api();
        Self::new(
            name,
            api.url.clone(),
            api.model.clone(),
            api.interface_type,
            config.max_threads,
            config.max_file_size_kb,
        )
    }

    pub fn new(
        name: impl Into<PathBuf>,
        url: String,
        model: String,
        interface_type: InterfaceType,
        max_threads: u32,
        max_file_size_kb: u64,
    ) -> Self {
        let name = name.into();
        tracing::info!(session = %name.display(), "session created");
        Self {
            name,
            categorizer: FileCategorizer::new(max_file_size_kb),
            environment: Environment::new(),
            state_machine: StateMachine::new(),
            settings: String::new(),
            context: String::new(),
            tasks: String::new(),
            query_handles: Vec::new(),
            completed: 0,
            url,
            model,
            interface_type,
            max_threads,
        }
    }

    pub fn name(&self) -> &std::path::Path {
        &self.name
    }

    pub fn state(&self) -> SessionState {
        self.state_machine.state()
    }

    pub fn is_idle(&self) -> bool {
        self.state_machine.state() == SessionState::AllResponsesReceived
    }

    pub fn outstanding(&self) -> usize {
        self.query_handles.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn categorizer(&self) -> &FileCategorizer {
        &self.categorizer
    }

    /// Route a filesystem event into the categorizer.
    pub fn on_event(&mut self, event: &Event) {
        match event {
            Event::FileAdded(path) => {
                tracing::info!(path = %path.display(), "new file detected");
                self.categorizer.add_file(path);
            }
            Event::FileModified(path) => {
                tracing::info!(path = %path.display(), "file modified");
                self.categorizer.modify_file(path);
            }
            Event::FileRemoved(path) => {
                tracing::info!(path = %path.display(), "file removed");
                self.categorizer.remove_file(path);
            }
            _ => {}
        }
    }

    /// One dispatcher tick: refresh → assemble → propagate → reap → state →
    /// admit → dispatch.
    pub fn on_update(&mut self, pool: &ThreadPool, bus: &EventBus) {
        self.refresh_categories();

        // a changed environment invalidates every previous reply
        let environment_changed = self.environment.is_dirty();
        if environment_changed {
            self.categorizer.categorized().requirements.mark_all_modified();
        }

        self.reap_in_flight(bus);

        {
            let requirements = &self.categorizer.categorized().requirements;
            let modified = requirements.modified_count();
            self.state_machine.on_update(StateInfo {
                environment_changed,
                environment_complete: self.environment.is_complete(),
                queries_changed: modified != 0,
                all_queries_sent: modified == 0,
                all_responses_received: self.query_handles.is_empty(),
            });
        }

        let cap = (self.max_threads as f32 * INFLIGHT_FACTOR) as usize;
        if !self.environment.is_complete() || self.query_handles.len() >= cap {
            return;
        }

        self.dispatch_queries(pool, cap);
    }

    pub fn on_shutdown(&self) {
        let files = self.categorizer.categorized();
        tracing::info!(
            session = %self.name.display(),
            settings = files.settings.len(),
            context = files.context.len(),
            tasks = files.tasks.len(),
            requirements = files.requirements.len(),
            completed = self.completed,
            "session shutdown"
        );
    }

    fn refresh_categories(&mut self) {
        let files = self.categorizer.categorized();
        let mut environment_update = false;

        if files.settings.is_dirty() {
            self.settings = files.settings.collect_content();
            files.settings.clear_dirty();
            environment_update = true;
        }
        if files.context.is_dirty() {
            self.context = files.context.collect_content();
            files.context.clear_dirty();
            environment_update = true;
        }
        if files.tasks.is_dirty() {
            self.tasks = files.tasks.collect_content();
            files.tasks.clear_dirty();
            environment_update = true;
        }

        if environment_update {
            self.environment
                .assemble(&self.settings, &self.context, &self.tasks, files);
        }
    }

    fn reap_in_flight(&mut self, bus: &EventBus) {
        let mut completed = 0u64;
        self.query_handles.retain(|handle| {
            if !handle.poll_ready() {
                return true;
            }
            completed += 1;
            if handle.take() != Some(true) {
                bus.push(Event::AppErrorBadNetwork);
            }
            false
        });
        self.completed += completed;
    }

    fn dispatch_queries(&mut self, pool: &ThreadPool, cap: usize) {
        if self.categorizer.categorized().requirements.modified_count() == 0 {
            // a fresh environment with nothing to resend must not replay
            // forever
            self.environment.clear_dirty();
            return;
        }

        let environment_timestamp = self.environment.timestamp();
        let environment_text = self.environment.take().to_string();

        let requirements = &self.categorizer.categorized().requirements;
        let url = &self.url;
        let model = &self.model;
        let interface_type = self.interface_type;
        let query_handles = &mut self.query_handles;

        requirements.take_modified(|file| {
            if query_handles.len() >= cap {
                return false;
            }
            if !needs_dispatch(file, environment_timestamp) {
                tracing::debug!(path = %file.path().display(), "output up to date, skipping");
                return true;
            }
            let Some(content) = file.content_and_clear_modified() else {
                return true;
            };

            let message = format!("{environment_text}{content}");
            let body = build_request_body(interface_type, model, &sanitize_for_json(&message));
            let job = QueryJob {
                url: url.clone(),
                body,
                input_path: file.path().to_path_buf(),
                interface_type,
            };
            tracing::info!(path = %job.input_path.display(), "dispatching query");
            query_handles.push(pool.submit(move || job.run()));
            true
        });
    }
}

/// Schedule only when the output file is missing or older than the newest
/// of the requirement file and the environment inputs. Both sides of the
/// comparison are file-clock values.
pub(crate) fn needs_dispatch(file: &TrackedFile, environment_timestamp: Option<SystemTime>) -> bool {
    let output = output_path_for(file.path());
    let Ok(output_mtime) = std::fs::metadata(&output).and_then(|m| m.modified()) else {
        return true;
    };

    let newest_input = [file.last_write_time(), environment_timestamp]
        .into_iter()
        .flatten()
        .max();
    match newest_input {
        Some(input) => input > output_mtime,
        None => true,
    }
}
