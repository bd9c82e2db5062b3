//! The agent application: session routing and chat correlation.
//!
//! Every file event is keyed by its parent folder; each folder gets its own
//! [`Session`]. Correlation (`PROB_*`) files are screened first: stale ones
//! are dropped, reply files are routed to the chat pool and never reach a
//! session.

use crate::chat::{Broadcast, ChatMessagePool, LogBroadcast};
use crate::clock::{Clock, WallClock};
use crate::config::Config;
use crate::event::{Event, EventBus};
use crate::pool::ThreadPool;
use crate::prob::parse_prob_filename;
use crate::session::Session;
use crate::startup;
use crate::watcher::{FileWatcher, DEFAULT_POLL_INTERVAL};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct App<C: Clock = WallClock> {
    config: Config,
    sessions: BTreeMap<PathBuf, Session>,
    chat_pool: ChatMessagePool<C>,
    broadcast: Box<dyn Broadcast>,
    watcher: FileWatcher,
    finished: bool,
}

impl App<WallClock> {
    pub fn new(config: Config) -> Self {
        Self::with_parts(config, ChatMessagePool::new(), Box::new(LogBroadcast))
    }
}

impl<C: Clock> App<C> {
    pub fn with_parts(
        config: Config,
        chat_pool: ChatMessagePool<C>,
        broadcast: Box<dyn Broadcast>,
    ) -> Self {
        let watcher = FileWatcher::new(&config.queue_folder, DEFAULT_POLL_INTERVAL);
        Self {
            config,
            sessions: BTreeMap::new(),
            chat_pool,
            broadcast,
            watcher,
            finished: false,
        }
    }

    /// The correlation pool, shared with the web endpoint.
    pub fn chat_pool(&self) -> &ChatMessagePool<C> {
        &self.chat_pool
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session(&self, name: &Path) -> Option<&Session> {
        self.sessions.get(name)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Called by the run loop when a shutdown event was handled.
    pub fn request_shutdown(&mut self) {
        tracing::info!("app received shutdown request");
        self.finished = true;
    }

    pub fn on_start(&mut self, pool: &ThreadPool, bus: Arc<EventBus>) {
        tracing::info!(
            queue = %self.config.queue_folder.display(),
            "starting agent"
        );
        self.watcher.start(pool, bus);
    }

    pub fn on_update(&mut self, pool: &ThreadPool, bus: &EventBus) {
        for session in self.sessions.values_mut() {
            session.on_update(pool, bus);
        }
        self.chat_pool.expire_old(self.broadcast.as_ref());
    }

    pub fn on_event(&mut self, event: &Event) {
        let path = match event {
            Event::FileAdded(path) | Event::FileModified(path) | Event::FileRemoved(path) => {
                path.clone()
            }
            _ => return,
        };

        if self.screen_correlation_file(event, &path) {
            return;
        }

        let session_key = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.config.queue_folder.clone());
        let session = self
            .sessions
            .entry(session_key.clone())
            .or_insert_with(|| Session::from_config(session_key, &self.config));
        session.on_event(event);
    }

    pub fn on_shutdown(&mut self) {
        tracing::info!("leaving agent");
        self.watcher.stop();
        for session in self.sessions.values() {
            session.on_shutdown();
        }
    }

    /// Startup-time filter for correlation files. True when the event was
    /// consumed here and must not reach a session.
    fn screen_correlation_file(&mut self, event: &Event, path: &Path) -> bool {
        let Some(filename) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return false;
        };
        let Some(info) = parse_prob_filename(&filename) else {
            return false;
        };

        if info.timestamp < startup::timestamp_ns() {
            // left over from a previous run
            return true;
        }

        if info.is_output {
            if matches!(event, Event::FileAdded(_) | Event::FileModified(_)) {
                match std::fs::read_to_string(path) {
                    Ok(text) => {
                        self.chat_pool
                            .mark_answered(info.id, &text, self.broadcast.as_ref());
                    }
                    Err(error) => {
                        tracing::warn!(path = %path.display(), %error, "failed to read chat reply");
                    }
                }
            }
            return true;
        }

        // fresh correlation inputs flow to the session as requirements
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::BroadcastMessage;
    use crate::clock::TestClock;
    use crate::config::{ApiInterface, InterfaceType};
    use crate::prob::ProbFileInfo;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        messages: Arc<Mutex<Vec<BroadcastMessage>>>,
    }

    impl Broadcast for RecordingSink {
        fn broadcast(&self, message: &BroadcastMessage) {
            self.messages.lock().expect("sink lock").push(message.clone());
        }
    }

    fn test_config(queue: &Path) -> Config {
        Config {
            queue_folder: queue.to_path_buf(),
            max_threads: 2,
            sleep_time_ms: 10,
            verbose: false,
            api_interfaces: vec![ApiInterface {
                url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
                model: "test-model".to_string(),
                interface_type: InterfaceType::Api1,
            }],
            api_index: 0,
            max_file_size_kb: 1024,
        }
    }

    fn test_app(
        queue: &Path,
    ) -> (
        App<Arc<TestClock>>,
        Arc<TestClock>,
        Arc<Mutex<Vec<BroadcastMessage>>>,
    ) {
        startup::init();
        let clock = Arc::new(TestClock::new(0));
        let pool = ChatMessagePool::with_clock(clock.clone());
        let sink = RecordingSink::default();
        let messages = sink.messages.clone();
        let app = App::with_parts(test_config(queue), pool, Box::new(sink));
        (app, clock, messages)
    }

    #[test]
    fn file_events_create_sessions_per_folder() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, _clock, _messages) = test_app(temp.path());

        for folder in ["demo", "other"] {
            let dir = temp.path().join(folder);
            std::fs::create_dir_all(&dir).expect("mkdir");
            let path = dir.join("TASK_a.txt");
            std::fs::write(&path, "t").expect("write");
            app.on_event(&Event::FileAdded(path));
        }

        assert_eq!(app.session_count(), 2);
        let demo = app.session(&temp.path().join("demo")).expect("session");
        assert_eq!(demo.categorizer().categorized().tasks.len(), 1);
    }

    #[test]
    fn stale_prob_files_never_reach_pool_or_session() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, _clock, messages) = test_app(temp.path());

        let dir = temp.path().join("demo");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let stale = ProbFileInfo {
            id: 7,
            timestamp: startup::timestamp_ns() - 1_000_000_000,
            is_output: true,
        };
        let path = dir.join(stale.filename());
        std::fs::write(&path, "old reply").expect("write");

        app.on_event(&Event::FileAdded(path));
        assert!(messages.lock().expect("sink lock").is_empty());
        assert_eq!(app.session_count(), 0);
        assert_eq!(app.chat_pool().active_count(), 0);

        // stale inputs are dropped the same way
        let stale_input = ProbFileInfo {
            is_output: false,
            ..stale
        };
        let path = dir.join(stale_input.filename());
        std::fs::write(&path, "old request").expect("write");
        app.on_event(&Event::FileAdded(path));
        assert_eq!(app.session_count(), 0);
    }

    #[test]
    fn chat_reply_file_answers_the_pool_entry() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, _clock, messages) = test_app(temp.path());

        let id = app
            .chat_pool()
            .submit(temp.path(), "demo", "hello")
            .expect("submit");
        assert_eq!(app.chat_pool().active_count(), 1);

        let reply = ProbFileInfo {
            id,
            timestamp: startup::now_ns(),
            is_output: true,
        };
        let path = temp.path().join("demo").join(reply.filename());
        std::fs::write(&path, "hi").expect("write");

        app.on_event(&Event::FileAdded(path));
        let messages = messages.lock().expect("sink lock");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, "output");
        assert_eq!(messages[0].id, id);
        assert_eq!(messages[0].text, "hi");
        assert_eq!(app.chat_pool().active_count(), 0);
        // the reply never became a session file
        assert_eq!(app.session_count(), 0);
    }

    #[test]
    fn fresh_prob_input_is_forwarded_as_requirement() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, _clock, _messages) = test_app(temp.path());

        let info = ProbFileInfo {
            id: 3,
            timestamp: startup::now_ns(),
            is_output: false,
        };
        let dir = temp.path().join("demo");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(info.filename());
        std::fs::write(&path, "question").expect("write");

        app.on_event(&Event::FileAdded(path.clone()));
        let session = app.session(&dir).expect("session");
        assert!(session
            .categorizer()
            .categorized()
            .requirements
            .contains(&path));
    }

    #[test]
    fn update_expires_old_chat_entries() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, clock, messages) = test_app(temp.path());
        let pool = ThreadPool::new(1);
        let bus = EventBus::new();

        app.chat_pool().add("demo", "hello");
        clock.advance(std::time::Duration::from_millis(
            crate::chat::CHAT_TIMEOUT_MS + 1,
        ));
        app.on_update(&pool, &bus);

        let messages = messages.lock().expect("sink lock");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, "timeout");
    }

    #[test]
    fn shutdown_request_finishes_the_app() {
        let temp = TempDir::new().expect("tempdir");
        let (mut app, _clock, _messages) = test_app(temp.path());
        assert!(!app.is_finished());
        app.request_shutdown();
        assert!(app.is_finished());
    }
}
