//! The engine core: tick loop, event dispatch, shutdown plumbing.
//!
//! One main thread drives the application and drains the event bus once per
//! tick. Engine-level handlers run first (shutdown, network-error logging,
//! key handling); events they leave unhandled go to the application. SIGINT
//! is converted into a shutdown event once; a second SIGINT forces exit.

use crate::app::App;
use crate::clock::Clock;
use crate::config::Config;
use crate::event::{BusEvent, Event, EventBus};
use crate::pool::ThreadPool;
use std::io::Read as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct Core {
    config: Config,
    bus: Arc<EventBus>,
    pool: ThreadPool,
    shutdown_observed: bool,
}

impl Core {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let pool = ThreadPool::new(config.max_threads);
        Self {
            config,
            bus: Arc::new(EventBus::new()),
            pool,
            shutdown_observed: false,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.pool
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Run the application to completion.
    pub fn run<C: Clock>(&mut self, app: &mut App<C>) {
        install_sigint_handler(self.bus.clone());
        start_keyboard_worker(&self.pool, self.bus.clone());

        app.on_start(&self.pool, self.bus.clone());
        self.run_loop(app);

        app.on_shutdown();
        self.pool.wait_all();
    }

    fn run_loop<C: Clock>(&mut self, app: &mut App<C>) {
        let sleep = Duration::from_millis(self.config.sleep_time_ms.clamp(1, 256));

        loop {
            app.on_update(&self.pool, &self.bus);
            self.dispatch_events(app);

            if app.is_finished() || self.shutdown_observed {
                break;
            }
            std::thread::sleep(sleep);
        }

        // one final drain so nothing queued during the last tick is lost
        self.dispatch_events(app);
    }

    fn dispatch_events<C: Clock>(&mut self, app: &mut App<C>) {
        for mut bus_event in self.bus.drain() {
            self.handle_engine_event(&mut bus_event, app);
            if !bus_event.handled {
                app.on_event(&bus_event.event);
            }
        }
    }

    fn handle_engine_event<C: Clock>(&mut self, bus_event: &mut BusEvent, app: &mut App<C>) {
        match bus_event.event {
            Event::EngineShutdown => {
                self.shutdown_observed = true;
                app.request_shutdown();
                bus_event.handled = true;
            }
            Event::AppErrorBadNetwork => {
                tracing::error!("query task reported a network failure");
                bus_event.handled = true;
            }
            Event::KeyPressed(byte) => {
                tracing::trace!(byte, "key pressed");
                bus_event.handled = true;
            }
            _ => {}
        }
    }
}

/// First SIGINT becomes a shutdown event; the second one forces exit.
fn install_sigint_handler(bus: Arc<EventBus>) {
    let count = AtomicUsize::new(0);
    let result = ctrlc::set_handler(move || {
        if count.fetch_add(1, Ordering::SeqCst) == 0 {
            bus.push(Event::EngineShutdown);
        } else {
            std::process::exit(130);
        }
    });
    if let Err(error) = result {
        tracing::warn!(%error, "failed to install SIGINT handler");
    }
}

/// Keyboard worker: forwards every byte as a key event and emits a shutdown
/// event on `q`/`Q`. Detached because a blocked stdin read cannot be
/// interrupted; it ends on EOF or at process exit.
fn start_keyboard_worker(pool: &ThreadPool, bus: Arc<EventBus>) {
    pool.submit_detached(move || {
        let stdin = std::io::stdin();
        for byte in stdin.lock().bytes() {
            let Ok(byte) = byte else {
                break;
            };
            bus.push(Event::KeyPressed(byte));
            if byte == b'q' || byte == b'Q' {
                bus.push(Event::EngineShutdown);
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiInterface, InterfaceType};
    use tempfile::TempDir;

    fn test_core(queue: &std::path::Path) -> Core {
        Core::new(Config {
            queue_folder: queue.to_path_buf(),
            max_threads: 1,
            sleep_time_ms: 1,
            verbose: false,
            api_interfaces: vec![ApiInterface {
                url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
                model: "m".to_string(),
                interface_type: InterfaceType::Api1,
            }],
            api_index: 0,
            max_file_size_kb: 1024,
        })
    }

    #[test]
    fn shutdown_event_ends_the_loop() {
        let temp = TempDir::new().expect("tempdir");
        let mut core = test_core(temp.path());
        let mut app = App::new(core.config().clone());

        core.bus().push(Event::EngineShutdown);
        core.run_loop(&mut app);
        assert!(app.is_finished());
    }

    #[test]
    fn quit_key_is_handled_at_engine_level() {
        let temp = TempDir::new().expect("tempdir");
        let mut core = test_core(temp.path());
        let mut app = App::new(core.config().clone());

        // the keyboard worker emits both events for a quit key
        core.bus().push(Event::KeyPressed(b'q'));
        core.bus().push(Event::EngineShutdown);
        core.run_loop(&mut app);
        assert!(app.is_finished());
    }

    #[test]
    fn network_errors_are_absorbed_by_the_engine() {
        let temp = TempDir::new().expect("tempdir");
        let mut core = test_core(temp.path());
        let mut app = App::new(core.config().clone());

        core.bus().push(Event::AppErrorBadNetwork);
        core.bus().push(Event::EngineShutdown);
        core.run_loop(&mut app);
        // no session was created for the error event
        assert_eq!(app.session_count(), 0);
    }

    #[test]
    fn file_events_reach_the_application() {
        let temp = TempDir::new().expect("tempdir");
        let dir = temp.path().join("demo");
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("TASK_a.txt");
        std::fs::write(&path, "t").expect("write");

        let mut core = test_core(temp.path());
        let mut app = App::new(core.config().clone());

        core.bus().push(Event::FileAdded(path));
        core.bus().push(Event::EngineShutdown);
        core.run_loop(&mut app);
        assert_eq!(app.session_count(), 1);
    }
}
