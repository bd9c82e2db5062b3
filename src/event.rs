//! Event types and the cross-thread event bus.
//!
//! Producers (watcher, workers, signal handler) push events; the run loop is
//! the single consumer and drains the whole queue in one swap per tick.
//! FIFO order holds per producer thread; there is no ordering guarantee
//! between producers.

use std::path::PathBuf;
use std::sync::Mutex;

/// Everything that can travel over the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    FileAdded(PathBuf),
    FileModified(PathBuf),
    FileRemoved(PathBuf),
    EngineShutdown,
    AppErrorBadNetwork,
    KeyPressed(u8),
}

/// An event plus its dispatch state. Engine-level handlers run first and may
/// mark the event handled; application handlers only see unhandled events.
#[derive(Debug)]
pub struct BusEvent {
    pub event: Event,
    pub handled: bool,
}

impl BusEvent {
    pub fn new(event: Event) -> Self {
        Self {
            event,
            handled: false,
        }
    }
}

/// Multi-producer single-consumer queue drained once per tick.
#[derive(Debug, Default)]
pub struct EventBus {
    queue: Mutex<Vec<BusEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking push. Never fails short of allocation failure.
    pub fn push(&self, event: Event) {
        let mut queue = self.queue.lock().expect("event bus lock poisoned");
        queue.push(BusEvent::new(event));
    }

    /// Take every currently enqueued event in one swap.
    pub fn drain(&self) -> Vec<BusEvent> {
        let mut queue = self.queue.lock().expect("event bus lock poisoned");
        std::mem::take(&mut *queue)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().expect("event bus lock poisoned").is_empty()
    }
}
