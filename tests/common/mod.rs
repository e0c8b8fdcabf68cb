#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tracing::Level;

/// Routes lane and coordinator events through the test harness's captured output.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_test_writer()
        .try_init()
        .ok();
}

/// A shared, append-only record of what happened in which order.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> usize {
        self.events()
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("event `{}` was never logged", event))
    }
}
