//! Fixed-window circuit breaker for the directory store

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// Marks the store unhealthy for `window` after any failure
#[derive(Debug)]
pub struct Breaker {
    window: Duration,
    open_until: Mutex<Option<Instant>>,
}

impl Breaker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            open_until: Mutex::new(None),
        }
    }

    /// True while no failure was recorded within the window
    pub fn is_healthy(&self) -> bool {
        let mut open_until = self.open_until.lock();
        match *open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *open_until = None;
                true
            }
            None => true,
        }
    }

    /// Record a failure and open (or extend) the window
    pub fn trip(&self, op: &str, reason: &dyn std::fmt::Display) {
        let mut open_until = self.open_until.lock();
        if open_until.is_none() {
            warn!(op, error = %reason, window_ms = self.window.as_millis() as u64, "Directory store unhealthy");
        }
        *open_until = Some(Instant::now() + self.window);
    }
}
