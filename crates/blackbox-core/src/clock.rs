//! Epoch clock seam.
//!
//! The recorder stamps `start_time`/`end_time` and the replay session paces
//! its linger window off an injected clock so tests can advance time
//! deterministically.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond-resolution wall clock.
pub trait EpochClock {
    /// Milliseconds since the Unix epoch.
    fn epoch_ms(&self) -> i64;
}

/// System clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEpochClock;

impl EpochClock for SystemEpochClock {
    fn epoch_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualEpochClock {
    now_ms: Cell<i64>,
}

impl ManualEpochClock {
    #[must_use]
    pub fn new(now_ms: i64) -> Rc<Self> {
        Rc::new(Self {
            now_ms: Cell::new(now_ms),
        })
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.set(now_ms);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.set(self.now_ms.get() + delta_ms);
    }
}

impl EpochClock for ManualEpochClock {
    fn epoch_ms(&self) -> i64 {
        self.now_ms.get()
    }
}
