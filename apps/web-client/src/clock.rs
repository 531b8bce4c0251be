//! Wall-clock source for token bookkeeping.

use chrono::{DateTime, Utc};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that advances with the tokio timer.
///
/// Anchored to `Utc::now()` at construction and moved forward by the runtime's
/// monotonic clock, so token age and renewal timers always agree (including
/// under a paused test runtime).
pub struct RuntimeClock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.mono.elapsed()).unwrap_or(chrono::Duration::MAX);
        self.wall.checked_add_signed(elapsed).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}
