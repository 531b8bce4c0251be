use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Whether the user is looking at the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Visibility {
    #[default]
    Foreground,
    Background,
}

/// Heartbeat and presence poll periods for one visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub heartbeat: Duration,
    pub presence: Duration,
}

impl Cadence {
    pub const FOREGROUND: Cadence = Cadence {
        heartbeat: Duration::from_secs(30),
        presence: Duration::from_secs(15),
    };

    pub const BACKGROUND: Cadence = Cadence {
        heartbeat: Duration::from_secs(60),
        presence: Duration::from_secs(30),
    };

    pub fn for_visibility(visibility: Visibility) -> Cadence {
        match visibility {
            Visibility::Foreground => Self::FOREGROUND,
            Visibility::Background => Self::BACKGROUND,
        }
    }
}

/// The two intervals driving the presence loop.
pub(crate) struct Ticks {
    pub heartbeat: Interval,
    pub presence: Interval,
}

impl Ticks {
    /// With `immediate`, both intervals tick right away; otherwise the first
    /// tick is one full period out.
    pub fn new(cadence: Cadence, immediate: bool) -> Self {
        Self {
            heartbeat: interval(cadence.heartbeat, immediate),
            presence: interval(cadence.presence, immediate),
        }
    }
}

fn interval(period: Duration, immediate: bool) -> Interval {
    let start = if immediate {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = time::interval_at(start, period);
    // A slow call must not be followed by a burst of catch-up ticks.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
