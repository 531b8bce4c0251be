//! One-shot cancelable scheduled tasks on the tokio runtime.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::AbortHandle;
use tokio::time::{self, Instant};

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle to a task scheduled with [`schedule_once`].
///
/// Dropping the handle does not cancel the task.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    id: u64,
    deadline: Instant,
    cancelled: Arc<AtomicBool>,
    sleeper: AbortHandle,
}

/// Run `task` once after `delay` unless the returned handle is cancelled first.
///
/// The task is spawned as its own tokio task when the timer fires, so
/// cancelling the handle afterwards (for instance from inside the task) never
/// interrupts it.
pub fn schedule_once<F>(delay: Duration, task: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    let deadline = Instant::now() + delay;
    let cancelled = Arc::new(AtomicBool::new(false));

    let flag = cancelled.clone();
    let sleeper = tokio::spawn(async move {
        time::sleep_until(deadline).await;
        if flag.load(Ordering::Acquire) {
            return;
        }
        tokio::spawn(task);
    })
    .abort_handle();

    TimerHandle {
        id,
        deadline,
        cancelled,
        sleeper,
    }
}

impl TimerHandle {
    /// Process-unique identifier of this timer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the task fires (or would have fired).
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancel the timer. Idempotent; a no-op once the task has started.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.sleeper.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
