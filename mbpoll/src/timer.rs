//! Cancellable delayed tasks.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// A delayed or periodic callback running on the tokio runtime.
///
/// Dropping the task cancels it. The callback returns `false` to stop a
/// periodic task, e.g. when its receiver is gone.
#[derive(Debug)]
pub struct ScheduledTask {
    id: u64,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Run `fire` once after `delay`.
    pub fn once<F>(id: u64, delay: Duration, fire: F) -> Self
    where
        F: FnOnce() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire();
        });
        Self { id, handle }
    }

    /// Run `fire` every `period`, first after one full period.
    ///
    /// # Panics
    ///
    /// Panics inside the spawned task if `period` is zero; callers check.
    pub fn repeating<F>(id: u64, period: Duration, mut fire: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !fire() {
                    break;
                }
            }
        });
        Self { id, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
