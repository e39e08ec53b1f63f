use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Per-user throttle for one command.
///
/// Entries are kept for the lifetime of the process. Two concurrent
/// invocations by the same user may both pass; the later write wins.
#[derive(Debug)]
pub struct CooldownTracker {
    window: Duration,
    last_used: DashMap<u64, Instant>,
}

impl CooldownTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_used: DashMap::new(),
        }
    }

    /// Records a use by `user_id`, or returns how long they still have to wait.
    pub fn try_acquire(&self, user_id: u64) -> Result<(), Duration> {
        self.try_acquire_at(user_id, Instant::now())
    }

    pub fn try_acquire_at(&self, user_id: u64, now: Instant) -> Result<(), Duration> {
        let last = self.last_used.get(&user_id).map(|entry| *entry);
        if let Some(last) = last {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < self.window {
                return Err(self.window - elapsed);
            }
        }
        self.last_used.insert(user_id, now);
        Ok(())
    }
}

/// Whole seconds to show the user, never zero while a wait remains.
pub fn wait_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
