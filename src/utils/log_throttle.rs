use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Window {
    opened_at: Instant,
    suppressed: u64,
}

/// Rate limits repeated log lines per key, counting what it swallows.
///
/// Keys whose window has lapsed with nothing suppressed are dropped the next
/// time a new key shows up, so a long-lived throttle keyed by user id does
/// not grow with every user ever seen.
#[derive(Debug)]
pub struct LogThrottle {
    interval: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            windows: Mutex::new(HashMap::new()),
        }
    }

    fn windows(&self) -> MutexGuard<'_, HashMap<String, Window>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `Some(n)` means log now, mentioning the `n` lines swallowed since the
    /// last one. `None` means stay quiet.
    pub fn should_emit(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let mut windows = self.windows();

        if let Some(window) = windows.get_mut(key) {
            if now.duration_since(window.opened_at) < self.interval {
                window.suppressed += 1;
                return None;
            }
            window.opened_at = now;
            return Some(std::mem::take(&mut window.suppressed));
        }

        // A lapsed window with no backlog behaves exactly like a missing one.
        let interval = self.interval;
        windows.retain(|_, w| w.suppressed > 0 || now.duration_since(w.opened_at) < interval);
        windows.insert(
            key.to_string(),
            Window {
                opened_at: now,
                suppressed: 0,
            },
        );
        Some(0)
    }

    /// Drops the window for `key`, including any suppressed count.
    pub fn forget(&self, key: &str) {
        self.windows().remove(key);
    }

    pub fn clear(&self) {
        self.windows().clear();
    }

    /// Number of keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows().len()
    }
}
