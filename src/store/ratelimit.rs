use dashmap::DashMap;

use crate::model::Ms;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Ms,
}

/// Fixed-window counters with expiry, keyed by caller and action.
///
/// Lives in the store alongside locks so every handler sees the same budget.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Count one hit. Returns `false` once `limit` hits landed in the current window.
    pub fn hit(&self, key: &str, limit: u32, window_ms: Ms, now: Ms) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + window_ms,
        });
        if entry.resets_at <= now {
            *entry = Window {
                count: 0,
                resets_at: now + window_ms,
            };
        }
        if entry.count >= limit {
            return false;
        }
        entry.count += 1;
        true
    }

    /// Drop windows that have run out. Returns how many were dropped.
    pub fn sweep(&self, now: Ms) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.resets_at > now);
        before - self.windows.len()
    }
}
