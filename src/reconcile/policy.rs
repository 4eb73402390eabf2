use crate::model::Ms;

const SEC: Ms = 1_000;

/// Retry schedule for the reconciliation queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before attempt n+1 after n failures, indexed by n-1 and clamped
    /// to the last entry.
    pub backoff: Vec<Ms>,
    /// Failures after which an event goes to manual review.
    pub max_attempts: u32,
    /// How long a claimed item stays invisible to other drains.
    pub lease_ms: Ms,
    pub batch_size: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: [10, 30, 60, 120, 300, 600, 1200, 3600]
                .iter()
                .map(|s| s * SEC)
                .collect(),
            max_attempts: 8,
            lease_ms: 60 * SEC,
            batch_size: 25,
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempts`-th failure (1-based).
    pub fn delay(&self, attempts: u32) -> Ms {
        let Some(last) = self.backoff.len().checked_sub(1) else {
            return 0;
        };
        let idx = (attempts.saturating_sub(1) as usize).min(last);
        self.backoff[idx]
    }

    pub fn next_attempt_at(&self, attempts: u32, now: Ms) -> Ms {
        now + self.delay(attempts)
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_follows_table() {
        let p = RetryPolicy::default();
        let delays: Vec<Ms> = (1..=8).map(|n| p.delay(n) / SEC).collect();
        assert_eq!(delays, vec![10, 30, 60, 120, 300, 600, 1200, 3600]);
        // Past the table the last entry repeats.
        assert_eq!(p.delay(20), 3600 * SEC);
        assert_eq!(p.next_attempt_at(2, 1_000), 1_000 + 30 * SEC);
    }

    #[test]
    fn delays_never_shrink() {
        let p = RetryPolicy::default();
        for n in 1..30 {
            assert!(p.delay(n + 1) >= p.delay(n), "attempt {n}");
        }
    }

    #[test]
    fn exhausted_exactly_at_max() {
        let p = RetryPolicy::default();
        assert!(!p.exhausted(7));
        assert!(p.exhausted(8));
    }

    #[test]
    fn empty_table_retries_immediately() {
        let p = RetryPolicy {
            backoff: vec![],
            ..RetryPolicy::default()
        };
        assert_eq!(p.delay(3), 0);
    }
}
