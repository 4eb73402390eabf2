use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::model::Ms;

pub fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Source of "now" for expiry and retry scheduling.
///
/// `Manual` lets tests step time deterministically; clones share the same instant.
#[derive(Debug, Clone, Default)]
pub enum Clock {
    #[default]
    System,
    Manual(Arc<AtomicI64>),
}

impl Clock {
    pub fn manual(start: Ms) -> Self {
        Clock::Manual(Arc::new(AtomicI64::new(start)))
    }

    pub fn now(&self) -> Ms {
        match self {
            Clock::System => now_ms(),
            Clock::Manual(at) => at.load(Ordering::SeqCst),
        }
    }

    /// No-op on the system clock.
    pub fn advance(&self, by: Ms) {
        if let Clock::Manual(at) = self {
            at.fetch_add(by, Ordering::SeqCst);
        }
    }
}
