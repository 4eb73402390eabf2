use crate::model::{DurationRule, Minute};

/// Seating time when no rule covers the party.
pub const DEFAULT_DURATION_MINUTES: Minute = 120;

/// First rule whose inclusive guest range contains `party_size`.
pub fn resolve_duration(rules: &[DurationRule], party_size: u32) -> Minute {
    rules
        .iter()
        .find(|r| r.min_guests <= party_size && party_size <= r.max_guests)
        .map_or(DEFAULT_DURATION_MINUTES, |r| r.duration_minutes)
}
