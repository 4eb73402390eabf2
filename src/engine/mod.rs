//! The availability and booking engine.
//!
//! Pure calculation (`duration`, `allocator`, `availability`) runs over a
//! borrowed `VenueState` under the venue's read lock. The async operations
//! (`queries`, `locks`, `commit`, `admin`) resolve the venue, take the right
//! guard, and go through the store for every durable change.

mod admin;
pub mod allocator;
pub mod availability;
mod cache;
mod commit;
pub mod duration;
mod error;
mod locks;
mod queries;

pub use allocator::{Allocation, Unavailable};
pub use availability::{AvailabilityQuery, SlotRejection};
pub use cache::{AvailabilityCache, CacheKey};
pub use commit::{BookingConfirmation, BookingRequest};
pub use error::BookingError;
pub use locks::{LockGrant, LockOutcome, LockRefusal, LockRequest};
pub use queries::{AvailabilityReport, AvailabilityRequest};

use std::fmt;
use std::sync::Arc;

use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::*;
use crate::model::*;
use crate::store::{SharedVenueState, Store};

/// Tunables for the booking path.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub lock_ttl_ms: Ms,
    pub slot_step_minutes: Minute,
    /// How many nearby times a refused lock offers instead.
    pub alternatives: usize,
    pub cache_enabled: bool,
    pub lock_rate_per_min: u32,
    pub commit_rate_per_min: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            lock_ttl_ms: 5 * 60_000,
            slot_step_minutes: 15,
            alternatives: 3,
            cache_enabled: true,
            lock_rate_per_min: 30,
            commit_rate_per_min: 10,
        }
    }
}

/// Operations with a per-client request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Throttled {
    AcquireLock,
    CommitBooking,
}

impl fmt::Display for Throttled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Throttled::AcquireLock => "acquire_lock",
            Throttled::CommitBooking => "commit_booking",
        })
    }
}

pub struct Engine {
    store: Arc<Store>,
    cache: AvailabilityCache,
    clock: Clock,
    settings: EngineSettings,
}

impl Engine {
    pub fn new(store: Arc<Store>, clock: Clock, settings: EngineSettings) -> Self {
        let settings = EngineSettings {
            slot_step_minutes: settings.slot_step_minutes.max(MIN_SLOT_STEP_MINUTES),
            alternatives: settings.alternatives.min(MAX_ALTERNATIVES),
            ..settings
        };
        Self {
            store,
            cache: AvailabilityCache::new(settings.cache_enabled),
            clock,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn cache(&self) -> &AvailabilityCache {
        &self.cache
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Spend one unit of `client`'s budget for `op`.
    pub fn admit(&self, client: &str, op: Throttled) -> Result<(), BookingError> {
        let limit = match op {
            Throttled::AcquireLock => self.settings.lock_rate_per_min,
            Throttled::CommitBooking => self.settings.commit_rate_per_min,
        };
        let key = format!("{client}:{op}");
        if self.store.limiter().hit(&key, limit, 60_000, self.clock.now()) {
            Ok(())
        } else {
            metrics::counter!(crate::observability::RATE_LIMITED_TOTAL, "op" => op.to_string())
                .increment(1);
            tracing::warn!(client, %op, "rate limited");
            Err(BookingError::RateLimited)
        }
    }

    fn resolve_venue(&self, slug: &str) -> Result<(Ulid, SharedVenueState), BookingError> {
        let id = self
            .store
            .venue_id_by_slug(slug)
            .ok_or(BookingError::VenueNotFound)?;
        let shared = self.store.venue(&id).ok_or(BookingError::VenueNotFound)?;
        Ok((id, shared))
    }
}

// ── Input validation ──────────────────────────────────────────────

fn validate_party_size(party_size: u32) -> Result<(), BookingError> {
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&party_size) {
        return Err(BookingError::InvalidInput(format!(
            "party size must be between {MIN_PARTY_SIZE} and {MAX_PARTY_SIZE}"
        )));
    }
    Ok(())
}

fn validate_slug(slug: &str) -> Result<(), BookingError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(BookingError::InvalidInput("invalid venue".into()));
    }
    Ok(())
}

fn validate_start(time: chrono::NaiveTime) -> Result<(), BookingError> {
    use chrono::Timelike;
    if time.second() != 0 || time.nanosecond() != 0 {
        return Err(BookingError::InvalidInput(
            "time must be on a whole minute".into(),
        ));
    }
    Ok(())
}

fn service_of<'a>(
    state: &'a crate::store::VenueState,
    service_id: &Ulid,
) -> Result<&'a Service, BookingError> {
    state
        .services
        .get(service_id)
        .ok_or(BookingError::ServiceNotFound)
}
