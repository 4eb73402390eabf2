use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability::{LOCKS_ISSUED_TOTAL, LOCKS_REFUSED_TOTAL, LOCKS_RELEASED_TOTAL};
use crate::store::{StoreError, VenueState};

use super::availability::{check_slot, day_slots, nearest};
use super::{
    BookingError, Engine, service_of, validate_party_size, validate_slug, validate_start,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    pub venue_slug: String,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub party_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockGrant {
    pub token: Ulid,
    pub expires_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRefusal {
    pub message: String,
    /// Nearby bookable times, chronological. May be empty.
    pub alternatives: Vec<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted(LockGrant),
    Refused(LockRefusal),
}

impl Engine {
    /// Hold (venue, date, time) for one guest while they check out.
    ///
    /// The requested slot is re-checked against the full availability
    /// calculation first. A refusal is a normal outcome, not an error.
    pub async fn acquire_lock(&self, req: &LockRequest) -> Result<LockOutcome, BookingError> {
        validate_slug(&req.venue_slug)?;
        validate_party_size(req.party_size)?;
        validate_start(req.time)?;
        let (venue_id, shared) = self.resolve_venue(&req.venue_slug)?;
        let now = self.clock.now();

        {
            let guard = shared.read().await;
            if !guard.venue.approved {
                return Err(BookingError::Forbidden(
                    "this venue is not taking bookings".into(),
                ));
            }
            let service = service_of(&guard, &req.service_id)?;
            if let Err(rejection) = check_slot(
                &guard,
                service,
                req.date,
                req.time,
                req.party_size,
                self.settings.slot_step_minutes,
            ) {
                return Ok(self.refuse(&guard, req, rejection.to_string(), now));
            }
        }

        let lock = SlotLock {
            token: Ulid::new(),
            venue_id,
            service_id: req.service_id,
            party_size: req.party_size,
            date: req.date,
            start: req.time,
            expires_at: now + self.settings.lock_ttl_ms,
            released_at: None,
            reason: None,
        };
        match self.store.issue_lock(lock.clone(), now).await {
            Ok(()) => {
                metrics::counter!(LOCKS_ISSUED_TOTAL).increment(1);
                info!(token = %lock.token, %venue_id, date = %req.date, time = %req.time, "slot lock issued");
                Ok(LockOutcome::Granted(LockGrant {
                    token: lock.token,
                    expires_at: lock.expires_at,
                }))
            }
            Err(e @ StoreError::LockHeld { .. }) => {
                let guard = shared.read().await;
                Ok(self.refuse(&guard, req, BookingError::from(e).public_message(), now))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn refuse(&self, state: &VenueState, req: &LockRequest, message: String, now: Ms) -> LockOutcome {
        metrics::counter!(LOCKS_REFUSED_TOTAL).increment(1);
        debug!(venue = %req.venue_slug, date = %req.date, time = %req.time, %message, "slot lock refused");
        let alternatives = match state.services.get(&req.service_id) {
            Some(service) => {
                let open: Vec<NaiveTime> = day_slots(
                    state,
                    service,
                    req.date,
                    req.party_size,
                    self.settings.slot_step_minutes,
                )
                .into_iter()
                .filter(|t| state.active_lock_on(req.date, *t, now).is_none())
                .collect();
                nearest(&open, req.time, self.settings.alternatives)
            }
            None => Vec::new(),
        };
        LockOutcome::Refused(LockRefusal {
            message,
            alternatives,
        })
    }

    /// Idempotent release. Never fails the caller: unknown and already
    /// released tokens are no-ops, store failures are logged.
    ///
    /// Returns whether this call performed the release.
    pub async fn release_lock(&self, token: Ulid, reason: LockReason) -> bool {
        match self.store.release_lock(token, reason, self.clock.now()).await {
            Ok(Some(lock)) => {
                metrics::counter!(LOCKS_RELEASED_TOTAL, "reason" => reason.as_str()).increment(1);
                debug!(%token, venue_id = %lock.venue_id, reason = reason.as_str(), "slot lock released");
                true
            }
            Ok(None) => {
                debug!(%token, "slot lock already released or unknown");
                false
            }
            Err(e) => {
                warn!(%token, error = %e, "slot lock release failed");
                false
            }
        }
    }

    /// The lock, if it is unreleased, unexpired, and for exactly this slot.
    pub async fn validate_lock(
        &self,
        token: Ulid,
        venue_id: Ulid,
        date: NaiveDate,
        start: NaiveTime,
    ) -> Result<SlotLock, BookingError> {
        let lock = self
            .store
            .lock(&token)
            .await
            .ok_or(BookingError::LockExpired)?;
        if !lock.is_active(self.clock.now()) || !lock.covers(venue_id, date, start) {
            return Err(BookingError::LockExpired);
        }
        Ok(lock)
    }

    /// Release every lock past its expiry with reason `expired`.
    ///
    /// Safe against itself and against guest releases: each release is a
    /// compare-and-set, so a lock counts once however many reapers see it.
    pub async fn reap_expired_locks(&self) -> usize {
        let now = self.clock.now();
        let mut reaped = 0;
        for (token, venue_id) in self.store.expired_locks(now).await {
            match self.store.release_lock(token, LockReason::Expired, now).await {
                Ok(Some(lock)) => {
                    reaped += 1;
                    metrics::counter!(LOCKS_RELEASED_TOTAL, "reason" => LockReason::Expired.as_str())
                        .increment(1);
                    self.cache.invalidate(venue_id, lock.date);
                }
                Ok(None) => {}
                Err(e) => warn!(%token, error = %e, "reaper could not release lock"),
            }
        }
        if reaped > 0 {
            info!(reaped, "expired slot locks released");
        }
        reaped
    }
}
