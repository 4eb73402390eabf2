use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{BOOKINGS_COMMITTED_TOTAL, BOOKINGS_FAILED_TOTAL};
use crate::store::{SharedVenueState, Store, StoreError};

use super::availability::check_slot;
use super::{
    BookingError, Engine, service_of, validate_party_size, validate_slug, validate_start,
};

/// Attempts at a fresh reference code when the insert reports a collision.
const REFERENCE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    pub venue_slug: String,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub party_size: u32,
    pub guest: Guest,
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub lock_token: Option<Ulid>,
    /// Created as `pending_payment` until the payment flow settles it.
    #[serde(default)]
    pub requires_payment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub id: Ulid,
    pub reference: String,
    pub guest_name: String,
    pub party_size: u32,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub status: ReservationStatus,
}

impl Engine {
    /// Turn a (possibly locked) slot into a durable reservation.
    ///
    /// A malformed payload returns before anything changes. Every later exit,
    /// including a stale or mismatched lock, releases the presented lock
    /// (`created` on success, `error` otherwise) and invalidates the day's
    /// cached availability.
    pub async fn commit_booking(
        &self,
        req: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        validate_booking(req)?;

        let venue_id = self.store.venue_id_by_slug(&req.venue_slug);
        let result = self.locked_place(venue_id, req).await;

        // Runs on every path past this point.
        if let Some(token) = req.lock_token {
            let reason = if result.is_ok() {
                LockReason::Created
            } else {
                LockReason::Error
            };
            self.release_lock(token, reason).await;
        }
        if let Some(venue_id) = venue_id {
            self.cache.invalidate(venue_id, req.date);
        }

        match &result {
            Ok(confirmation) => {
                metrics::counter!(BOOKINGS_COMMITTED_TOTAL, "status" => confirmation.status.as_str())
                    .increment(1);
                info!(
                    reservation = %confirmation.id,
                    reference = %confirmation.reference,
                    venue = %req.venue_slug,
                    date = %req.date,
                    time = %req.time,
                    party_size = req.party_size,
                    "booking committed"
                );
            }
            Err(e) => {
                metrics::counter!(BOOKINGS_FAILED_TOTAL, "code" => e.code()).increment(1);
                warn!(venue = %req.venue_slug, date = %req.date, time = %req.time, error = %e, "booking failed");
            }
        }
        result
    }

    /// Lock check, then placement against the resolved venue.
    async fn locked_place(
        &self,
        venue_id: Option<Ulid>,
        req: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        if let Some(token) = req.lock_token {
            let venue_id = venue_id.ok_or(BookingError::LockExpired)?;
            self.validate_lock(token, venue_id, req.date, req.time)
                .await?;
        }
        match venue_id.and_then(|id| self.store.venue(&id)) {
            Some(shared) => self.place(&shared, req).await,
            None => Err(BookingError::VenueNotFound),
        }
    }

    /// Steps that run with the venue resolved: approval, allocation, insert.
    async fn place(
        &self,
        shared: &SharedVenueState,
        req: &BookingRequest,
    ) -> Result<BookingConfirmation, BookingError> {
        let (venue_id, span, assignment) = {
            let guard = shared.read().await;
            if !guard.venue.approved {
                return Err(BookingError::Forbidden(
                    "this venue is not taking bookings".into(),
                ));
            }
            let service = service_of(&guard, &req.service_id)?;
            let (span, allocation) = check_slot(
                &guard,
                service,
                req.date,
                req.time,
                req.party_size,
                self.settings.slot_step_minutes,
            )
            .map_err(|rejection| BookingError::SlotConflict(rejection.to_string()))?;
            (guard.id(), span, allocation.into_assignment())
        };

        let status = if req.requires_payment {
            ReservationStatus::PendingPayment
        } else {
            ReservationStatus::Confirmed
        };
        let mut attempt = 1;
        loop {
            let reservation = Reservation {
                id: Ulid::new(),
                reference: new_reference(&self.store),
                venue_id,
                service_id: req.service_id,
                assignment: assignment.clone(),
                date: req.date,
                span,
                party_size: req.party_size,
                status,
                guest: normalized_guest(&req.guest),
                customer_ref: req.customer_ref.clone(),
                created_at: self.clock.now(),
            };
            match self.store.insert_reservation(reservation.clone()).await {
                Ok(()) => return Ok(confirmation_of(&reservation, req.time)),
                Err(StoreError::DuplicateReference(_)) if attempt < REFERENCE_ATTEMPTS => {
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Move a reservation to `status` (payment expiry, staff tooling) and
    /// invalidate the affected day.
    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, BookingError> {
        let reservation = self
            .store
            .set_reservation_status(id, status)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => {
                    BookingError::InvalidInput("unknown reservation".into())
                }
                other => other.into(),
            })?;
        self.cache.invalidate(reservation.venue_id, reservation.date);
        info!(reservation = %id, status = status.as_str(), "reservation status changed");
        Ok(reservation)
    }
}

fn confirmation_of(reservation: &Reservation, time: NaiveTime) -> BookingConfirmation {
    BookingConfirmation {
        id: reservation.id,
        reference: reservation.reference.clone(),
        guest_name: reservation.guest.name.clone(),
        party_size: reservation.party_size,
        date: reservation.date,
        time,
        status: reservation.status,
    }
}

/// Random tail of a fresh ULID: Crockford base32, unambiguous when read aloud.
fn new_reference(store: &Store) -> String {
    loop {
        let id = Ulid::new().to_string();
        let code = &id[id.len() - REFERENCE_LEN..];
        if !store.reference_exists(code) {
            return code.to_string();
        }
    }
}

fn normalized_guest(guest: &Guest) -> Guest {
    let trimmed = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Guest {
        name: guest.name.trim().to_string(),
        email: guest.email.trim().to_ascii_lowercase(),
        phone: trimmed(&guest.phone),
        notes: trimmed(&guest.notes),
    }
}

// ── Payload validation ────────────────────────────────────────────

fn invalid(msg: &str) -> BookingError {
    BookingError::InvalidInput(msg.to_string())
}

fn validate_booking(req: &BookingRequest) -> Result<(), BookingError> {
    validate_slug(&req.venue_slug)?;
    validate_party_size(req.party_size)?;
    validate_start(req.time)?;
    validate_guest(&req.guest)?;
    if let Some(customer_ref) = &req.customer_ref
        && (customer_ref.trim().is_empty() || customer_ref.len() > MAX_CUSTOMER_REF_LEN)
    {
        return Err(invalid("invalid customer reference"));
    }
    Ok(())
}

fn validate_guest(guest: &Guest) -> Result<(), BookingError> {
    let name = guest.name.trim();
    if name.is_empty() || name.chars().count() > MAX_GUEST_NAME_LEN {
        return Err(invalid("guest name is required"));
    }
    if !valid_email(guest.email.trim()) {
        return Err(invalid("a valid email address is required"));
    }
    if let Some(phone) = &guest.phone
        && !valid_phone(phone.trim())
    {
        return Err(invalid("invalid phone number"));
    }
    if let Some(notes) = &guest.notes
        && notes.chars().count() > MAX_NOTES_LEN
    {
        return Err(invalid("notes are too long"));
    }
    Ok(())
}

fn valid_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Empty is allowed (the field is optional).
fn valid_phone(phone: &str) -> bool {
    phone.len() <= MAX_PHONE_LEN
        && phone
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '(' | ')' | '.'))
}
