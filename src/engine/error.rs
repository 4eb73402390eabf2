use thiserror::Error;

use crate::store::StoreError;

/// Everything a booking-path caller can get back instead of a result.
///
/// `Display` is the server-side (log) form and may carry internals;
/// callers only ever see `code()`, `status()` and `public_message()`.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("venue not found")]
    VenueNotFound,

    #[error("service not found")]
    ServiceNotFound,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("lock expired or does not match the requested slot")]
    LockExpired,

    #[error("slot conflict: {0}")]
    SlotConflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::InvalidInput(_) => "invalid_input",
            BookingError::VenueNotFound => "venue_not_found",
            BookingError::ServiceNotFound => "service_not_found",
            BookingError::Forbidden(_) => "forbidden",
            BookingError::LockExpired => "lock_expired",
            BookingError::SlotConflict(_) => "slot_conflict",
            BookingError::RateLimited => "rate_limited",
            BookingError::Internal(_) => "server_error",
        }
    }

    /// HTTP-equivalent status.
    pub fn status(&self) -> u16 {
        match self {
            BookingError::InvalidInput(_) => 400,
            BookingError::VenueNotFound | BookingError::ServiceNotFound => 404,
            BookingError::Forbidden(_) => 403,
            BookingError::LockExpired => 410,
            BookingError::SlotConflict(_) => 409,
            BookingError::RateLimited => 429,
            BookingError::Internal(_) => 500,
        }
    }

    pub fn public_message(&self) -> String {
        match self {
            BookingError::InvalidInput(msg) => msg.clone(),
            BookingError::VenueNotFound => "venue not found".into(),
            BookingError::ServiceNotFound => "service not found".into(),
            BookingError::Forbidden(msg) => msg.clone(),
            BookingError::LockExpired => {
                "your hold on this time has expired, please choose a time again".into()
            }
            BookingError::SlotConflict(msg) => msg.clone(),
            BookingError::RateLimited => "too many requests, please slow down".into(),
            BookingError::Internal(_) => "internal error".into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BookingError::SlotConflict(_) | BookingError::LockExpired)
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ExclusionViolation { .. } => BookingError::SlotConflict(
                "that time was just taken, please choose another".into(),
            ),
            StoreError::LockHeld { .. } => BookingError::SlotConflict(
                "that time is being held by another guest".into(),
            ),
            StoreError::InvalidTransition { from, to, .. } => BookingError::InvalidInput(format!(
                "reservation cannot move from {from:?} to {to:?}"
            )),
            err @ StoreError::InvalidDurationRule { .. } => BookingError::InvalidInput(err.to_string()),
            other => BookingError::Internal(other.to_string()),
        }
    }
}
