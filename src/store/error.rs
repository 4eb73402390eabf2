use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("resource {resource_id} does not belong to venue {venue_id}")]
    UnknownResource { venue_id: Ulid, resource_id: Ulid },

    #[error("service {service_id} duration rule {index}: {reason}")]
    InvalidDurationRule {
        service_id: Ulid,
        index: usize,
        reason: &'static str,
    },

    #[error("slug already taken: {0}")]
    SlugTaken(String),

    #[error("reference code already in use: {0}")]
    DuplicateReference(String),

    /// The storage-level exclusion constraint over occupying reservation intervals.
    #[error("reservation overlaps {conflicting} on resource {resource_id}")]
    ExclusionViolation { resource_id: Ulid, conflicting: Ulid },

    #[error("slot {date} {start} already held by lock {token}")]
    LockHeld {
        token: Ulid,
        date: NaiveDate,
        start: chrono::NaiveTime,
    },

    #[error("cannot move reservation {id} from {from:?} to {to:?}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },

    #[error("journal error: {0}")]
    Journal(String),
}

impl StoreError {
    /// Constraint-class failures: the caller's request collided with stored state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::ExclusionViolation { .. } | StoreError::LockHeld { .. }
        )
    }
}
