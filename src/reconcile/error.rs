use thiserror::Error;
use ulid::Ulid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    #[error("venue {0} is not loaded")]
    VenueMissing(Ulid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("linker failed: {0}")]
    Linker(String),
}
