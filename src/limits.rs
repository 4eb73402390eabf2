//! Hard bounds on caller-supplied input.

pub const MIN_PARTY_SIZE: u32 = 1;
pub const MAX_PARTY_SIZE: u32 = 50;

/// A seating never runs past a full day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

pub const MAX_SLUG_LEN: usize = 64;
pub const MAX_GUEST_NAME_LEN: usize = 120;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 1_000;
pub const MAX_CUSTOMER_REF_LEN: usize = 128;

pub const MAX_EVENT_ID_LEN: usize = 128;
pub const MAX_DEVICE_ID_LEN: usize = 128;
pub const MAX_EVENT_METADATA_LEN: usize = 4_096;
pub const MAX_EVENT_PAYLOAD_LEN: usize = 64 * 1024;

/// Longest accepted request line on the wire.
pub const MAX_LINE_LEN: usize = 256 * 1024;

pub const MAX_QUEUE_BATCH: usize = 500;
pub const MAX_ALTERNATIVES: usize = 10;

/// Reference codes are this many Crockford base32 characters.
pub const REFERENCE_LEN: usize = 8;

/// Slots never start closer together than this.
pub const MIN_SLOT_STEP_MINUTES: u32 = 5;
