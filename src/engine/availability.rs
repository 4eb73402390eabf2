use std::collections::BTreeSet;
use std::fmt;

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::store::VenueState;

use super::BookingError;
use super::allocator::{Allocation, Unavailable, allocate};
use super::duration::resolve_duration;

// ── Availability Calculation ──────────────────────────────────────

/// One day, or every day of a calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityQuery {
    Date(NaiveDate),
    Month { year: i32, month: u32 },
}

impl AvailabilityQuery {
    pub fn dates(self) -> Result<Vec<NaiveDate>, BookingError> {
        match self {
            AvailabilityQuery::Date(date) => Ok(vec![date]),
            AvailabilityQuery::Month { year, month } => {
                let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
                    BookingError::InvalidInput(format!("invalid month {year}-{month}"))
                })?;
                Ok(first
                    .iter_days()
                    .take_while(|d| d.month() == month)
                    .collect())
            }
        }
    }
}

/// Close of a window in minutes; an end of 00:00 means midnight.
fn close_of(window: &BookingWindow) -> Minute {
    match minute_of(window.end) {
        0 => MINUTES_PER_DAY,
        m => m,
    }
}

/// Start minutes offered by `window` for a seating of `duration`: every
/// `step` from the opening, up to the last start that still ends by the close.
pub fn candidate_starts(
    window: &BookingWindow,
    duration: Minute,
    step: Minute,
) -> impl Iterator<Item = Minute> {
    let open = minute_of(window.start);
    let last = close_of(window).checked_sub(duration);
    let range = match last {
        Some(last) if last >= open && duration > 0 => open..last + 1,
        _ => 0..0,
    };
    range.step_by(step.max(1) as usize)
}

/// Windows of `service_id` that apply to `date` and are not blacked out.
pub fn open_windows(
    state: &VenueState,
    service_id: ulid::Ulid,
    date: NaiveDate,
) -> impl Iterator<Item = &BookingWindow> {
    state
        .windows_for(service_id)
        .filter(move |w| w.applies_to(date) && !w.blacked_out(date))
}

/// Whether `span` can be seated under `window`: per-slot cap, then allocation.
pub fn slot_open(
    state: &VenueState,
    window: &BookingWindow,
    date: NaiveDate,
    span: &Span,
    party_size: u32,
) -> Result<Allocation, Unavailable> {
    if let Some(cap) = window.max_per_slot {
        let starting = state
            .occupying_on(date)
            .filter(|r| r.service_id == window.service_id && r.span.start == span.start)
            .count();
        if starting >= cap as usize {
            return Err(Unavailable::SlotFull);
        }
    }
    allocate(state, date, span, party_size)
}

/// Bookable start times for `party_size` on `date`, chronological, no repeats.
pub fn day_slots(
    state: &VenueState,
    service: &Service,
    date: NaiveDate,
    party_size: u32,
    step: Minute,
) -> Vec<NaiveTime> {
    let duration = resolve_duration(&service.duration_rules, party_size);
    let mut open = BTreeSet::new();
    for window in open_windows(state, service.id, date) {
        for start in candidate_starts(window, duration, step) {
            if open.contains(&start) {
                continue;
            }
            let span = Span::new(start, start + duration);
            if slot_open(state, window, date, &span, party_size).is_ok() {
                open.insert(start);
            }
        }
    }
    open.into_iter().filter_map(time_of).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotRejection {
    /// No open window offers this start time for this party.
    OutsideWindow,
    Unavailable(Unavailable),
}

impl fmt::Display for SlotRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRejection::OutsideWindow => f.write_str("that time is not offered for this service"),
            SlotRejection::Unavailable(u) => fmt::Display::fmt(u, f),
        }
    }
}

/// Re-run the calculation for a single requested start.
pub fn check_slot(
    state: &VenueState,
    service: &Service,
    date: NaiveDate,
    start: NaiveTime,
    party_size: u32,
    step: Minute,
) -> Result<(Span, Allocation), SlotRejection> {
    let duration = resolve_duration(&service.duration_rules, party_size);
    let start = minute_of(start);
    let span = Span::new(start, start + duration);
    let mut rejection = SlotRejection::OutsideWindow;
    for window in open_windows(state, service.id, date) {
        if !candidate_starts(window, duration, step).any(|m| m == start) {
            continue;
        }
        match slot_open(state, window, date, &span, party_size) {
            Ok(allocation) => return Ok((span, allocation)),
            Err(e) => rejection = SlotRejection::Unavailable(e),
        }
    }
    Err(rejection)
}

/// Up to `n` of `slots` closest to `to` (ties to the earlier), returned in order.
pub fn nearest(slots: &[NaiveTime], to: NaiveTime, n: usize) -> Vec<NaiveTime> {
    let target = i64::from(minute_of(to));
    let mut ranked: Vec<NaiveTime> = slots.iter().copied().filter(|s| *s != to).collect();
    ranked.sort_by_key(|s| {
        let m = i64::from(minute_of(*s));
        ((m - target).abs(), m)
    });
    ranked.truncate(n);
    ranked.sort();
    ranked
}
