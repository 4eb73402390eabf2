use chrono::{NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. Used for every wall-clock instant (expiry, retries).
pub type Ms = i64;

/// Minutes since local midnight at the venue.
pub type Minute = u32;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

pub fn minute_of(t: NaiveTime) -> Minute {
    t.hour() * 60 + t.minute()
}

/// `None` for minutes at or past midnight (a span end can sit there, a start never does).
pub fn time_of(m: Minute) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(m / 60, m % 60, 0)
}

/// Half-open interval `[start, end)` within one service day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn starting_at(start: NaiveTime, duration: Minute) -> Self {
        let start = minute_of(start);
        Self::new(start, start + duration)
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn start_time(&self) -> Option<NaiveTime> {
        time_of(self.start)
    }

    pub fn end_time(&self) -> Option<NaiveTime> {
        time_of(self.end)
    }
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

// ── Venue configuration ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Venue {
    pub id: Ulid,
    pub slug: String,
    pub name: String,
    /// Only approved venues accept bookings.
    pub approved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRule {
    pub min_guests: u32,
    pub max_guests: u32,
    pub duration_minutes: Minute,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: String,
    /// Matched in order; first hit wins.
    pub duration_rules: Vec<DurationRule>,
}

/// A physical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub name: Option<String>,
    pub capacity: u32,
    pub bookable: bool,
}

/// A pre-approved combination of tables booked as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGroup {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub member_ids: Vec<Ulid>,
    pub min_party_size: u32,
    pub max_party_size: u32,
}

impl ResourceGroup {
    pub fn accepts(&self, party_size: u32) -> bool {
        self.min_party_size <= party_size && party_size <= self.max_party_size
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub range: DateRange,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    pub id: Ulid,
    pub service_id: Ulid,
    pub days_of_week: Vec<Weekday>,
    pub start: NaiveTime,
    pub end: NaiveTime,
    /// Cap on reservations of this service starting at the same time.
    pub max_per_slot: Option<u32>,
    pub date_range: Option<DateRange>,
    pub blackout_periods: Vec<BlackoutPeriod>,
}

impl BookingWindow {
    pub fn applies_to(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        self.days_of_week.contains(&date.weekday())
            && self.date_range.is_none_or(|r| r.contains(date))
    }

    pub fn blacked_out(&self, date: NaiveDate) -> bool {
        self.blackout_periods.iter().any(|b| b.range.contains(date))
    }
}

/// Manually declared unavailability. `resource_ids: None` blocks the whole venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub date: NaiveDate,
    pub span: Span,
    pub resource_ids: Option<Vec<Ulid>>,
}

impl Block {
    pub fn is_venue_wide(&self) -> bool {
        self.resource_ids.is_none()
    }
}

// ── Reservations ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    PendingPayment,
    Confirmed,
    Seated,
    Finished,
    Cancelled,
    Incomplete,
}

impl ReservationStatus {
    /// Whether the reservation holds its tables for conflict purposes.
    pub fn occupies(self) -> bool {
        matches!(self, Self::PendingPayment | Self::Confirmed | Self::Seated)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Incomplete)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Confirmed => "confirmed",
            Self::Seated => "seated",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Incomplete => "incomplete",
        }
    }
}

/// Which tables a reservation sits at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Assignment {
    Resource { resource_id: Ulid },
    Group { group_id: Ulid, member_ids: Vec<Ulid> },
}

impl Assignment {
    pub fn resource_ids(&self) -> &[Ulid] {
        match self {
            Assignment::Resource { resource_id } => std::slice::from_ref(resource_id),
            Assignment::Group { member_ids, .. } => member_ids,
        }
    }

    pub fn uses(&self, resource_id: &Ulid) -> bool {
        self.resource_ids().contains(resource_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub reference: String,
    pub venue_id: Ulid,
    pub service_id: Ulid,
    pub assignment: Assignment,
    pub date: NaiveDate,
    pub span: Span,
    pub party_size: u32,
    pub status: ReservationStatus,
    pub guest: Guest,
    /// External customer id used by the point-of-sale to correlate orders.
    pub customer_ref: Option<String>,
    pub created_at: Ms,
}

// ── Slot locks ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    Created,
    Expired,
    Error,
    PaymentSucceeded,
    PaymentFailed,
}

impl LockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Expired => "expired",
            Self::Error => "error",
            Self::PaymentSucceeded => "payment_succeeded",
            Self::PaymentFailed => "payment_failed",
        }
    }
}

/// Advisory hold on (venue, date, start) while a guest checks out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotLock {
    pub token: Ulid,
    pub venue_id: Ulid,
    pub service_id: Ulid,
    pub party_size: u32,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub expires_at: Ms,
    pub released_at: Option<Ms>,
    pub reason: Option<LockReason>,
}

impl SlotLock {
    pub fn is_active(&self, now: Ms) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }

    pub fn covers(&self, venue_id: Ulid, date: NaiveDate, start: NaiveTime) -> bool {
        self.venue_id == venue_id && self.date == date && self.start == start
    }
}

// ── Point-of-sale reconciliation ────────────────────────────────

/// Inbound asynchronous event from a point-of-sale system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PosEvent {
    /// External id; receipt is idempotent on it.
    pub event_id: String,
    pub venue_id: Ulid,
    pub customer_ref: Option<String>,
    /// Free text that may embed a reservation reference code.
    pub metadata: Option<String>,
    pub device_id: Option<String>,
    /// Raw JSON body as received.
    pub payload: String,
    pub received_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    CustomerRef,
    ReferenceCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked {
        reservation_id: Ulid,
        matched_by: MatchKind,
    },
    WalkInCreated {
        walk_in_id: Ulid,
        /// `None` when no device mapping placed it: "unassigned".
        resource_id: Option<Ulid>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Queued,
    Processed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub event: PosEvent,
    pub status: EventStatus,
    pub outcome: Option<LinkOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub event_id: String,
    pub attempts: u32,
    pub next_attempt_at: Ms,
    pub last_error: Option<String>,
    pub enqueued_at: Ms,
}

/// Ad-hoc record created when a POS event matches no reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkIn {
    pub id: Ulid,
    pub venue_id: Ulid,
    pub event_id: String,
    pub resource_id: Option<Ulid>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualReview {
    pub id: Ulid,
    pub event_id: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub snapshot: PosEvent,
    pub created_at: Ms,
}

/// Journal record format. Flat, one variant per state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VenueUpserted(Venue),
    ServiceUpserted(Service),
    ResourceUpserted(Resource),
    GroupUpserted(ResourceGroup),
    WindowUpserted {
        venue_id: Ulid,
        window: BookingWindow,
    },
    DeviceMapped {
        venue_id: Ulid,
        device_id: String,
        resource_id: Ulid,
    },
    BlockAdded(Block),
    BlockRemoved {
        venue_id: Ulid,
        id: Ulid,
    },
    ReservationInserted(Reservation),
    ReservationStatusChanged {
        venue_id: Ulid,
        id: Ulid,
        status: ReservationStatus,
    },
    LockIssued(SlotLock),
    LockReleased {
        token: Ulid,
        venue_id: Ulid,
        at: Ms,
        reason: LockReason,
    },
    WalkInCreated(WalkIn),
    PosEventReceived(QueueItem, PosEvent),
    QueueItemScheduled(QueueItem),
    PosEventResolved {
        event_id: String,
        outcome: LinkOutcome,
    },
    PosEventEscalated(ManualReview),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn span_from_time() {
        let s = Span::starting_at(t(19, 0), 90);
        assert_eq!(s, Span::new(1140, 1230));
        assert_eq!(s.duration(), 90);
        assert_eq!(s.start_time(), Some(t(19, 0)));
        assert_eq!(s.end_time(), Some(t(20, 30)));
    }

    #[test]
    fn span_overlap_half_open() {
        let a = Span::new(100, 200);
        let b = Span::new(150, 250);
        let c = Span::new(200, 300);
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn span_end_at_midnight_has_no_time() {
        let s = Span::new(MINUTES_PER_DAY - 60, MINUTES_PER_DAY);
        assert_eq!(s.start_time(), Some(t(23, 0)));
        assert_eq!(s.end_time(), None);
    }

    #[test]
    fn only_live_statuses_occupy() {
        use ReservationStatus::*;
        assert!(PendingPayment.occupies());
        assert!(Confirmed.occupies());
        assert!(Seated.occupies());
        assert!(!Finished.occupies());
        assert!(!Cancelled.occupies());
        assert!(!Incomplete.occupies());
    }

    #[test]
    fn group_assignment_lists_members() {
        let (a, b) = (Ulid::new(), Ulid::new());
        let g = Assignment::Group {
            group_id: Ulid::new(),
            member_ids: vec![a, b],
        };
        assert_eq!(g.resource_ids(), &[a, b]);
        assert!(g.uses(&b));
        let single = Assignment::Resource { resource_id: a };
        assert_eq!(single.resource_ids(), &[a]);
        assert!(!single.uses(&b));
    }

    #[test]
    fn window_day_and_range() {
        let tue = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        let mut w = BookingWindow {
            id: Ulid::new(),
            service_id: Ulid::new(),
            days_of_week: vec![Weekday::Tue],
            start: t(18, 0),
            end: t(21, 30),
            max_per_slot: None,
            date_range: None,
            blackout_periods: vec![],
        };
        assert!(w.applies_to(tue));
        assert!(!w.applies_to(tue.succ_opt().unwrap()));

        w.date_range = Some(DateRange {
            start: NaiveDate::from_ymd_opt(2026, 11, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2026, 11, 30).unwrap(),
        });
        assert!(!w.applies_to(tue));
    }

    #[test]
    fn lock_activity() {
        let lock = SlotLock {
            token: Ulid::new(),
            venue_id: Ulid::new(),
            service_id: Ulid::new(),
            party_size: 2,
            date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            start: t(19, 0),
            expires_at: 1_000,
            released_at: None,
            reason: None,
        };
        assert!(lock.is_active(999));
        assert!(!lock.is_active(1_000));
        let released = SlotLock {
            released_at: Some(500),
            reason: Some(LockReason::Created),
            ..lock
        };
        assert!(!released.is_active(0));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::LockIssued(SlotLock {
            token: Ulid::new(),
            venue_id: Ulid::new(),
            service_id: Ulid::new(),
            party_size: 4,
            date: NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
            start: t(19, 15),
            expires_at: 42,
            released_at: None,
            reason: None,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
