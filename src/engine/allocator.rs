use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::store::VenueState;

// ── Resource Allocation ───────────────────────────────────────────

/// Where a party would sit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    Single { resource_id: Ulid },
    Group { group_id: Ulid, member_ids: Vec<Ulid> },
}

impl Allocation {
    pub fn into_assignment(self) -> Assignment {
        match self {
            Allocation::Single { resource_id } => Assignment::Resource { resource_id },
            Allocation::Group {
                group_id,
                member_ids,
            } => Assignment::Group {
                group_id,
                member_ids,
            },
        }
    }
}

/// Why a slot cannot be seated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// A venue-wide block overlaps the span.
    VenueBlocked,
    /// The window's per-slot cap is reached.
    SlotFull,
    /// No free table or group fits the party.
    NoCapacity { party_size: u32 },
}

impl fmt::Display for Unavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unavailable::VenueBlocked => f.write_str("the venue is closed at that time"),
            Unavailable::SlotFull => f.write_str("that time is fully booked"),
            Unavailable::NoCapacity { party_size } => {
                write!(f, "no table is free for {party_size} guests at that time")
            }
        }
    }
}

/// Resources that cannot be used over `span` on `date`: blocked or held by an
/// occupying reservation. `None` means a venue-wide block covers the span.
pub fn taken_resources(state: &VenueState, date: NaiveDate, span: &Span) -> Option<HashSet<Ulid>> {
    let mut taken = HashSet::new();
    for block in state.blocks_on(date).iter().filter(|b| b.span.overlaps(span)) {
        match &block.resource_ids {
            None => return None,
            Some(ids) => taken.extend(ids.iter().copied()),
        }
    }
    for r in state.occupying_on(date).filter(|r| r.span.overlaps(span)) {
        taken.extend(r.assignment.resource_ids().iter().copied());
    }
    Some(taken)
}

/// Tightest-fit allocation.
///
/// 1. Any venue-wide block over the span: unavailable.
/// 2. Among free bookable resources that seat the party, the one with the
///    smallest capacity. Ties go to the lowest id.
/// 3. Otherwise, among groups accepting the party whose members are all free
///    and bookable, the one with the smallest `max_party_size`.
///
/// Slot locks are not consulted: a lock is advisory per start time and never
/// reserves a table.
pub fn allocate(
    state: &VenueState,
    date: NaiveDate,
    span: &Span,
    party_size: u32,
) -> Result<Allocation, Unavailable> {
    let taken = taken_resources(state, date, span).ok_or(Unavailable::VenueBlocked)?;
    let free = |id: &Ulid| {
        !taken.contains(id) && state.resources.get(id).is_some_and(|r| r.bookable)
    };

    // BTreeMap iteration is id-ordered and min_by_key keeps the first minimum.
    if let Some(resource) = state
        .resources
        .values()
        .filter(|r| r.capacity >= party_size && free(&r.id))
        .min_by_key(|r| r.capacity)
    {
        return Ok(Allocation::Single {
            resource_id: resource.id,
        });
    }

    state
        .groups
        .values()
        .filter(|g| g.accepts(party_size))
        .filter(|g| !g.member_ids.is_empty() && g.member_ids.iter().all(|id| free(id)))
        .min_by_key(|g| g.max_party_size)
        .map(|g| Allocation::Group {
            group_id: g.id,
            member_ids: g.member_ids.clone(),
        })
        .ok_or(Unavailable::NoCapacity { party_size })
}
