use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

/// Everything the store knows about one venue. Guarded by a per-venue `RwLock`.
#[derive(Debug, Clone)]
pub struct VenueState {
    pub venue: Venue,
    pub services: HashMap<Ulid, Service>,
    /// Ordered by id so allocation tie-breaks are stable.
    pub resources: BTreeMap<Ulid, Resource>,
    pub groups: BTreeMap<Ulid, ResourceGroup>,
    /// Insertion order is match order.
    pub windows: Vec<BookingWindow>,
    pub devices: HashMap<String, Ulid>,
    pub blocks: BTreeMap<NaiveDate, Vec<Block>>,
    /// Per date, sorted by `span.start`.
    pub reservations: BTreeMap<NaiveDate, Vec<Reservation>>,
    pub locks: HashMap<Ulid, SlotLock>,
    pub walk_ins: Vec<WalkIn>,
}

impl VenueState {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            services: HashMap::new(),
            resources: BTreeMap::new(),
            groups: BTreeMap::new(),
            windows: Vec::new(),
            devices: HashMap::new(),
            blocks: BTreeMap::new(),
            reservations: BTreeMap::new(),
            locks: HashMap::new(),
            walk_ins: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.venue.id
    }

    pub fn windows_for(&self, service_id: Ulid) -> impl Iterator<Item = &BookingWindow> {
        self.windows.iter().filter(move |w| w.service_id == service_id)
    }

    pub fn blocks_on(&self, date: NaiveDate) -> &[Block] {
        self.blocks.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn reservations_on(&self, date: NaiveDate) -> &[Reservation] {
        self.reservations.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Reservations that hold their tables on `date`.
    pub fn occupying_on(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        self.reservations_on(date)
            .iter()
            .filter(|r| r.status.occupies())
    }

    pub fn reservation(&self, date: NaiveDate, id: Ulid) -> Option<&Reservation> {
        self.reservations_on(date).iter().find(|r| r.id == id)
    }

    /// The exclusion constraint: an occupying reservation may not share a
    /// resource with another occupying reservation over an overlapping span.
    ///
    /// Returns the first `(resource, reservation)` pair in the way.
    pub fn exclusion_conflict(&self, candidate: &Reservation) -> Option<(Ulid, Ulid)> {
        if !candidate.status.occupies() {
            return None;
        }
        // Sorted by start: everything from the first reservation starting at or
        // after candidate.end onwards cannot overlap.
        let day = self.reservations_on(candidate.date);
        let right = day.partition_point(|r| r.span.start < candidate.span.end);
        day[..right]
            .iter()
            .filter(|r| r.id != candidate.id && r.status.occupies())
            .filter(|r| r.span.overlaps(&candidate.span))
            .find_map(|r| {
                candidate
                    .assignment
                    .resource_ids()
                    .iter()
                    .find(|rid| r.assignment.uses(rid))
                    .map(|rid| (*rid, r.id))
            })
    }

    /// Active lock on the exact (date, start) slot, if any.
    pub fn active_lock_on(
        &self,
        date: NaiveDate,
        start: chrono::NaiveTime,
        now: Ms,
    ) -> Option<&SlotLock> {
        self.locks
            .values()
            .find(|l| l.date == date && l.start == start && l.is_active(now))
    }

    /// Apply a venue-scoped event. Events for other venues and global events are ignored.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::VenueUpserted(venue) => self.venue = venue.clone(),
            Event::ServiceUpserted(service) => {
                self.services.insert(service.id, service.clone());
            }
            Event::ResourceUpserted(resource) => {
                self.resources.insert(resource.id, resource.clone());
            }
            Event::GroupUpserted(group) => {
                self.groups.insert(group.id, group.clone());
            }
            Event::WindowUpserted { window, .. } => {
                match self.windows.iter_mut().find(|w| w.id == window.id) {
                    Some(existing) => *existing = window.clone(),
                    None => self.windows.push(window.clone()),
                }
            }
            Event::DeviceMapped {
                device_id,
                resource_id,
                ..
            } => {
                self.devices.insert(device_id.clone(), *resource_id);
            }
            Event::BlockAdded(block) => {
                self.blocks.entry(block.date).or_default().push(block.clone());
            }
            Event::BlockRemoved { id, .. } => {
                for day in self.blocks.values_mut() {
                    day.retain(|b| b.id != *id);
                }
                self.blocks.retain(|_, day| !day.is_empty());
            }
            Event::ReservationInserted(reservation) => {
                let day = self.reservations.entry(reservation.date).or_default();
                let pos = day.partition_point(|r| r.span.start <= reservation.span.start);
                day.insert(pos, reservation.clone());
            }
            Event::ReservationStatusChanged { id, status, .. } => {
                if let Some(r) = self
                    .reservations
                    .values_mut()
                    .flat_map(|day| day.iter_mut())
                    .find(|r| r.id == *id)
                {
                    r.status = *status;
                }
            }
            Event::LockIssued(lock) => {
                self.locks.insert(lock.token, lock.clone());
            }
            Event::LockReleased {
                token, at, reason, ..
            } => {
                if let Some(lock) = self.locks.get_mut(token)
                    && lock.released_at.is_none()
                {
                    lock.released_at = Some(*at);
                    lock.reason = Some(*reason);
                }
            }
            Event::WalkInCreated(walk_in) => self.walk_ins.push(walk_in.clone()),
            Event::PosEventReceived(..)
            | Event::QueueItemScheduled(_)
            | Event::PosEventResolved { .. }
            | Event::PosEventEscalated(_) => {}
        }
    }

    /// Events that recreate this venue's current state. Released locks are dropped.
    pub fn snapshot(&self, events: &mut Vec<Event>) {
        let venue_id = self.id();
        events.push(Event::VenueUpserted(self.venue.clone()));
        events.extend(self.services.values().cloned().map(Event::ServiceUpserted));
        events.extend(self.resources.values().cloned().map(Event::ResourceUpserted));
        events.extend(self.groups.values().cloned().map(Event::GroupUpserted));
        events.extend(self.windows.iter().map(|w| Event::WindowUpserted {
            venue_id,
            window: w.clone(),
        }));
        events.extend(self.devices.iter().map(|(device_id, resource_id)| Event::DeviceMapped {
            venue_id,
            device_id: device_id.clone(),
            resource_id: *resource_id,
        }));
        events.extend(self.blocks.values().flatten().cloned().map(Event::BlockAdded));
        events.extend(
            self.reservations
                .values()
                .flatten()
                .cloned()
                .map(Event::ReservationInserted),
        );
        events.extend(
            self.locks
                .values()
                .filter(|l| l.released_at.is_none())
                .cloned()
                .map(Event::LockIssued),
        );
        events.extend(self.walk_ins.iter().cloned().map(Event::WalkInCreated));
    }
}
