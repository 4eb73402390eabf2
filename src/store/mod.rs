//! The durable Resource/Schedule store.
//!
//! In-memory tables rebuilt from an append-only journal. Every mutation is
//! journaled (group-committed, fsync'd) before it is applied, and each venue's
//! tables sit behind their own `RwLock`. The exclusion constraint over
//! occupying reservations is enforced here, inside the venue write lock, so
//! nothing above the store can bypass it.

mod error;
mod journal;
mod mutations;
mod queue;
mod ratelimit;
mod venue;

pub use error::StoreError;
pub use queue::QueueState;
pub use ratelimit::RateLimiter;
pub use venue::VenueState;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use journal::Journal;

pub type SharedVenueState = Arc<RwLock<VenueState>>;

pub struct Store {
    venues: DashMap<Ulid, SharedVenueState>,
    slugs: DashMap<String, Ulid>,
    /// lock token → venue
    lock_index: DashMap<Ulid, Ulid>,
    /// reservation id → (venue, date)
    reservation_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// reference code → reservation id
    references: DashMap<String, Ulid>,
    queue: Mutex<QueueState>,
    limiter: RateLimiter,
    journal: Journal,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot and the file swap see no interleaved append.
    gate: RwLock<()>,
}

impl Store {
    /// Open (or create) the journal at `path` and rebuild state from it.
    /// Must be called inside a tokio runtime: it spawns the journal writer.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let (wal, events) = Wal::<Event>::recover(path)?;

        let store = Self {
            venues: DashMap::new(),
            slugs: DashMap::new(),
            lock_index: DashMap::new(),
            reservation_index: DashMap::new(),
            references: DashMap::new(),
            queue: Mutex::new(QueueState::default()),
            limiter: RateLimiter::default(),
            journal: Journal::spawn(wal),
            gate: RwLock::new(()),
        };

        // Sole owner during replay: try_* never contends. Never use blocking_*
        // here, this may run inside an async context.
        for event in &events {
            store.replay_one(event);
        }
        tracing::info!(events = events.len(), venues = store.venues.len(), "store replayed");
        Ok(store)
    }

    fn replay_one(&self, event: &Event) {
        match event_venue(event) {
            Some(venue_id) => {
                if let Event::VenueUpserted(venue) = event
                    && !self.venues.contains_key(&venue_id)
                {
                    self.venues
                        .insert(venue_id, Arc::new(RwLock::new(VenueState::new(venue.clone()))));
                }
                let Some(shared) = self.venue(&venue_id) else {
                    return;
                };
                self.index(event);
                if let Ok(mut guard) = shared.try_write() {
                    guard.apply(event);
                }
            }
            None => {
                if let Ok(mut queue) = self.queue.try_lock() {
                    queue.apply(event);
                }
            }
        }
    }

    /// Maintain the lookup indexes for a venue-scoped event.
    fn index(&self, event: &Event) {
        match event {
            Event::VenueUpserted(venue) => {
                self.slugs.retain(|_, id| *id != venue.id);
                self.slugs.insert(venue.slug.clone(), venue.id);
            }
            Event::ReservationInserted(r) => {
                self.reservation_index.insert(r.id, (r.venue_id, r.date));
                self.references.insert(r.reference.clone(), r.id);
            }
            Event::LockIssued(lock) => {
                self.lock_index.insert(lock.token, lock.venue_id);
            }
            _ => {}
        }
    }

    async fn persist(&self, guard: &mut VenueState, event: Event) -> Result<(), StoreError> {
        self.journal.append(&event).await?;
        self.index(&event);
        guard.apply(&event);
        Ok(())
    }

    async fn persist_queue(&self, queue: &mut QueueState, event: Event) -> Result<(), StoreError> {
        self.journal.append(&event).await?;
        queue.apply(&event);
        Ok(())
    }

    // ── Reads ────────────────────────────────────────────────

    pub fn venue(&self, id: &Ulid) -> Option<SharedVenueState> {
        self.venues.get(id).map(|e| e.value().clone())
    }

    pub fn venue_id_by_slug(&self, slug: &str) -> Option<Ulid> {
        self.slugs.get(slug).map(|e| *e.value())
    }

    pub fn venue_ids(&self) -> Vec<Ulid> {
        self.venues.iter().map(|e| *e.key()).collect()
    }

    pub async fn lock(&self, token: &Ulid) -> Option<SlotLock> {
        let venue_id = *self.lock_index.get(token)?.value();
        let shared = self.venue(&venue_id)?;
        let guard = shared.read().await;
        guard.locks.get(token).cloned()
    }

    pub async fn reservation(&self, id: &Ulid) -> Option<Reservation> {
        let (venue_id, date) = *self.reservation_index.get(id)?.value();
        let shared = self.venue(&venue_id)?;
        let guard = shared.read().await;
        guard.reservation(date, *id).cloned()
    }

    pub async fn reservation_by_reference(&self, reference: &str) -> Option<Reservation> {
        let id = *self.references.get(reference)?.value();
        self.reservation(&id).await
    }

    pub fn reference_exists(&self, reference: &str) -> bool {
        self.references.contains_key(reference)
    }

    /// Every (token, venue) whose lock is unreleased and past expiry.
    pub async fn expired_locks(&self, now: Ms) -> Vec<(Ulid, Ulid)> {
        let venues: Vec<SharedVenueState> = self.venues.iter().map(|e| e.value().clone()).collect();
        let mut expired = Vec::new();
        for shared in venues {
            let guard = shared.read().await;
            expired.extend(
                guard
                    .locks
                    .values()
                    .filter(|l| l.released_at.is_none() && l.expires_at < now)
                    .map(|l| (l.token, l.venue_id)),
            );
        }
        expired
    }

    pub async fn inbound_event(&self, event_id: &str) -> Option<InboundEvent> {
        self.queue.lock().await.events.get(event_id).cloned()
    }

    pub async fn queue_item(&self, event_id: &str) -> Option<QueueItem> {
        self.queue.lock().await.items.get(event_id).cloned()
    }

    pub async fn manual_reviews(&self) -> Vec<ManualReview> {
        self.queue.lock().await.reviews.clone()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // ── Compaction ───────────────────────────────────────────

    pub async fn appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    /// Rewrite the journal as the minimal event list that recreates current state.
    pub async fn compact(&self) -> Result<usize, StoreError> {
        let _exclusive = self.gate.write().await;
        let venues: Vec<SharedVenueState> = self.venues.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for shared in &venues {
            shared.read().await.snapshot(&mut events);
        }
        self.queue.lock().await.snapshot(&mut events);
        let count = events.len();
        self.journal.compact(events).await?;

        // Released locks are gone from the journal now; drop them from memory too.
        let mut live = HashSet::new();
        for shared in &venues {
            let mut guard = shared.write().await;
            guard.locks.retain(|_, lock| lock.released_at.is_none());
            live.extend(guard.locks.keys().copied());
        }
        self.lock_index.retain(|token, _| live.contains(token));
        Ok(count)
    }
}

/// The venue an event belongs to; `None` for reconciliation-queue events.
fn event_venue(event: &Event) -> Option<Ulid> {
    match event {
        Event::VenueUpserted(v) => Some(v.id),
        Event::ServiceUpserted(s) => Some(s.venue_id),
        Event::ResourceUpserted(r) => Some(r.venue_id),
        Event::GroupUpserted(g) => Some(g.venue_id),
        Event::WindowUpserted { venue_id, .. }
        | Event::DeviceMapped { venue_id, .. }
        | Event::BlockRemoved { venue_id, .. }
        | Event::ReservationStatusChanged { venue_id, .. }
        | Event::LockReleased { venue_id, .. } => Some(*venue_id),
        Event::BlockAdded(b) => Some(b.venue_id),
        Event::ReservationInserted(r) => Some(r.venue_id),
        Event::LockIssued(l) => Some(l.venue_id),
        Event::WalkInCreated(w) => Some(w.venue_id),
        Event::PosEventReceived(..)
        | Event::QueueItemScheduled(_)
        | Event::PosEventResolved { .. }
        | Event::PosEventEscalated(_) => None,
    }
}

#[cfg(test)]
mod tests;
