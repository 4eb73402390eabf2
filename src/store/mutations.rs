use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::MAX_DURATION_MINUTES;
use crate::model::*;

use super::{Store, StoreError, VenueState};

impl Store {
    /// Lookup venue, acquire its write lock.
    async fn venue_write(
        &self,
        venue_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VenueState>, StoreError> {
        let shared = self.venue(&venue_id).ok_or(StoreError::NotFound(venue_id))?;
        Ok(shared.write_owned().await)
    }

    fn require_resources<'a>(
        guard: &VenueState,
        ids: impl IntoIterator<Item = &'a Ulid>,
    ) -> Result<(), StoreError> {
        for id in ids {
            if !guard.resources.contains_key(id) {
                return Err(StoreError::UnknownResource {
                    venue_id: guard.id(),
                    resource_id: *id,
                });
            }
        }
        Ok(())
    }

    fn validate_duration_rules(service: &Service) -> Result<(), StoreError> {
        for (index, rule) in service.duration_rules.iter().enumerate() {
            let reason = if rule.duration_minutes == 0 {
                "duration must be at least one minute"
            } else if rule.duration_minutes > MAX_DURATION_MINUTES {
                "duration must fit in a day"
            } else if rule.min_guests > rule.max_guests {
                "min_guests exceeds max_guests"
            } else {
                continue;
            };
            return Err(StoreError::InvalidDurationRule {
                service_id: service.id,
                index,
                reason,
            });
        }
        Ok(())
    }

    // ── Venue configuration ──────────────────────────────────

    pub async fn upsert_venue(&self, venue: Venue) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if let Some(owner) = self.venue_id_by_slug(&venue.slug)
            && owner != venue.id
        {
            return Err(StoreError::SlugTaken(venue.slug));
        }
        match self.venue(&venue.id) {
            Some(shared) => {
                let mut guard = shared.write().await;
                self.persist(&mut guard, Event::VenueUpserted(venue)).await
            }
            None => {
                let event = Event::VenueUpserted(venue.clone());
                self.journal.append(&event).await?;
                self.index(&event);
                self.venues
                    .insert(venue.id, Arc::new(RwLock::new(VenueState::new(venue))));
                Ok(())
            }
        }
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), StoreError> {
        Self::validate_duration_rules(&service)?;
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(service.venue_id).await?;
        self.persist(&mut guard, Event::ServiceUpserted(service)).await
    }

    pub async fn upsert_resource(&self, resource: Resource) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(resource.venue_id).await?;
        self.persist(&mut guard, Event::ResourceUpserted(resource)).await
    }

    pub async fn upsert_group(&self, group: ResourceGroup) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(group.venue_id).await?;
        Self::require_resources(&guard, &group.member_ids)?;
        self.persist(&mut guard, Event::GroupUpserted(group)).await
    }

    pub async fn upsert_window(
        &self,
        venue_id: Ulid,
        window: BookingWindow,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(venue_id).await?;
        if !guard.services.contains_key(&window.service_id) {
            return Err(StoreError::NotFound(window.service_id));
        }
        self.persist(&mut guard, Event::WindowUpserted { venue_id, window })
            .await
    }

    /// Point-of-sale device → table placement, used for walk-ins.
    pub async fn map_device(
        &self,
        venue_id: Ulid,
        device_id: String,
        resource_id: Ulid,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(venue_id).await?;
        Self::require_resources(&guard, [&resource_id])?;
        let event = Event::DeviceMapped {
            venue_id,
            device_id,
            resource_id,
        };
        self.persist(&mut guard, event).await
    }

    pub async fn add_block(&self, block: Block) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(block.venue_id).await?;
        if let Some(ids) = &block.resource_ids {
            Self::require_resources(&guard, ids)?;
        }
        self.persist(&mut guard, Event::BlockAdded(block)).await
    }

    /// Returns the date the block was on.
    pub async fn remove_block(&self, venue_id: Ulid, id: Ulid) -> Result<NaiveDate, StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(venue_id).await?;
        let date = guard
            .blocks
            .values()
            .flatten()
            .find(|b| b.id == id)
            .map(|b| b.date)
            .ok_or(StoreError::NotFound(id))?;
        self.persist(&mut guard, Event::BlockRemoved { venue_id, id })
            .await?;
        Ok(date)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Durable insert, guarded by the exclusion constraint.
    pub async fn insert_reservation(&self, reservation: Reservation) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        if self.reference_exists(&reservation.reference) {
            return Err(StoreError::DuplicateReference(reservation.reference));
        }
        let mut guard = self.venue_write(reservation.venue_id).await?;
        Self::require_resources(&guard, reservation.assignment.resource_ids())?;

        if let Some((resource_id, conflicting)) = guard.exclusion_conflict(&reservation) {
            metrics::counter!(crate::observability::EXCLUSION_VIOLATIONS_TOTAL).increment(1);
            return Err(StoreError::ExclusionViolation {
                resource_id,
                conflicting,
            });
        }
        self.persist(&mut guard, Event::ReservationInserted(reservation))
            .await
    }

    /// Move a reservation to `status`. Terminal statuses never move again.
    pub async fn set_reservation_status(
        &self,
        id: Ulid,
        status: ReservationStatus,
    ) -> Result<Reservation, StoreError> {
        let _gate = self.gate.read().await;
        let (venue_id, date) = *self
            .reservation_index
            .get(&id)
            .ok_or(StoreError::NotFound(id))?
            .value();
        let mut guard = self.venue_write(venue_id).await?;
        let current = guard
            .reservation(date, id)
            .cloned()
            .ok_or(StoreError::NotFound(id))?;
        if current.status == status {
            return Ok(current);
        }
        if current.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        let event = Event::ReservationStatusChanged {
            venue_id,
            id,
            status,
        };
        self.persist(&mut guard, event).await?;
        Ok(Reservation { status, ..current })
    }

    pub async fn create_walk_in(&self, walk_in: WalkIn) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(walk_in.venue_id).await?;
        if let Some(rid) = &walk_in.resource_id {
            Self::require_resources(&guard, [rid])?;
        }
        self.persist(&mut guard, Event::WalkInCreated(walk_in)).await
    }

    // ── Slot locks ───────────────────────────────────────────

    /// Issue a lock unless another is active on the same (venue, date, start).
    pub async fn issue_lock(&self, lock: SlotLock, now: Ms) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut guard = self.venue_write(lock.venue_id).await?;
        if let Some(held) = guard.active_lock_on(lock.date, lock.start, now) {
            return Err(StoreError::LockHeld {
                token: held.token,
                date: held.date,
                start: held.start,
            });
        }
        self.persist(&mut guard, Event::LockIssued(lock)).await
    }

    /// Compare-and-set release: only a lock with no `released_at` transitions.
    ///
    /// Returns the released lock, or `None` when the token is unknown or the
    /// lock was already released (by the guest, the reaper, or a commit).
    pub async fn release_lock(
        &self,
        token: Ulid,
        reason: LockReason,
        now: Ms,
    ) -> Result<Option<SlotLock>, StoreError> {
        let _gate = self.gate.read().await;
        let Some(venue_id) = self.lock_index.get(&token).map(|e| *e.value()) else {
            return Ok(None);
        };
        let mut guard = self.venue_write(venue_id).await?;
        let lock = match guard.locks.get(&token) {
            Some(lock) if lock.released_at.is_none() => lock.clone(),
            _ => return Ok(None),
        };
        let event = Event::LockReleased {
            token,
            venue_id,
            at: now,
            reason,
        };
        self.persist(&mut guard, event).await?;
        Ok(Some(SlotLock {
            released_at: Some(now),
            reason: Some(reason),
            ..lock
        }))
    }

    // ── Reconciliation queue ─────────────────────────────────

    /// Persist an inbound event and queue it. `Ok(false)` on duplicate receipt.
    pub async fn enqueue_event(&self, event: PosEvent, now: Ms) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        let mut queue = self.queue.lock().await;
        if queue.events.contains_key(&event.event_id) {
            return Ok(false);
        }
        let item = QueueItem {
            event_id: event.event_id.clone(),
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            enqueued_at: now,
        };
        self.persist_queue(&mut queue, Event::PosEventReceived(item, event))
            .await?;
        Ok(true)
    }

    /// Claim up to `limit` due items, oldest first, hiding each for `lease_ms`
    /// so a concurrent drain skips it.
    pub async fn claim_due(
        &self,
        now: Ms,
        limit: usize,
        lease_ms: Ms,
    ) -> Result<Vec<(QueueItem, PosEvent)>, StoreError> {
        let _gate = self.gate.read().await;
        let mut queue = self.queue.lock().await;
        let due = queue.due(now, limit);
        let mut claimed = Vec::with_capacity(due.len());
        for item in due {
            let Some(event) = queue.events.get(&item.event_id).map(|e| e.event.clone()) else {
                continue;
            };
            let leased = QueueItem {
                next_attempt_at: now + lease_ms,
                ..item
            };
            self.persist_queue(&mut queue, Event::QueueItemScheduled(leased.clone()))
                .await?;
            claimed.push((leased, event));
        }
        Ok(claimed)
    }

    /// Store an updated item (after a failed attempt). No-op if the item left the queue.
    pub async fn reschedule(&self, item: QueueItem) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut queue = self.queue.lock().await;
        if !queue.items.contains_key(&item.event_id) {
            return Ok(());
        }
        self.persist_queue(&mut queue, Event::QueueItemScheduled(item))
            .await
    }

    pub async fn resolve_event(
        &self,
        event_id: String,
        outcome: LinkOutcome,
    ) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut queue = self.queue.lock().await;
        self.persist_queue(&mut queue, Event::PosEventResolved { event_id, outcome })
            .await
    }

    pub async fn escalate_event(&self, review: ManualReview) -> Result<(), StoreError> {
        let _gate = self.gate.read().await;
        let mut queue = self.queue.lock().await;
        self.persist_queue(&mut queue, Event::PosEventEscalated(review))
            .await
    }
}
