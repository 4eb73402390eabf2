use std::sync::Arc;

use async_trait::async_trait;
use ulid::Ulid;

use crate::limits::REFERENCE_LEN;
use crate::model::*;
use crate::store::Store;

use super::ReconcileError;

/// Decides where an inbound point-of-sale event belongs.
///
/// An `Err` is a processing failure: the queue retries it with backoff.
#[async_trait]
pub trait EventLinker: Send + Sync {
    async fn link(&self, event: &PosEvent, now: Ms) -> Result<LinkOutcome, ReconcileError>;
}

/// Links orders to reservations at the event's venue, in order:
/// customer reference, then a reference code in the metadata, then a walk-in
/// placed by the device's table mapping (unassigned without one).
pub struct ReservationLinker {
    store: Arc<Store>,
}

impl ReservationLinker {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Most relevant active reservation with this customer reference:
    /// seated before confirmed before pending, then the latest.
    async fn by_customer_ref(&self, venue_id: Ulid, customer_ref: &str) -> Result<Option<Ulid>, ReconcileError> {
        let shared = self
            .store
            .venue(&venue_id)
            .ok_or(ReconcileError::VenueMissing(venue_id))?;
        let guard = shared.read().await;
        let best = guard
            .reservations
            .values()
            .flatten()
            .filter(|r| r.status.occupies() && r.customer_ref.as_deref() == Some(customer_ref))
            .max_by_key(|r| (status_rank(r.status), r.date, r.span.start));
        Ok(best.map(|r| r.id))
    }

    async fn by_reference_code(&self, venue_id: Ulid, text: &str) -> Option<Ulid> {
        for code in reference_candidates(text) {
            if let Some(r) = self.store.reservation_by_reference(&code).await
                && r.venue_id == venue_id
                && !matches!(r.status, ReservationStatus::Cancelled | ReservationStatus::Incomplete)
            {
                return Some(r.id);
            }
        }
        None
    }
}

fn status_rank(status: ReservationStatus) -> u8 {
    match status {
        ReservationStatus::Seated => 2,
        ReservationStatus::Confirmed => 1,
        _ => 0,
    }
}

/// Every whitespace/punctuation-delimited token that could be a reference code,
/// upper-cased.
fn reference_candidates(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|tok| tok.len() == REFERENCE_LEN)
        .map(str::to_ascii_uppercase)
        .filter(|tok| tok.chars().all(is_crockford))
        .collect()
}

fn is_crockford(c: char) -> bool {
    c.is_ascii_digit() || (c.is_ascii_uppercase() && !matches!(c, 'I' | 'L' | 'O' | 'U'))
}

#[async_trait]
impl EventLinker for ReservationLinker {
    async fn link(&self, event: &PosEvent, now: Ms) -> Result<LinkOutcome, ReconcileError> {
        if let Some(customer_ref) = event.customer_ref.as_deref()
            && let Some(reservation_id) = self.by_customer_ref(event.venue_id, customer_ref).await?
        {
            return Ok(LinkOutcome::Linked {
                reservation_id,
                matched_by: MatchKind::CustomerRef,
            });
        }

        if let Some(metadata) = event.metadata.as_deref()
            && let Some(reservation_id) = self.by_reference_code(event.venue_id, metadata).await
        {
            return Ok(LinkOutcome::Linked {
                reservation_id,
                matched_by: MatchKind::ReferenceCode,
            });
        }

        let resource_id = match event.device_id.as_deref() {
            Some(device) => {
                let shared = self
                    .store
                    .venue(&event.venue_id)
                    .ok_or(ReconcileError::VenueMissing(event.venue_id))?;
                let guard = shared.read().await;
                guard.devices.get(device).copied()
            }
            None => None,
        };
        let walk_in = WalkIn {
            id: Ulid::new(),
            venue_id: event.venue_id,
            event_id: event.event_id.clone(),
            resource_id,
            created_at: now,
        };
        let walk_in_id = walk_in.id;
        self.store.create_walk_in(walk_in).await?;
        Ok(LinkOutcome::WalkInCreated {
            walk_in_id,
            resource_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_tokens() {
        let found = reference_candidates("Table 4, booking ref: 7k2mq9xz. thanks");
        assert_eq!(found, vec!["7K2MQ9XZ".to_string()]);
        // Wrong length, or letters outside the alphabet.
        assert!(reference_candidates("ABC 123456789 ILOU1234").is_empty());
        assert!(reference_candidates("").is_empty());
    }

    #[test]
    fn seated_outranks_confirmed() {
        assert!(status_rank(ReservationStatus::Seated) > status_rank(ReservationStatus::Confirmed));
        assert!(
            status_rank(ReservationStatus::Confirmed)
                > status_rank(ReservationStatus::PendingPayment)
        );
    }
}
