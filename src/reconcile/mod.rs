//! At-least-once reconciliation of inbound point-of-sale events.
//!
//! `received → queued → processing → {linked | walk-in created | retry}`,
//! ending in `processed` or, after the retry budget, `failed` with a
//! manual-review record holding the full event.

mod error;
mod linker;
mod policy;

pub use error::ReconcileError;
pub use linker::{EventLinker, ReservationLinker};
pub use policy::RetryPolicy;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::clock::Clock;
use crate::limits::*;
use crate::model::*;
use crate::observability::{
    QUEUE_ESCALATED_TOTAL, QUEUE_PROCESSED_TOTAL, QUEUE_RECEIVED_TOTAL, QUEUE_RETRIES_TOTAL,
};
use crate::store::Store;

/// An event as delivered by the point-of-sale integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosEventInput {
    pub event_id: String,
    pub venue_slug: String,
    #[serde(default)]
    pub customer_ref: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub event_id: String,
    /// Already received earlier; nothing was changed.
    pub duplicate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub claimed: usize,
    pub processed: usize,
    pub retried: usize,
    pub escalated: usize,
}

pub struct ReconciliationQueue {
    store: Arc<Store>,
    linker: Arc<dyn EventLinker>,
    policy: RetryPolicy,
    clock: Clock,
}

impl ReconciliationQueue {
    pub fn new(
        store: Arc<Store>,
        linker: Arc<dyn EventLinker>,
        policy: RetryPolicy,
        clock: Clock,
    ) -> Self {
        Self {
            store,
            linker,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persist and queue an event. Receipt is idempotent on `event_id`.
    pub async fn receive(&self, input: PosEventInput) -> Result<Receipt, ReconcileError> {
        validate(&input)?;
        let venue_id = self
            .store
            .venue_id_by_slug(&input.venue_slug)
            .ok_or_else(|| ReconcileError::UnknownVenue(input.venue_slug.clone()))?;
        let payload = input.payload.to_string();
        if payload.len() > MAX_EVENT_PAYLOAD_LEN {
            return Err(ReconcileError::InvalidEvent("payload too large".into()));
        }

        let now = self.clock.now();
        let event = PosEvent {
            event_id: input.event_id.clone(),
            venue_id,
            customer_ref: input.customer_ref,
            metadata: input.metadata,
            device_id: input.device_id,
            payload,
            received_at: now,
        };
        let fresh = self.store.enqueue_event(event, now).await?;
        if fresh {
            metrics::counter!(QUEUE_RECEIVED_TOTAL).increment(1);
            debug!(event_id = %input.event_id, %venue_id, "pos event queued");
        } else {
            debug!(event_id = %input.event_id, "duplicate pos event ignored");
        }
        Ok(Receipt {
            event_id: input.event_id,
            duplicate: !fresh,
        })
    }

    /// Process one batch of due items, oldest first.
    pub async fn drain(&self) -> Result<DrainReport, ReconcileError> {
        let now = self.clock.now();
        let batch = self.policy.batch_size.clamp(1, MAX_QUEUE_BATCH);
        let claimed = self
            .store
            .claim_due(now, batch, self.policy.lease_ms)
            .await?;

        let mut report = DrainReport {
            claimed: claimed.len(),
            ..DrainReport::default()
        };
        for (item, event) in claimed {
            match self.linker.link(&event, now).await {
                Ok(outcome) => {
                    let label = match &outcome {
                        LinkOutcome::Linked { .. } => "linked",
                        LinkOutcome::WalkInCreated { .. } => "walk_in",
                    };
                    self.store
                        .resolve_event(item.event_id.clone(), outcome)
                        .await?;
                    metrics::counter!(QUEUE_PROCESSED_TOTAL, "outcome" => label).increment(1);
                    report.processed += 1;
                }
                Err(e) => {
                    if self.record_failure(item, event, e.to_string(), now).await? {
                        report.escalated += 1;
                    } else {
                        report.retried += 1;
                    }
                }
            }
        }
        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                processed = report.processed,
                retried = report.retried,
                escalated = report.escalated,
                "reconciliation batch drained"
            );
        }
        Ok(report)
    }

    /// Count a failed attempt. Returns whether the event was escalated.
    async fn record_failure(
        &self,
        item: QueueItem,
        event: PosEvent,
        error: String,
        now: Ms,
    ) -> Result<bool, ReconcileError> {
        let attempts = item.attempts + 1;
        if self.policy.exhausted(attempts) {
            warn!(event_id = %item.event_id, attempts, %error, "pos event escalated to manual review");
            self.store
                .escalate_event(ManualReview {
                    id: Ulid::new(),
                    event_id: item.event_id,
                    attempts,
                    last_error: Some(error),
                    snapshot: event,
                    created_at: now,
                })
                .await?;
            metrics::counter!(QUEUE_ESCALATED_TOTAL).increment(1);
            return Ok(true);
        }

        let next_attempt_at = self.policy.next_attempt_at(attempts, now);
        warn!(event_id = %item.event_id, attempts, next_attempt_at, %error, "pos event failed, retry scheduled");
        self.store
            .reschedule(QueueItem {
                attempts,
                next_attempt_at,
                last_error: Some(error),
                ..item
            })
            .await?;
        metrics::counter!(QUEUE_RETRIES_TOTAL).increment(1);
        Ok(false)
    }
}

fn validate(input: &PosEventInput) -> Result<(), ReconcileError> {
    let invalid = |msg: &str| Err(ReconcileError::InvalidEvent(msg.to_string()));
    if input.event_id.trim().is_empty() || input.event_id.len() > MAX_EVENT_ID_LEN {
        return invalid("event_id is required");
    }
    if input.venue_slug.is_empty() || input.venue_slug.len() > MAX_SLUG_LEN {
        return invalid("invalid venue");
    }
    if input
        .customer_ref
        .as_ref()
        .is_some_and(|c| c.len() > MAX_CUSTOMER_REF_LEN)
    {
        return invalid("customer_ref too long");
    }
    if input
        .metadata
        .as_ref()
        .is_some_and(|m| m.len() > MAX_EVENT_METADATA_LEN)
    {
        return invalid("metadata too long");
    }
    if input
        .device_id
        .as_ref()
        .is_some_and(|d| d.len() > MAX_DEVICE_ID_LEN)
    {
        return invalid("device_id too long");
    }
    Ok(())
}
