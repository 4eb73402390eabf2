use std::collections::HashMap;

use crate::model::*;

/// Reconciliation tables: received events, the active queue, manual reviews.
#[derive(Debug, Default)]
pub struct QueueState {
    pub events: HashMap<String, InboundEvent>,
    pub items: HashMap<String, QueueItem>,
    pub reviews: Vec<ManualReview>,
}

impl QueueState {
    /// Items due at `now`, oldest first.
    pub fn due(&self, now: Ms, limit: usize) -> Vec<QueueItem> {
        let mut due: Vec<QueueItem> = self
            .items
            .values()
            .filter(|item| item.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            (a.next_attempt_at, a.enqueued_at, &a.event_id).cmp(&(
                b.next_attempt_at,
                b.enqueued_at,
                &b.event_id,
            ))
        });
        due.truncate(limit);
        due
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::PosEventReceived(item, pos) => {
                self.events.insert(
                    pos.event_id.clone(),
                    InboundEvent {
                        event: pos.clone(),
                        status: EventStatus::Queued,
                        outcome: None,
                    },
                );
                self.items.insert(item.event_id.clone(), item.clone());
            }
            Event::QueueItemScheduled(item) => {
                self.items.insert(item.event_id.clone(), item.clone());
            }
            Event::PosEventResolved { event_id, outcome } => {
                self.items.remove(event_id);
                if let Some(inbound) = self.events.get_mut(event_id) {
                    inbound.status = EventStatus::Processed;
                    inbound.outcome = Some(outcome.clone());
                }
            }
            Event::PosEventEscalated(review) => {
                self.items.remove(&review.event_id);
                if let Some(inbound) = self.events.get_mut(&review.event_id) {
                    inbound.status = EventStatus::Failed;
                }
                self.reviews.push(review.clone());
            }
            _ => {}
        }
    }

    pub fn snapshot(&self, out: &mut Vec<Event>) {
        for inbound in self.events.values() {
            let id = &inbound.event.event_id;
            let item = self.items.get(id).cloned().unwrap_or_else(|| QueueItem {
                event_id: id.clone(),
                attempts: 0,
                next_attempt_at: inbound.event.received_at,
                last_error: None,
                enqueued_at: inbound.event.received_at,
            });
            out.push(Event::PosEventReceived(item, inbound.event.clone()));
            match (&inbound.status, &inbound.outcome) {
                (EventStatus::Processed, Some(outcome)) => out.push(Event::PosEventResolved {
                    event_id: id.clone(),
                    outcome: outcome.clone(),
                }),
                (EventStatus::Failed, _) => {
                    if let Some(review) = self.reviews.iter().find(|r| &r.event_id == id) {
                        out.push(Event::PosEventEscalated(review.clone()));
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn pos(id: &str, at: Ms) -> PosEvent {
        PosEvent {
            event_id: id.into(),
            venue_id: Ulid::new(),
            customer_ref: None,
            metadata: None,
            device_id: None,
            payload: "{}".into(),
            received_at: at,
        }
    }

    fn item(id: &str, next: Ms, enqueued: Ms) -> QueueItem {
        QueueItem {
            event_id: id.into(),
            attempts: 0,
            next_attempt_at: next,
            last_error: None,
            enqueued_at: enqueued,
        }
    }

    #[test]
    fn due_is_oldest_first_and_bounded() {
        let mut q = QueueState::default();
        q.apply(&Event::PosEventReceived(item("late", 300, 3), pos("late", 3)));
        q.apply(&Event::PosEventReceived(item("early", 100, 1), pos("early", 1)));
        q.apply(&Event::PosEventReceived(item("mid", 200, 2), pos("mid", 2)));
        q.apply(&Event::PosEventReceived(item("future", 9_000, 0), pos("future", 0)));

        let due: Vec<_> = q.due(1_000, 2).into_iter().map(|i| i.event_id).collect();
        assert_eq!(due, vec!["early", "mid"]);
    }

    #[test]
    fn resolve_removes_item() {
        let mut q = QueueState::default();
        q.apply(&Event::PosEventReceived(item("e1", 0, 0), pos("e1", 0)));
        q.apply(&Event::PosEventResolved {
            event_id: "e1".into(),
            outcome: LinkOutcome::WalkInCreated {
                walk_in_id: Ulid::new(),
                resource_id: None,
            },
        });
        assert!(q.items.is_empty());
        assert_eq!(q.events["e1"].status, EventStatus::Processed);
    }

    #[test]
    fn snapshot_restores_resolved_and_escalated() {
        let mut q = QueueState::default();
        q.apply(&Event::PosEventReceived(item("ok", 0, 0), pos("ok", 0)));
        q.apply(&Event::PosEventReceived(item("bad", 0, 0), pos("bad", 0)));
        q.apply(&Event::PosEventReceived(item("open", 50, 0), pos("open", 0)));
        q.apply(&Event::PosEventResolved {
            event_id: "ok".into(),
            outcome: LinkOutcome::WalkInCreated {
                walk_in_id: Ulid::new(),
                resource_id: None,
            },
        });
        q.apply(&Event::PosEventEscalated(ManualReview {
            id: Ulid::new(),
            event_id: "bad".into(),
            attempts: 8,
            last_error: Some("boom".into()),
            snapshot: pos("bad", 0),
            created_at: 10,
        }));

        let mut events = Vec::new();
        q.snapshot(&mut events);
        let mut restored = QueueState::default();
        for e in &events {
            restored.apply(e);
        }
        assert_eq!(restored.events["ok"].status, EventStatus::Processed);
        assert_eq!(restored.events["bad"].status, EventStatus::Failed);
        assert_eq!(restored.reviews.len(), 1);
        assert_eq!(restored.items.len(), 1);
        assert_eq!(restored.items["open"].next_attempt_at, 50);
    }
}
