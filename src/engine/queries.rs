use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Minute;

use super::availability::day_slots;
use super::duration::resolve_duration;
use super::{
    AvailabilityQuery, BookingError, CacheKey, Engine, service_of, validate_party_size,
    validate_slug,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityRequest {
    pub venue_slug: String,
    pub service_id: Ulid,
    pub party_size: u32,
    pub query: AvailabilityQuery,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityReport {
    pub venue_id: Ulid,
    pub service_id: Ulid,
    pub party_size: u32,
    pub duration_minutes: Minute,
    /// Every requested date is present, possibly with no slots.
    pub slots: BTreeMap<NaiveDate, Vec<NaiveTime>>,
}

impl Engine {
    /// Bookable start times for the request, served from cache when possible.
    pub async fn check_availability(
        &self,
        req: &AvailabilityRequest,
    ) -> Result<AvailabilityReport, BookingError> {
        validate_slug(&req.venue_slug)?;
        validate_party_size(req.party_size)?;
        let dates = req.query.dates()?;
        let (venue_id, shared) = self.resolve_venue(&req.venue_slug)?;

        let guard = shared.read().await;
        let service = service_of(&guard, &req.service_id)?;
        let duration_minutes = resolve_duration(&service.duration_rules, req.party_size);

        let mut slots = BTreeMap::new();
        for date in dates {
            let key = CacheKey {
                venue_id,
                service_id: service.id,
                date,
                party_size: req.party_size,
            };
            // Read before computing; an invalidation in between makes the put a no-op.
            let generation = self.cache.generation(venue_id, date);
            let day = match self.cache.get(&key) {
                Some(cached) => cached,
                None => {
                    let computed = day_slots(
                        &guard,
                        service,
                        date,
                        req.party_size,
                        self.settings.slot_step_minutes,
                    );
                    self.cache
                        .put(key, generation, computed.clone(), self.clock.now());
                    computed
                }
            };
            slots.insert(date, day);
        }

        Ok(AvailabilityReport {
            venue_id,
            service_id: service.id,
            party_size: req.party_size,
            duration_minutes,
            slots,
        })
    }
}
