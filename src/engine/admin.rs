use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{BookingError, Engine};

/// Venue administration as seen by the booking path: every change goes to
/// the store and then drops whatever cached availability it can affect.
impl Engine {
    pub async fn add_block(&self, block: Block) -> Result<(), BookingError> {
        let (venue_id, date) = (block.venue_id, block.date);
        self.store.add_block(block).await?;
        self.cache.invalidate(venue_id, date);
        info!(%venue_id, %date, "block added");
        Ok(())
    }

    pub async fn remove_block(&self, venue_id: Ulid, block_id: Ulid) -> Result<(), BookingError> {
        let date = self.store.remove_block(venue_id, block_id).await?;
        self.cache.invalidate(venue_id, date);
        info!(%venue_id, %date, "block removed");
        Ok(())
    }

    pub async fn upsert_resource(&self, resource: Resource) -> Result<(), BookingError> {
        let venue_id = resource.venue_id;
        self.store.upsert_resource(resource).await?;
        self.cache.invalidate_venue(venue_id);
        Ok(())
    }

    pub async fn upsert_group(&self, group: ResourceGroup) -> Result<(), BookingError> {
        let venue_id = group.venue_id;
        self.store.upsert_group(group).await?;
        self.cache.invalidate_venue(venue_id);
        Ok(())
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), BookingError> {
        let venue_id = service.venue_id;
        self.store.upsert_service(service).await?;
        self.cache.invalidate_venue(venue_id);
        Ok(())
    }

    pub async fn upsert_window(
        &self,
        venue_id: Ulid,
        window: BookingWindow,
    ) -> Result<(), BookingError> {
        self.store.upsert_window(venue_id, window).await?;
        self.cache.invalidate_venue(venue_id);
        Ok(())
    }
}
