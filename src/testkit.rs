//! Fixtures shared by the unit tests.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, Weekday};
use ulid::Ulid;

use crate::model::*;
use crate::store::Store;

pub fn temp_journal(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablehold_test");
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{name}-{}.wal", Ulid::new()))
}

pub fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// A Tuesday.
pub fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

pub struct Fixture {
    pub venue: Venue,
    pub service: Service,
    pub window: BookingWindow,
    pub tables: Vec<Resource>,
}

impl Fixture {
    pub fn table(&self, capacity: u32) -> &Resource {
        self.tables.iter().find(|r| r.capacity == capacity).unwrap()
    }
}

/// Approved venue "bistro" with one dinner service open Tuesdays 18:00–21:30,
/// 90 minutes for up to 4 guests, 120 minutes above, and one table per capacity.
pub async fn seed_venue(store: &Store, capacities: &[u32]) -> Fixture {
    seed_named(store, "bistro", capacities).await
}

pub async fn seed_named(store: &Store, slug: &str, capacities: &[u32]) -> Fixture {
    let venue = Venue {
        id: Ulid::new(),
        slug: slug.into(),
        name: "Bistro".into(),
        approved: true,
    };
    store.upsert_venue(venue.clone()).await.unwrap();

    let service = Service {
        id: Ulid::new(),
        venue_id: venue.id,
        name: "Dinner".into(),
        duration_rules: vec![
            DurationRule {
                min_guests: 1,
                max_guests: 4,
                duration_minutes: 90,
            },
            DurationRule {
                min_guests: 5,
                max_guests: 50,
                duration_minutes: 120,
            },
        ],
    };
    store.upsert_service(service.clone()).await.unwrap();

    let window = BookingWindow {
        id: Ulid::new(),
        service_id: service.id,
        days_of_week: vec![Weekday::Tue],
        start: t(18, 0),
        end: t(21, 30),
        max_per_slot: None,
        date_range: None,
        blackout_periods: vec![],
    };
    store.upsert_window(venue.id, window.clone()).await.unwrap();

    let mut tables = Vec::new();
    for (i, capacity) in capacities.iter().enumerate() {
        let table = Resource {
            id: Ulid::new(),
            venue_id: venue.id,
            name: Some(format!("T{}", i + 1)),
            capacity: *capacity,
            bookable: true,
        };
        store.upsert_resource(table.clone()).await.unwrap();
        tables.push(table);
    }

    Fixture {
        venue,
        service,
        window,
        tables,
    }
}

pub fn guest() -> Guest {
    Guest {
        name: "Ada Lovelace".into(),
        email: "ada@example.com".into(),
        phone: Some("+44 20 7946 0000".into()),
        notes: None,
    }
}

/// A confirmed reservation on a single table, not yet inserted.
pub fn reservation_on(fx: &Fixture, resource_id: Ulid, date: NaiveDate, span: Span) -> Reservation {
    let id = Ulid::new();
    Reservation {
        id,
        reference: id.to_string()[18..].to_string(),
        venue_id: fx.venue.id,
        service_id: fx.service.id,
        assignment: Assignment::Resource { resource_id },
        date,
        span,
        party_size: 2,
        status: ReservationStatus::Confirmed,
        guest: guest(),
        customer_ref: None,
        created_at: 0,
    }
}
