use chrono::{NaiveDate, NaiveTime};
use dashmap::DashMap;
use ulid::Ulid;

use crate::model::Ms;
use crate::observability::{CACHE_HITS_TOTAL, CACHE_INVALIDATIONS_TOTAL, CACHE_MISSES_TOTAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub venue_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub party_size: u32,
}

#[derive(Debug, Clone)]
struct CachedDay {
    slots: Vec<NaiveTime>,
    computed_at: Ms,
}

/// Computed slot lists per (venue, service, date, party size).
///
/// Entries never expire on their own; every write that can change a day's
/// availability calls `invalidate` for that (venue, date). A per-day generation
/// counter rejects a `put` whose computation started before an invalidation,
/// so a slow reader cannot park a stale list after the write that outdated it.
pub struct AvailabilityCache {
    enabled: bool,
    entries: DashMap<CacheKey, CachedDay>,
    generations: DashMap<(Ulid, NaiveDate), u64>,
    /// Bumped by `invalidate_venue`; part of every day's generation.
    epochs: DashMap<Ulid, u64>,
}

impl AvailabilityCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            entries: DashMap::new(),
            generations: DashMap::new(),
            epochs: DashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn generation(&self, venue_id: Ulid, date: NaiveDate) -> u64 {
        let epoch = self.epochs.get(&venue_id).map_or(0, |e| *e.value());
        let day = self
            .generations
            .get(&(venue_id, date))
            .map_or(0, |g| *g.value());
        epoch + day
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<NaiveTime>> {
        if !self.enabled {
            return None;
        }
        match self.entries.get(key) {
            Some(day) => {
                metrics::counter!(CACHE_HITS_TOTAL).increment(1);
                Some(day.slots.clone())
            }
            None => {
                metrics::counter!(CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Store `slots` if no invalidation happened since `generation` was read.
    pub fn put(&self, key: CacheKey, generation: u64, slots: Vec<NaiveTime>, now: Ms) -> bool {
        if !self.enabled {
            return false;
        }
        // Lock order everywhere: epochs, generations, entries. Holding both
        // counters blocks a concurrent invalidation until the insert is done.
        let epoch = self.epochs.entry(key.venue_id).or_insert(0);
        let day = self.generations.entry((key.venue_id, key.date)).or_insert(0);
        if *epoch + *day != generation {
            return false;
        }
        self.entries.insert(
            key,
            CachedDay {
                slots,
                computed_at: now,
            },
        );
        true
    }

    /// Drop every entry for (venue, date), across services and party sizes.
    pub fn invalidate(&self, venue_id: Ulid, date: NaiveDate) -> usize {
        let mut generation = self.generations.entry((venue_id, date)).or_insert(0);
        *generation += 1;
        let before = self.entries.len();
        self.entries
            .retain(|k, _| !(k.venue_id == venue_id && k.date == date));
        drop(generation);
        let removed = before.saturating_sub(self.entries.len());
        metrics::counter!(CACHE_INVALIDATIONS_TOTAL).increment(1);
        tracing::debug!(%venue_id, %date, removed, "availability cache invalidated");
        removed
    }

    /// Drop every entry for a venue. Used after configuration changes.
    pub fn invalidate_venue(&self, venue_id: Ulid) {
        let mut epoch = self.epochs.entry(venue_id).or_insert(0);
        *epoch += 1;
        self.entries.retain(|k, _| k.venue_id != venue_id);
        drop(epoch);
        metrics::counter!(CACHE_INVALIDATIONS_TOTAL).increment(1);
        tracing::debug!(%venue_id, "availability cache invalidated for venue");
    }

    /// Age of an entry, for diagnostics.
    pub fn computed_at(&self, key: &CacheKey) -> Option<Ms> {
        self.entries.get(key).map(|d| d.computed_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
