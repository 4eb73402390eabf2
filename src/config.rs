//! Process configuration and the venue seed file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::engine::{BookingError, Engine, EngineSettings};
use crate::model::*;
use crate::reconcile::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: cannot parse {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("seed file {}: {source}", path.display())]
    SeedIo {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("seed file {}: {source}", path.display())]
    SeedParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("seeding failed: {0}")]
    Seed(#[from] BookingError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub seed: Option<PathBuf>,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub lock_ttl: Duration,
    pub reaper_interval: Duration,
    pub queue_interval: Duration,
    pub queue_batch: usize,
    pub cache_enabled: bool,
    pub lock_rate_per_min: u32,
    pub commit_rate_per_min: u32,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            data_dir: PathBuf::from("./data"),
            seed: None,
            max_connections: 256,
            compact_threshold: 1000,
            lock_ttl: Duration::from_secs(300),
            reaper_interval: Duration::from_secs(15),
            queue_interval: Duration::from_secs(5),
            queue_batch: 25,
            cache_enabled: true,
            lock_rate_per_min: 30,
            commit_rate_per_min: 10,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset variables keep their defaults;
    /// set but unparsable ones are an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let secs = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            Ok(parsed(&lookup, name)?.map_or(default, Duration::from_secs))
        };
        Ok(Self {
            bind: lookup("TABLEHOLD_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "TABLEHOLD_PORT")?.unwrap_or(d.port),
            data_dir: lookup("TABLEHOLD_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            seed: lookup("TABLEHOLD_SEED")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            max_connections: parsed(&lookup, "TABLEHOLD_MAX_CONNECTIONS")?
                .unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "TABLEHOLD_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            lock_ttl: secs("TABLEHOLD_LOCK_TTL_SECS", d.lock_ttl)?,
            reaper_interval: secs("TABLEHOLD_REAPER_INTERVAL_SECS", d.reaper_interval)?,
            queue_interval: secs("TABLEHOLD_QUEUE_INTERVAL_SECS", d.queue_interval)?,
            queue_batch: parsed(&lookup, "TABLEHOLD_QUEUE_BATCH")?.unwrap_or(d.queue_batch),
            cache_enabled: parsed(&lookup, "TABLEHOLD_CACHE")?.unwrap_or(d.cache_enabled),
            lock_rate_per_min: parsed(&lookup, "TABLEHOLD_LOCK_RATE_PER_MIN")?
                .unwrap_or(d.lock_rate_per_min),
            commit_rate_per_min: parsed(&lookup, "TABLEHOLD_COMMIT_RATE_PER_MIN")?
                .unwrap_or(d.commit_rate_per_min),
            metrics_port: parsed(&lookup, "TABLEHOLD_METRICS_PORT")?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("tablehold.wal")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            lock_ttl_ms: self.lock_ttl.as_millis() as Ms,
            cache_enabled: self.cache_enabled,
            lock_rate_per_min: self.lock_rate_per_min,
            commit_rate_per_min: self.commit_rate_per_min,
            ..EngineSettings::default()
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            batch_size: self.queue_batch,
            ..RetryPolicy::default()
        }
    }
}

fn parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}

// ── Seed file ───────────────────────────────────────────────────

/// Venue configuration loaded at startup, standing in for the venue
/// administration system. Applying it twice is harmless.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Seed {
    pub venues: Vec<Venue>,
    pub services: Vec<Service>,
    pub resources: Vec<Resource>,
    pub groups: Vec<ResourceGroup>,
    pub windows: Vec<SeedWindow>,
    pub blocks: Vec<Block>,
    pub devices: Vec<DeviceMapping>,
}

#[derive(Debug, Deserialize)]
pub struct SeedWindow {
    pub venue_id: Ulid,
    #[serde(flatten)]
    pub window: BookingWindow,
}

#[derive(Debug, Deserialize)]
pub struct DeviceMapping {
    pub venue_id: Ulid,
    pub device_id: String,
    pub resource_id: Ulid,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::SeedIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::SeedParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Upsert everything in dependency order.
    pub async fn apply(self, engine: &Engine) -> Result<(), ConfigError> {
        let store = engine.store();
        let venues = self.venues.len();
        for venue in self.venues {
            let venue_id = venue.id;
            store.upsert_venue(venue).await.map_err(BookingError::from)?;
            engine.cache().invalidate_venue(venue_id);
        }
        for service in self.services {
            engine.upsert_service(service).await?;
        }
        for resource in self.resources {
            engine.upsert_resource(resource).await?;
        }
        for group in self.groups {
            engine.upsert_group(group).await?;
        }
        for SeedWindow { venue_id, window } in self.windows {
            engine.upsert_window(venue_id, window).await?;
        }
        for block in self.blocks {
            if !block_exists(engine, &block).await {
                engine.add_block(block).await?;
            }
        }
        for d in self.devices {
            store
                .map_device(d.venue_id, d.device_id, d.resource_id)
                .await
                .map_err(BookingError::from)?;
        }
        info!(venues, "seed applied");
        Ok(())
    }
}

async fn block_exists(engine: &Engine, block: &Block) -> bool {
    match engine.store().venue(&block.venue_id) {
        Some(shared) => shared
            .read()
            .await
            .blocks_on(block.date)
            .iter()
            .any(|b| b.id == block.id),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::clock::Clock;
    use crate::store::Store;
    use crate::testkit::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.addr(), "0.0.0.0:7433");
        assert_eq!(cfg.lock_ttl, Duration::from_secs(300));
        assert!(cfg.cache_enabled);
        assert!(cfg.seed.is_none());
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.engine_settings().lock_ttl_ms, 300_000);
    }

    #[test]
    fn overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("TABLEHOLD_PORT", "9000"),
            ("TABLEHOLD_CACHE", "false"),
            ("TABLEHOLD_LOCK_TTL_SECS", "60"),
            ("TABLEHOLD_QUEUE_BATCH", "5"),
            ("TABLEHOLD_METRICS_PORT", "9100"),
            ("TABLEHOLD_DATA_DIR", "/var/lib/tablehold"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9000);
        assert!(!cfg.cache_enabled);
        assert_eq!(cfg.engine_settings().lock_ttl_ms, 60_000);
        assert_eq!(cfg.retry_policy().batch_size, 5);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(
            cfg.journal_path(),
            PathBuf::from("/var/lib/tablehold/tablehold.wal")
        );
    }

    #[test]
    fn rejects_garbage() {
        let err = Config::from_lookup(lookup(&[("TABLEHOLD_PORT", "seventy")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "TABLEHOLD_PORT",
                ..
            }
        ));
    }

    const SEED: &str = r#"{
        "venues": [
            {"id": "01JAAAAAAAAAAAAAAAAAAAAAAA", "slug": "harbour", "name": "Harbour", "approved": true}
        ],
        "services": [
            {"id": "01JBBBBBBBBBBBBBBBBBBBBBBB", "venue_id": "01JAAAAAAAAAAAAAAAAAAAAAAA",
             "name": "Lunch", "duration_rules": [{"min_guests": 1, "max_guests": 8, "duration_minutes": 60}]}
        ],
        "resources": [
            {"id": "01JCCCCCCCCCCCCCCCCCCCCCCC", "venue_id": "01JAAAAAAAAAAAAAAAAAAAAAAA",
             "name": "Window", "capacity": 4, "bookable": true}
        ],
        "windows": [
            {"venue_id": "01JAAAAAAAAAAAAAAAAAAAAAAA", "id": "01JDDDDDDDDDDDDDDDDDDDDDDD",
             "service_id": "01JBBBBBBBBBBBBBBBBBBBBBBB", "days_of_week": ["Tue"],
             "start": "12:00:00", "end": "14:00:00", "max_per_slot": null,
             "date_range": null, "blackout_periods": []}
        ],
        "blocks": [
            {"id": "01JEEEEEEEEEEEEEEEEEEEEEEE", "venue_id": "01JAAAAAAAAAAAAAAAAAAAAAAA",
             "date": "2026-10-20", "span": {"start": 720, "end": 780}, "resource_ids": null}
        ],
        "devices": [
            {"venue_id": "01JAAAAAAAAAAAAAAAAAAAAAAA", "device_id": "till-1",
             "resource_id": "01JCCCCCCCCCCCCCCCCCCCCCCC"}
        ]
    }"#;

    #[tokio::test]
    async fn seed_applies_and_reapplies() {
        let dir = std::env::temp_dir().join("tablehold_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("seed-{}.json", Ulid::new()));
        std::fs::write(&path, SEED).unwrap();

        let store = Arc::new(Store::open(&temp_journal("seed")).unwrap());
        let engine = Engine::new(store.clone(), Clock::manual(0), EngineSettings::default());
        Seed::load(&path).unwrap().apply(&engine).await.unwrap();
        Seed::load(&path).unwrap().apply(&engine).await.unwrap();

        let venue_id = store.venue_id_by_slug("harbour").unwrap();
        let shared = store.venue(&venue_id).unwrap();
        let guard = shared.read().await;
        assert_eq!(guard.services.len(), 1);
        assert_eq!(guard.resources.len(), 1);
        assert_eq!(guard.windows.len(), 1);
        assert_eq!(guard.blocks_on(tuesday()).len(), 1);
        assert_eq!(guard.devices.len(), 1);
    }

    #[tokio::test]
    async fn seed_with_zero_length_seating_rejected() {
        let dir = std::env::temp_dir().join("tablehold_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("seed-{}.json", Ulid::new()));
        std::fs::write(&path, SEED.replace("\"duration_minutes\": 60", "\"duration_minutes\": 0"))
            .unwrap();

        let store = Arc::new(Store::open(&temp_journal("seed_zero")).unwrap());
        let engine = Engine::new(store, Clock::manual(0), EngineSettings::default());
        let err = Seed::load(&path).unwrap().apply(&engine).await.unwrap_err();
        match err {
            ConfigError::Seed(e) => assert_eq!(e.code(), "invalid_input"),
            other => panic!("expected a seed error, got {other}"),
        }
    }

    #[test]
    fn seed_errors_name_the_file() {
        let missing = PathBuf::from("/nonexistent/seed.json");
        let err = Seed::load(&missing).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/seed.json"));
    }
}
