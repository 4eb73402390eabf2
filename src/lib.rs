pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod observability;
pub mod reaper;
pub mod reconcile;
pub mod store;
pub mod wal;
pub mod wire;

#[cfg(test)]
mod testkit;
