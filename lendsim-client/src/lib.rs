//! Builds [`SimulationSnapshot`](lendsim_common::models::snapshot::SimulationSnapshot)s of
//! lending protocol state for a single user action.

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

pub mod cache;
pub mod config;
pub mod snapshot;

pub use cache::{CachedStateProvider, RequestCache};
pub use config::{ClientConfig, ConfigError};
pub use snapshot::{build_simulation_snapshot, SnapshotBuilder, SnapshotError};
