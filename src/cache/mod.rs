//! In-process query cache.
//!
//! This module provides the logical, page-level cache that:
//! - Stores opaque query results under composite [`QueryKey`]s
//! - Tracks fetch status and last successful update per entry
//! - Keeps invalidated data readable until fresh data replaces it
//! - Decides staleness, eviction and poll cadence per resource category
//! - Serves stale data when the network is unavailable

mod key;
mod layer;
mod result;
mod store;
mod strategy;

pub use key::{QueryKey, Resource};
pub use layer::QueryClient;
pub use store::{CacheStore, QueryStatus};
pub use strategy::{StrategyOverride, StrategyTable};
