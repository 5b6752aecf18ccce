//! Crossharvest Crossref - posted-content harvesting from the Crossref works API
//!
//! Splits a date range into windows small enough to cursor-paginate, falls
//! back to DOI-first harvesting for single days that are still too dense,
//! and folds everything into one deduplicated record set.

pub mod api;
pub mod config;
pub mod fallback;
pub mod normalize;
pub mod paginator;
pub mod runner;
pub mod state;
pub mod stats;
pub mod window;

#[cfg(test)]
mod testing;

// Re-exports
pub use api::{CrossrefClient, Projection, SortKey, WorksApi, WorksPage, WorksQuery, probe_total};
pub use config::{HarvestArgs, HarvestConfig};
pub use fallback::{DenseHarvest, HydrateFailure, Hydrated};
pub use normalize::{NormalizedRecord, doi_key, merge, normalize};
pub use paginator::{PageCursor, PageError, PageLimits, Paginator};
pub use runner::{HarvestOutcome, Harvester};
pub use state::HarvestState;
pub use stats::{AbandonedWindow, HarvestSummary};
pub use window::{QueryWindow, SplitLeaf, SplitPlan, Splitter};
