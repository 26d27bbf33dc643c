pub mod dataset;
pub mod filter;
pub mod schema;

pub use dataset::{CleaningRules, TripDataset, TripRecord, TripSource};
pub use filter::{FilterPipeline, TripFilter, ZoneSelector};
