//! Arrival-interval (AAM) and travel-time (ATM) matrices between taxi zones,
//! one pair per weekday class and pickup hour, built from monthly trip files.
//!
//! Each (file, slice) task yields additive per-pair statistics; slices are
//! reduced by summing those statistics and dividing once at the end.

pub mod aggregation;
pub mod config;
pub mod corpus;
pub mod error;
pub mod runtime;
pub mod table;
pub mod tasklog;
pub mod trips;
pub mod zones;
