//! Temporal presets and climatologies
//!
//! Everything here is expressed as requests to
//! [`AggregationEngine`](gridagg_core::engine::AggregationEngine); no reduction logic is
//! duplicated from the core.

pub mod climatology;
pub mod presets;
pub mod python;

pub use climatology::{Climatology, ReferencePeriod};
pub use presets::Preset;
