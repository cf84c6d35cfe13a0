//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - parsed observations (`Record`, `SeriesLine`, `ThresholdPoint`)
//! - explicit grouping (`GroupedRecords`)
//! - fit outputs (`FitResult`, `FitQuality`) and derived points

pub mod types;

pub use types::*;
