//! Input/output helpers.
//!
//! - line-oriented record extraction (`extract`)
//! - threshold-scan dumps (`thl`)
//! - per-hit lists and histograms (`spectrum`)
//! - slope/intercept tables (`slope_table`)
//! - CSV exports (`export`) and fit-result JSON (`json`)

pub mod export;
pub mod extract;
pub mod json;
pub mod slope_table;
pub mod spectrum;
pub mod thl;

pub use export::*;
pub use extract::*;
pub use json::*;
pub use slope_table::*;
pub use spectrum::*;
pub use thl::*;
