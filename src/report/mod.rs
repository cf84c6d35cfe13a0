//! Reporting: formatted terminal output.
//!
//! Formatting lives in one place so the fitting and calculation code stays
//! free of presentation, and output changes are localized.

pub mod format;

pub use format::*;
