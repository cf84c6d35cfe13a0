//! Fit model definitions: Gaussian peaks, the erf step and straight lines.
//!
//! Each model is a pure function of `x` and a parameter slice, with an
//! analytic gradient for the nonlinear solver.

pub mod model;

pub use model::*;
