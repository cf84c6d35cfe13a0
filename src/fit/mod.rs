//! Model fitting orchestration.
//!
//! Responsibilities:
//!
//! - fit one model kind (closed form or Levenberg–Marquardt)
//! - derive starting points from the data
//! - evaluate a double-Gaussian seed grid (parallel)
//! - select single vs double Gaussian by BIC

pub mod fitter;
pub mod guess;
pub mod seed_grid;
pub mod selection;

pub use fitter::*;
pub use seed_grid::*;
pub use selection::*;
