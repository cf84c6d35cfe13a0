//! Numerical building blocks: least squares, special functions, smoothing.

pub mod lm;
pub mod ols;
pub mod smooth;
pub mod special;

pub use lm::*;
pub use ols::*;
pub use smooth::*;
pub use special::*;
