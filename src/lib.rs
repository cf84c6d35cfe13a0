//! `tpx-calib` library crate.
//!
//! The binary (`tpxcal`) is a thin wrapper around this library so that:
//!
//! - extraction, fitting and the derived calculations are testable without
//!   spawning processes
//! - every analysis shares one extract -> fit -> derive -> report pipeline

pub mod app;
pub mod calc;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod plot;
pub mod report;
