//! Application-level error type.
//!
//! Library modules return typed errors (`FitError`, `CalcError`); they are
//! folded into `AppError` at the pipeline boundary, where each carries the
//! process exit code used by `main`:
//!
//! - `2`: unreadable input / invalid configuration
//! - `3`: nothing usable extracted from the input
//! - `4`: numeric failure affecting the whole run

use crate::calc::CalcError;
use crate::fit::FitError;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

impl From<FitError> for AppError {
    fn from(err: FitError) -> Self {
        AppError::new(4, format!("Fit failed: {err}"))
    }
}

impl From<CalcError> for AppError {
    fn from(err: CalcError) -> Self {
        AppError::new(4, format!("Calculation failed: {err}"))
    }
}
