//! Structured runtime invariant checks.
//!
//! `check` verifies a safety-critical condition. On failure it logs the
//! caller location and returns a structured error; it never panics in the
//! default build. The `strict-invariants` feature escalates failures to
//! panics for fail-stop deployments.

use std::panic::Location;

use thiserror::Error;
use tracing::error;

/// A failed invariant, carrying the caller's source location.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invariant violation at {file}:{line}: {message}")]
pub struct InvariantViolation {
    /// Description of the violated condition.
    pub message: String,
    /// Source file of the failed check.
    pub file: &'static str,
    /// Line of the failed check.
    pub line: u32,
}

/// Verifies `condition`, returning an [`InvariantViolation`] that names the
/// calling site when it does not hold.
///
/// # Errors
///
/// Returns [`InvariantViolation`] when `condition` is false.
///
/// # Panics
///
/// With the `strict-invariants` feature, panics instead of returning.
#[track_caller]
pub fn check(condition: bool, message: &str) -> Result<(), InvariantViolation> {
    if condition {
        return Ok(());
    }

    let location = Location::caller();
    let violation = InvariantViolation {
        message: message.to_string(),
        file: location.file(),
        line: location.line(),
    };

    error!(
        file = violation.file,
        line = violation.line,
        "invariant violation: {message}"
    );

    #[cfg(feature = "strict-invariants")]
    panic!("{violation}");

    #[cfg(not(feature = "strict-invariants"))]
    Err(violation)
}

#[cfg(all(test, not(feature = "strict-invariants")))]
mod tests {
    use super::*;

    #[test]
    fn passing_check_is_ok() {
        assert!(check(true, "always holds").is_ok());
    }

    #[test]
    fn failing_check_reports_caller() {
        let violation = check(false, "never holds").unwrap_err();
        assert_eq!(violation.message, "never holds");
        assert!(violation.file.ends_with("invariant.rs"));
        assert!(violation.line > 0);
    }
}
