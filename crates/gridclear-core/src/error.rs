//! Unified error types for the gridclear workspace
//!
//! [`GridError`] is the common error representation at API boundaries.
//! Domain-specific errors (matrix assembly, sensitivity computation, market
//! clearing) convert into it so callers can use `?` across crates.
//!
//! # Example
//!
//! ```ignore
//! use gridclear_core::{GridError, GridResult};
//!
//! fn clear(path: &str) -> GridResult<()> {
//!     let data = load_market(path)?;
//!     run_clearing(&data)?;
//!     Ok(())
//! }
//! ```

use crate::diagnostics::Diagnostics;
use thiserror::Error;

/// Unified error type for all gridclear operations.
#[derive(Error, Debug)]
pub enum GridError {
    /// I/O errors (file access etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Structural defects in the transmission topology. The full report is attached.
    #[error("Topology error: {}", .0.summary())]
    Topology(Diagnostics),

    /// Singular or ill-conditioned matrices
    #[error("Numerical error: {0}")]
    Numerical(String),

    /// Solver errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using GridError.
pub type GridResult<T> = Result<T, GridError>;

impl From<anyhow::Error> for GridError {
    fn from(err: anyhow::Error) -> Self {
        GridError::Other(err.to_string())
    }
}

impl From<String> for GridError {
    fn from(s: String) -> Self {
        GridError::Other(s)
    }
}

impl From<&str> for GridError {
    fn from(s: &str) -> Self {
        GridError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for GridError {
    fn from(err: serde_json::Error) -> Self {
        GridError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GridError::Numerical("reduced susceptance matrix is singular".into());
        assert!(err.to_string().contains("Numerical error"));
        assert!(err.to_string().contains("singular"));
    }

    #[test]
    fn test_topology_error_carries_report() {
        let mut diag = Diagnostics::new();
        diag.add_error("isolated", "Node n4 is not connected to any line");
        diag.add_warning("dc-only", "Node n3 is only reachable via DC lines");
        let err = GridError::Topology(diag);
        assert!(err.to_string().contains("1 warning, 1 error"));
        match err {
            GridError::Topology(report) => assert_eq!(report.issues.len(), 2),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GridError = io_err.into();
        assert!(matches!(err, GridError::Io(_)));
    }

    #[test]
    fn test_question_mark_operator() {
        fn inner() -> GridResult<()> {
            Err(GridError::Config("split must be positive".into()))
        }

        fn outer() -> GridResult<()> {
            inner()?;
            Ok(())
        }

        assert!(outer().is_err());
    }
}
