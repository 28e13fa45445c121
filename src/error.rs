//! This module defines the custom error types for the library.
//!
//! Every failure that can occur inside the extended Krylov solver is collected into
//! a single enum, [`SylvesterErrorKind`], wrapped by the opaque [`SylvesterError`].
//!
//! Using the [`thiserror`] crate keeps the `Display` implementations declarative. Errors
//! coming from [`faer`]'s SVD and sparse LU modules are captured by their `Debug`
//! rendering, since those types do not implement [`std::error::Error`]. CUDA driver and
//! cuBLAS failures are captured the same way in [`SylvesterErrorKind::Device`].
//!
//! Non-convergence is deliberately *not* an error: the solver returns normally and
//! reports it through [`crate::solvers::ConvergenceStatus`].
use thiserror::Error;

/// Represents all possible errors that can occur while solving a low-rank Sylvester equation.
#[derive(Error, Debug)]
#[error(transparent)]
pub struct SylvesterError(#[from] SylvesterErrorKind);

impl SylvesterError {
    /// Returns the underlying error kind, for callers that need to branch on it.
    pub fn kind(&self) -> &SylvesterErrorKind {
        &self.0
    }
}

/// The distinct kinds of errors.
#[derive(Error, Debug, PartialEq)]
pub enum SylvesterErrorKind {
    /// Two objects that must share a dimension do not.
    #[error("Dimension mismatch in {context}: expected {expected}, found {found}.")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },

    /// The LU prefactorization of a coefficient operator produced a singular factor.
    #[error("Operator {operator} is singular and cannot be prefactorized.")]
    SingularOperator { operator: &'static str },

    /// The sparse LU routine rejected the operator.
    #[error("Failed to factorize operator {operator}: {reason}")]
    FactorizationFailed {
        operator: &'static str,
        reason: String,
    },

    /// The projected Sylvester equation has a (numerically) vanishing eigenvalue sum
    /// `λ_i(A1) + λ_j(A2)` and therefore no unique solution.
    #[error("The reduced Sylvester equation is singular (block at row {row}, column {col}).")]
    SingularSylvester { row: usize, col: usize },

    /// The Francis QR iteration for the real Schur form did not converge.
    #[error("Real Schur decomposition did not converge at row {row} after {sweeps} sweeps.")]
    SchurNoConvergence { row: usize, sweeps: usize },

    /// Wraps an error originating from [`faer`]'s singular value decomposition.
    #[error("A numerical error occurred during the singular value decomposition: {0}")]
    SvdError(String),

    /// A configuration value is outside its admissible range.
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),

    /// The requested backend was not compiled into this build.
    #[error("Backend {backend} is not available: the crate was built without the `cuda` feature.")]
    BackendUnavailable { backend: &'static str },

    /// A CUDA driver or cuBLAS call failed.
    #[error("Device error: {0}")]
    Device(String),

    /// A resident matrix was handed to a backend that does not own its memory.
    #[error("Matrix resides in {found} memory, expected {expected}.")]
    ResidencyMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_mismatch_message() {
        let error = SylvesterError(SylvesterErrorKind::DimensionMismatch {
            context: "operator A1 vs. basis U",
            expected: 64,
            found: 63,
        });
        assert_eq!(
            error.to_string(),
            "Dimension mismatch in operator A1 vs. basis U: expected 64, found 63."
        );
    }

    #[test]
    fn test_singular_operator_message() {
        let error = SylvesterError::from(SylvesterErrorKind::SingularOperator { operator: "A2" });
        assert_eq!(
            error.to_string(),
            "Operator A2 is singular and cannot be prefactorized."
        );
        assert_eq!(
            error.kind(),
            &SylvesterErrorKind::SingularOperator { operator: "A2" }
        );
    }

    #[test]
    fn test_schur_message() {
        let error = SylvesterError(SylvesterErrorKind::SchurNoConvergence {
            row: 7,
            sweeps: 100,
        });
        assert_eq!(
            error.to_string(),
            "Real Schur decomposition did not converge at row 7 after 100 sweeps."
        );
    }

    #[test]
    fn test_backend_unavailable_message() {
        let error = SylvesterError(SylvesterErrorKind::BackendUnavailable {
            backend: "accelerator",
        });
        assert_eq!(
            error.to_string(),
            "Backend accelerator is not available: the crate was built without the `cuda` feature."
        );
    }

    #[test]
    fn test_invalid_config_message() {
        let error = SylvesterError(SylvesterErrorKind::InvalidConfig(
            "`max_rank` must be at least 1".to_string(),
        ));
        assert_eq!(
            error.to_string(),
            "Invalid solver configuration: `max_rank` must be at least 1"
        );
    }
}
