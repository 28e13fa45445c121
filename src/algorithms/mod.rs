//! Building blocks of the extended Krylov iteration.
//!
//! ** NOTE: We recommend using the high-level entry point
//! [`crate::solvers::solve_low_rank_sylvester`] instead. These modules are exposed for
//! callers who need to drive individual steps, e.g. for benchmarking.
//!
//! - [`krylov`]: forward/inverse block generation and re-orthonormalization of a basis.
//! - [`reduced`]: Galerkin projection and the Bartels–Stewart solve of the small equation.
//! - [`schur`]: real Schur decomposition used by the reduced solve.
//! - [`residual`]: the projected residual estimate driving the stopping test.
//! - [`truncation`]: SVD-based rank truncation of the reduced core.

pub mod krylov;
pub mod reduced;
pub mod residual;
pub mod schur;
pub mod truncation;
