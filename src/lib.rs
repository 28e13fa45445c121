//! Extended Krylov subspace solver for large Sylvester equations with low-rank data.
//!
//! This crate approximates the solution `X` of
//!
//! `A1 X + X A2^T + U_old S_old V_old^T = 0`
//!
//! where `A1` (`nx × nx`) and `A2` (`ny × ny`) are large, typically sparse, nonsingular
//! operators and the right-hand side is given in factored form. The solution is returned
//! as a truncated factorization `U_new S_new V_new^T` of bounded rank, so neither the
//! right-hand side nor the solution is ever formed densely. The typical use is implicit
//! time stepping of matrix-valued ODEs such as the 2D heat equation, where the state of
//! one time level is the right-hand side of the next (see [`problems`]).
//!
//! Built on the [`faer`] linear algebra framework, operators may be dense or sparse
//! ([`operator::Operator`]); they are prefactorized once ([`PreparedOperator`]) so that
//! inverse applications reuse the same LU factors in every iteration.
//!
//! ## Algorithm
//!
//! Each iteration of [`solve_low_rank_sylvester`]:
//! - enlarges the bases `U` and `V` by one forward block (`A · previous`) and one inverse
//!   block (`A \ previous`) and re-orthonormalizes them with a thin QR;
//! - projects the equation onto the bases and solves the small dense equation with the
//!   Bartels–Stewart method;
//! - estimates the residual of the projected solution from two small QR factors.
//!
//! Once the estimate falls below `S_old[0, 0] · rel_eps`, or the iteration budget is spent,
//! the reduced solution is truncated by an SVD.
//!
//! Heavy kernels run on a [`backend::ComputeBackend`] chosen by [`BackendKind`]: the
//! sequential or multi-threaded host backends, or, with the `cuda` feature, cuBLAS on a
//! CUDA device.
//!
//! ## Example Usage
//!
//! With `A1 = A2 = -I` the exact solution is `X = U S V^T / 2`, and the first extended
//! Krylov round already spans it.
//!
//! ```rust
//! use faer::Mat;
//! use lowrank_sylvester::{
//!     ConvergenceStatus, KrylovWorkspace, LowRankState, PreparedOperator, SolverConfig,
//!     solve_low_rank_sylvester,
//! };
//!
//! let n = 6;
//! let minus_identity = Mat::<f64>::from_fn(n, n, |i, j| if i == j { -1.0 } else { 0.0 });
//! let a1 = PreparedOperator::new("A1", minus_identity.clone()).unwrap();
//! let a2 = PreparedOperator::new("A2", minus_identity).unwrap();
//!
//! // Rank-one right-hand side with unit-norm factors.
//! let u = Mat::<f64>::from_fn(n, 1, |i, _| if i == 0 { 1.0 } else { 0.0 });
//! let v = Mat::<f64>::from_fn(n, 1, |i, _| if i == n - 1 { 1.0 } else { 0.0 });
//! let previous = LowRankState::new(u, Mat::from_fn(1, 1, |_, _| 4.0), v).unwrap();
//!
//! let config = SolverConfig::default();
//! let mut workspace = KrylovWorkspace::new(n, n, 1, config.max_iter);
//! let solution =
//!     solve_low_rank_sylvester(&a1, &a2, &previous, &config, &mut workspace, None).unwrap();
//!
//! assert_eq!(solution.status, ConvergenceStatus::Converged);
//! assert_eq!(solution.state.rank(), 1);
//! assert!((solution.state.leading_value() - 2.0).abs() < 1e-12);
//! ```

pub mod algorithms;
pub mod backend;
pub mod error;
pub mod operator;
pub mod problems;
pub mod solvers;
pub mod state;
pub mod utils;
pub mod workspace;

// Re-export the main API for convenient access.
pub use backend::BackendKind;
pub use error::{SylvesterError, SylvesterErrorKind};
pub use operator::PreparedOperator;
pub use solvers::{
    ConvergenceStatus, ExtendedKrylovSolver, IterationReport, SolverConfig, SylvesterSolution,
    solve_low_rank_sylvester,
};
pub use state::LowRankState;
pub use workspace::KrylovWorkspace;
