//! This module provides the high-level API for solving the low-rank Sylvester equation
//!
//! `A1 X + X A2^T + U_old S_old V_old^T = 0`
//!
//! with the extended Krylov subspace method. The solution is returned as a truncated
//! low-rank factorization `U_new S_new V_new^T`.
//!
//! Each iteration enlarges both bases by one forward and one inverse Krylov block,
//! projects the equation onto them, solves the small projected equation, and estimates
//! the residual of the projected solution. Iteration stops once the estimate drops below
//! `S_old[0, 0] · rel_eps`, after `max_iter` rounds, or when the per-iteration callback
//! asks for it. The reduced solution is then truncated to rank at most `max_rank`.

use serde::Serialize;

use crate::{
    algorithms::{
        krylov::{apply_to_basis, extend_basis},
        reduced::ReducedSystem,
        residual::estimate_residual,
        truncation::truncate,
    },
    backend::{BackendKind, ComputeBackend},
    error::{SylvesterError, SylvesterErrorKind},
    operator::PreparedOperator,
    state::LowRankState,
    workspace::KrylovWorkspace,
};

/// Parameters of a solve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SolverConfig {
    /// Relative tolerance, used both for the stopping test and for rank truncation.
    pub rel_eps: f64,
    /// Maximum number of extended Krylov rounds.
    pub max_iter: usize,
    /// Hard ceiling on the rank of the returned state.
    pub max_rank: usize,
    pub backend: BackendKind,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            rel_eps: 1e-3,
            max_iter: 10,
            max_rank: 32,
            backend: BackendKind::Cpu,
        }
    }
}

impl SolverConfig {
    pub fn with_rel_eps(mut self, rel_eps: f64) -> Self {
        self.rel_eps = rel_eps;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_max_rank(mut self, max_rank: usize) -> Self {
        self.max_rank = max_rank;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Checks that every parameter is in its admissible range.
    pub fn validate(&self) -> Result<(), SylvesterError> {
        if !(self.rel_eps.is_finite() && self.rel_eps > 0.0) {
            return Err(SylvesterErrorKind::InvalidConfig(format!(
                "`rel_eps` must be positive and finite, got {}",
                self.rel_eps
            ))
            .into());
        }
        if self.max_iter == 0 {
            return Err(
                SylvesterErrorKind::InvalidConfig("`max_iter` must be at least 1".into()).into(),
            );
        }
        if self.max_rank == 0 {
            return Err(
                SylvesterErrorKind::InvalidConfig("`max_rank` must be at least 1".into()).into(),
            );
        }
        Ok(())
    }
}

/// How the iteration ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// The residual estimate dropped below the threshold.
    Converged,
    /// `max_iter` rounds ran without reaching the threshold. The result is still the best
    /// available approximation.
    MaxIterationsReached,
    /// The per-iteration callback returned `false`.
    StoppedByCallback,
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConvergenceStatus::Converged => "converged",
            ConvergenceStatus::MaxIterationsReached => "max_iterations_reached",
            ConvergenceStatus::StoppedByCallback => "stopped_by_callback",
        };
        f.write_str(name)
    }
}

/// Snapshot handed to the per-iteration callback.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct IterationReport {
    /// 1-based round number.
    pub iteration: usize,
    pub residual_norm: f64,
    pub threshold: f64,
    /// Width of the left basis `U`.
    pub left_dim: usize,
    /// Width of the right basis `V`.
    pub right_dim: usize,
}

/// Per-iteration callback, invoked after every round including the converging one.
/// Returning `false` stops the iteration after the current round; the solution is still
/// truncated and returned. A round that meets the threshold is reported as
/// [`ConvergenceStatus::Converged`] whatever the callback returns.
pub type IterationCallback<'a> = dyn FnMut(&IterationReport) -> bool + 'a;

/// Result of a solve.
#[derive(Clone, Debug)]
pub struct SylvesterSolution {
    pub state: LowRankState,
    /// Number of extended Krylov rounds performed.
    pub iterations: usize,
    /// Residual estimate of the last round, before truncation.
    pub residual_norm: f64,
    /// `S_old[0, 0] · rel_eps`.
    pub threshold: f64,
    pub status: ConvergenceStatus,
}

impl SylvesterSolution {
    #[inline]
    pub fn converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }
}

/// Solves `A1 X + X A2^T + U_old S_old V_old^T = 0` for a low-rank `X`.
///
/// The backend named in `config` is instantiated for this call. The workspace is reused
/// as is when its capacity fits the problem and reallocated otherwise.
///
/// # Arguments
/// * `a1`, `a2`: The prefactorized coefficient operators (`nx × nx` and `ny × ny`).
/// * `previous`: The right-hand side factors, typically the state of the previous time
///   level.
/// * `config`: Tolerance, iteration and rank limits, and backend selection.
/// * `workspace`: Scratch buffers owned by this call for its duration.
/// * `callback`: Optional hook invoked after every round.
///
/// # Returns
/// A [`SylvesterSolution`]. Non-convergence is not an error; it is reported through
/// [`SylvesterSolution::status`].
pub fn solve_low_rank_sylvester(
    a1: &PreparedOperator,
    a2: &PreparedOperator,
    previous: &LowRankState,
    config: &SolverConfig,
    workspace: &mut KrylovWorkspace,
    callback: Option<&mut IterationCallback<'_>>,
) -> Result<SylvesterSolution, SylvesterError> {
    let backend = config.backend.instantiate()?;
    solve_with_backend(
        backend.as_ref(),
        a1,
        a2,
        previous,
        config,
        workspace,
        callback,
    )
}

fn solve_with_backend(
    backend: &dyn ComputeBackend,
    a1: &PreparedOperator,
    a2: &PreparedOperator,
    previous: &LowRankState,
    config: &SolverConfig,
    workspace: &mut KrylovWorkspace,
    mut callback: Option<&mut IterationCallback<'_>>,
) -> Result<SylvesterSolution, SylvesterError> {
    config.validate()?;
    let (nx, ny, rank) = (previous.nrows(), previous.ncols(), previous.rank());
    if a1.dim() != nx {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "operator A1 vs. rows of U_old",
            expected: nx,
            found: a1.dim(),
        }
        .into());
    }
    if a2.dim() != ny {
        return Err(SylvesterErrorKind::DimensionMismatch {
            context: "operator A2 vs. rows of V_old",
            expected: ny,
            found: a2.dim(),
        }
        .into());
    }

    // A zero right-hand side has the zero solution, operators being nonsingular.
    if rank == 0 {
        log::debug!("Right-hand side has rank 0; returning the zero state.");
        return Ok(SylvesterSolution {
            state: LowRankState::zero(nx, ny),
            iterations: 0,
            residual_norm: 0.0,
            threshold: 0.0,
            status: ConvergenceStatus::Converged,
        });
    }

    if !workspace.fits(nx, ny, rank, config.max_iter) {
        log::debug!(
            "Workspace does not fit a {}x{} grid with block {} and {} rounds; reallocating.",
            nx,
            ny,
            rank,
            config.max_iter
        );
        *workspace = KrylovWorkspace::new(nx, ny, rank, config.max_iter);
    }
    workspace.reset(previous);

    let threshold = previous.leading_value() * config.rel_eps;
    let mut residual_norm = f64::INFINITY;
    let mut iterations = 0;
    let mut status = ConvergenceStatus::MaxIterationsReached;

    for iteration in 1..=config.max_iter {
        extend_basis(backend, a1, &mut workspace.left)?;
        extend_basis(backend, a2, &mut workspace.right)?;
        apply_to_basis(backend, a1, &mut workspace.left)?;
        apply_to_basis(backend, a2, &mut workspace.right)?;

        let system = ReducedSystem::project(
            backend,
            workspace.left.basis(),
            workspace.left.applied(),
            workspace.right.basis(),
            workspace.right.applied(),
            previous,
        )?;
        let core = system.solve()?;
        workspace.store_core(core.as_ref());

        residual_norm = estimate_residual(
            backend,
            &mut workspace.left,
            &mut workspace.right,
            system.b1.as_ref(),
            core.as_ref(),
        )?;
        iterations = iteration;

        log::debug!(
            "Iteration {}: residual estimate {:.3e} (threshold {:.3e}, basis {}x{}).",
            iteration,
            residual_norm,
            threshold,
            workspace.left.ncols(),
            workspace.right.ncols()
        );

        // Convergence takes precedence over the callback's verdict.
        if residual_norm < threshold {
            status = ConvergenceStatus::Converged;
        }

        if let Some(ref mut cb) = callback {
            let report = IterationReport {
                iteration,
                residual_norm,
                threshold,
                left_dim: workspace.left.ncols(),
                right_dim: workspace.right.ncols(),
            };
            if !cb(&report) && status != ConvergenceStatus::Converged {
                status = ConvergenceStatus::StoppedByCallback;
            }
        }

        if status != ConvergenceStatus::MaxIterationsReached {
            break;
        }
    }

    if status == ConvergenceStatus::MaxIterationsReached {
        log::warn!(
            "Extended Krylov solver did not converge in {} iterations (residual {:.3e}, threshold {:.3e}).",
            config.max_iter,
            residual_norm,
            threshold
        );
    }

    let state = truncate(
        workspace.left.basis(),
        workspace.core(),
        workspace.right.basis(),
        config.rel_eps,
        config.max_rank,
        backend.par(),
    )?;

    Ok(SylvesterSolution {
        state,
        iterations,
        residual_norm,
        threshold,
        status,
    })
}

/// Owns a configuration, its backend and a reusable workspace, for time-stepping loops
/// that solve one equation per step.
pub struct ExtendedKrylovSolver {
    config: SolverConfig,
    backend: Box<dyn ComputeBackend>,
    workspace: Option<KrylovWorkspace>,
}

impl ExtendedKrylovSolver {
    pub fn new(config: SolverConfig) -> Result<Self, SylvesterError> {
        config.validate()?;
        Ok(Self {
            config,
            backend: config.backend.instantiate()?,
            workspace: None,
        })
    }

    #[inline]
    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    #[inline]
    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Advances one step: solves the equation whose right-hand side is `previous`.
    pub fn step(
        &mut self,
        a1: &PreparedOperator,
        a2: &PreparedOperator,
        previous: &LowRankState,
    ) -> Result<SylvesterSolution, SylvesterError> {
        self.step_with_callback(a1, a2, previous, None)
    }

    /// Like [`ExtendedKrylovSolver::step`], with a per-iteration callback.
    pub fn step_with_callback(
        &mut self,
        a1: &PreparedOperator,
        a2: &PreparedOperator,
        previous: &LowRankState,
        callback: Option<&mut IterationCallback<'_>>,
    ) -> Result<SylvesterSolution, SylvesterError> {
        let (nx, ny) = (previous.nrows(), previous.ncols());
        let max_block = previous.rank().max(self.config.max_rank);
        let workspace = self
            .workspace
            .get_or_insert_with(|| KrylovWorkspace::new(nx, ny, max_block, self.config.max_iter));
        solve_with_backend(
            self.backend.as_ref(),
            a1,
            a2,
            previous,
            &self.config,
            workspace,
            callback,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::prelude::*;

    fn diagonal_operator(n: usize, value: f64) -> PreparedOperator {
        let a = Mat::<f64>::from_fn(n, n, |i, j| if i == j { value } else { 0.0 });
        PreparedOperator::new("A", a).unwrap()
    }

    fn rank_one_state(nx: usize, ny: usize, sigma: f64) -> LowRankState {
        let u = Mat::<f64>::from_fn(nx, 1, |i, _| 1.0 + i as f64);
        let v = Mat::<f64>::from_fn(ny, 1, |j, _| (j as f64 * 0.3).cos());
        let u = u.as_ref().qr().compute_thin_Q();
        let v = v.as_ref().qr().compute_thin_Q();
        LowRankState::new(u, Mat::from_fn(1, 1, |_, _| sigma), v).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = SolverConfig::default();
        assert_eq!(config.rel_eps, 1e-3);
        assert_eq!(config.max_iter, 10);
        assert_eq!(config.max_rank, 32);
        assert_eq!(config.backend, BackendKind::Cpu);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        for config in [
            SolverConfig::default().with_rel_eps(0.0),
            SolverConfig::default().with_rel_eps(f64::NAN),
            SolverConfig::default().with_max_iter(0),
            SolverConfig::default().with_max_rank(0),
        ] {
            let error = config.validate().unwrap_err();
            assert!(matches!(error.kind(), SylvesterErrorKind::InvalidConfig(_)));
        }
    }

    #[test]
    fn test_scaled_identity_converges_to_closed_form() {
        let (nx, ny) = (12, 9);
        let (alpha, beta) = (2.0, 3.0);
        let a1 = diagonal_operator(nx, alpha);
        let a2 = diagonal_operator(ny, beta);
        let previous = rank_one_state(nx, ny, 4.0);
        let mut workspace = KrylovWorkspace::new(nx, ny, 1, 10);

        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &SolverConfig::default(),
            &mut workspace,
            None,
        )
        .unwrap();

        assert!(solution.converged());
        assert!(solution.iterations <= 2);
        assert_eq!(solution.state.rank(), 1);

        let rhs = previous.to_dense();
        let expected = Mat::<f64>::from_fn(nx, ny, |i, j| -rhs[(i, j)] / (alpha + beta));
        let error = (&solution.state.to_dense() - &expected).norm_l2() / expected.norm_l2();
        assert!(error < 1e-10, "relative error {error}");
    }

    #[test]
    fn test_zero_rank_input_returns_zero_state() {
        let a1 = diagonal_operator(5, -1.0);
        let a2 = diagonal_operator(4, -1.0);
        let mut workspace = KrylovWorkspace::new(5, 4, 1, 1);
        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &LowRankState::zero(5, 4),
            &SolverConfig::default(),
            &mut workspace,
            None,
        )
        .unwrap();
        assert_eq!(solution.state.rank(), 0);
        assert_eq!(solution.iterations, 0);
        assert!(solution.converged());
    }

    #[test]
    fn test_callback_can_stop_iteration() {
        let n = 30;
        let a = Mat::<f64>::from_fn(n, n, |i, j| {
            if i == j {
                -2.5
            } else if i.abs_diff(j) == 1 {
                1.0
            } else {
                0.0
            }
        });
        let a1 = PreparedOperator::new("A1", a.clone()).unwrap();
        let a2 = PreparedOperator::new("A2", a).unwrap();
        let previous = rank_one_state(n, n, 1.0);
        let config = SolverConfig::default().with_rel_eps(1e-14);
        let mut workspace = KrylovWorkspace::new(n, n, 1, config.max_iter);

        let mut seen = Vec::new();
        let mut stop_after_two = |report: &IterationReport| {
            seen.push(report.iteration);
            report.iteration < 2
        };
        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &config,
            &mut workspace,
            Some(&mut stop_after_two),
        )
        .unwrap();

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(solution.iterations, 2);
        assert_eq!(solution.status, ConvergenceStatus::StoppedByCallback);
    }

    #[test]
    fn test_converging_round_wins_over_callback() {
        let n = 10;
        let a1 = diagonal_operator(n, -2.0);
        let a2 = diagonal_operator(n, -2.0);
        let previous = rank_one_state(n, n, 1.0);
        let mut workspace = KrylovWorkspace::new(n, n, 1, 10);

        let mut calls = 0;
        let mut always_stop = |report: &IterationReport| {
            calls += 1;
            assert!(report.residual_norm < report.threshold);
            false
        };
        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &SolverConfig::default(),
            &mut workspace,
            Some(&mut always_stop),
        )
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(solution.iterations, 1);
        assert_eq!(solution.status, ConvergenceStatus::Converged);
        assert!(solution.residual_norm < solution.threshold);
    }

    #[cfg(not(feature = "cuda"))]
    #[test]
    fn test_accelerator_config_fails_without_cuda() {
        let config = SolverConfig::default().with_backend(BackendKind::Accelerator);
        let error = ExtendedKrylovSolver::new(config).err().unwrap();
        assert!(matches!(
            error.kind(),
            SylvesterErrorKind::BackendUnavailable { .. }
        ));
    }

    #[test]
    fn test_mismatched_operator_is_rejected() {
        let a1 = diagonal_operator(6, 1.0);
        let a2 = diagonal_operator(4, 1.0);
        let previous = rank_one_state(5, 4, 1.0);
        let mut workspace = KrylovWorkspace::new(5, 4, 1, 1);
        let error = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &SolverConfig::default(),
            &mut workspace,
            None,
        )
        .unwrap_err();
        assert_eq!(
            error.kind(),
            &SylvesterErrorKind::DimensionMismatch {
                context: "operator A1 vs. rows of U_old",
                expected: 5,
                found: 6,
            }
        );
    }

    #[test]
    fn test_workspace_is_reallocated_when_too_small() {
        let (nx, ny) = (10, 8);
        let a1 = diagonal_operator(nx, 2.0);
        let a2 = diagonal_operator(ny, 2.0);
        let previous = rank_one_state(nx, ny, 1.0);
        let mut workspace = KrylovWorkspace::new(3, 3, 1, 1);
        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &SolverConfig::default(),
            &mut workspace,
            None,
        )
        .unwrap();
        assert!(solution.converged());
        assert!(workspace.fits(nx, ny, 1, 10));
    }

    #[test]
    fn test_solver_owner_reuses_workspace() {
        let n = 16;
        let a1 = diagonal_operator(n, -1.5);
        let a2 = diagonal_operator(n, -0.5);
        let mut solver = ExtendedKrylovSolver::new(SolverConfig::default()).unwrap();
        assert_eq!(solver.backend(), BackendKind::Cpu);

        let mut state = rank_one_state(n, n, 1.0);
        for _ in 0..3 {
            let solution = solver.step(&a1, &a2, &state).unwrap();
            assert!(solution.converged());
            state = solution.state;
        }
        // Each step multiplies the field by -1 / (-1.5 - 0.5) = 0.5.
        assert!((state.leading_value() - 0.125).abs() < 1e-12);
    }
}
