//! Experiment Runner for the Convergence Analysis.
//!
//! This executable records how the estimated residual of the extended Krylov solver
//! evolves with the number of rounds. For a fixed heat-equation step it runs the solver
//! once for every iteration budget in `1..=max-iter`, with a tolerance small enough that
//! the budget is always exhausted, and writes one CSV row per round of every run. Since a
//! larger budget only appends rounds, the residual column of a run is expected to be
//! non-increasing and to agree with the prefixes of the longer runs.

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use lowrank_sylvester::{
    BackendKind, IterationReport, KrylovWorkspace, SolverConfig, problems::HeatProblem,
    solve_low_rank_sylvester,
};
use serde::Serialize;
use std::path::PathBuf;

/// Command-line arguments for the convergence sweep.
#[derive(Parser, Debug)]
#[clap(
    name = "convergence-runner",
    about = "Records the residual estimate per extended Krylov round for growing iteration budgets."
)]
struct ConvergenceArgs {
    /// Number of interior grid points along each axis.
    #[clap(long, default_value_t = 128)]
    n: usize,
    /// Time step of the backward Euler scheme.
    #[clap(long, default_value_t = 1e-2)]
    dt: f64,
    /// Largest iteration budget of the sweep.
    #[clap(long, default_value_t = 10)]
    max_iter: usize,
    /// Relative tolerance. Keep it tiny so that no run stops before its budget.
    #[clap(long, default_value_t = 1e-14)]
    rel_eps: f64,
    /// Maximum rank of the returned state.
    #[clap(long, default_value_t = 32)]
    max_rank: usize,
    /// Relative tolerance used to compress the initial condition.
    #[clap(long, default_value_t = 1e-8)]
    initial_tol: f64,
    #[clap(long, value_enum, default_value = "cpu")]
    backend: BackendKind,
    /// Path to the output CSV file.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// One round of one run.
#[derive(Debug, Serialize)]
struct ConvergenceRecord {
    max_iter: usize,
    iteration: usize,
    residual_norm: f64,
    threshold: f64,
    left_dim: usize,
    right_dim: usize,
    status: String,
    final_rank: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = ConvergenceArgs::parse();
    ensure!(args.max_iter > 0, "--max-iter must be positive.");

    let problem = HeatProblem::unit_square(args.n, args.dt)?;
    let (a1, a2) = problem.operators()?;
    let previous = problem.initial_state(args.initial_tol, args.max_rank)?;
    log::info!(
        "Initial condition on a {}x{} grid compressed to rank {}.",
        args.n,
        args.n,
        previous.rank()
    );

    let base = SolverConfig::default()
        .with_rel_eps(args.rel_eps)
        .with_max_rank(args.max_rank)
        .with_backend(args.backend);
    let mut workspace = KrylovWorkspace::new(args.n, args.n, previous.rank(), args.max_iter);

    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create CSV writer for {:?}", &args.output))?;

    for max_iter in 1..=args.max_iter {
        let config = base.with_max_iter(max_iter);
        let mut reports: Vec<IterationReport> = Vec::with_capacity(max_iter);
        let mut record_round = |report: &IterationReport| {
            reports.push(*report);
            true
        };

        let solution = solve_low_rank_sylvester(
            &a1,
            &a2,
            &previous,
            &config,
            &mut workspace,
            Some(&mut record_round),
        )
        .with_context(|| format!("Solver failed with max_iter = {max_iter}"))?;

        let increases = reports
            .windows(2)
            .filter(|w| w[1].residual_norm > w[0].residual_norm)
            .count();
        if increases > 0 {
            log::warn!(
                "max_iter = {}: residual estimate increased in {} of {} rounds.",
                max_iter,
                increases,
                reports.len() - 1
            );
        }
        log::info!(
            "max_iter = {}: final residual {:.3e} ({}), rank {}.",
            max_iter,
            solution.residual_norm,
            solution.status,
            solution.state.rank()
        );

        for report in &reports {
            writer.serialize(ConvergenceRecord {
                max_iter,
                iteration: report.iteration,
                residual_norm: report.residual_norm,
                threshold: report.threshold,
                left_dim: report.left_dim,
                right_dim: report.right_dim,
                status: solution.status.to_string(),
                final_rank: solution.state.rank(),
            })?;
        }
        writer.flush()?;
    }

    log::info!(
        "Convergence sweep complete. Results saved to {:?}.",
        &args.output
    );
    Ok(())
}
