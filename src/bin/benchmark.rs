//! Experiment Runner for the Time-Stepping Benchmark.
//!
//! This executable time-steps the 2D heat equation with the low-rank Sylvester solver.
//! Every backward Euler step is one call of the solver, whose right-hand side is the
//! state of the previous time level. Each step is repeated according to a
//! [`BenchmarkConfig`] and the timing statistics, together with the rank, iteration count
//! and residual of the step, are written as one CSV row.
//!
//! All selected backends start from the same initial state, so their rows can be
//! compared step by step. Optionally, the coefficient operators are read from Matrix
//! Market files instead of being generated; the initial condition is then sampled on the
//! unit square with the operators' dimensions.

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use lowrank_sylvester::{
    BackendKind, ExtendedKrylovSolver, LowRankState, PreparedOperator, SolverConfig,
    problems::HeatProblem,
    utils::{
        data_loader::load_matrix_market,
        perf::{BenchmarkConfig, get_peak_rss_kb, measure},
    },
};
use serde::Serialize;
use std::{path::PathBuf, time::Instant};

/// Command-line arguments for the benchmark.
#[derive(Parser, Debug)]
#[clap(
    name = "benchmark-runner",
    about = "Time-steps the 2D heat equation with the extended Krylov Sylvester solver."
)]
struct BenchmarkArgs {
    /// Number of interior grid points along x.
    #[clap(long, default_value_t = 256)]
    nx: usize,
    /// Number of interior grid points along y.
    #[clap(long, default_value_t = 256)]
    ny: usize,
    /// Length of the domain along x.
    #[clap(long, default_value_t = 1.0)]
    lx: f64,
    /// Length of the domain along y.
    #[clap(long, default_value_t = 1.0)]
    ly: f64,
    /// Time step of the backward Euler scheme.
    #[clap(long, default_value_t = 1e-3)]
    dt: f64,
    /// Number of time steps.
    #[clap(long, default_value_t = 10)]
    steps: usize,
    /// Backends to benchmark, comma separated. The accelerator backends need the `cuda`
    /// feature.
    #[clap(long, value_enum, value_delimiter = ',', default_values = ["cpu", "cpu-parallel"])]
    backends: Vec<BackendKind>,
    /// Relative tolerance for the stopping test and the rank truncation.
    #[clap(long, default_value_t = 1e-3)]
    rel_eps: f64,
    /// Maximum number of extended Krylov rounds per step.
    #[clap(long, default_value_t = 10)]
    max_iter: usize,
    /// Maximum rank of the state.
    #[clap(long, default_value_t = 32)]
    max_rank: usize,
    /// Number of timed repetitions of each step.
    #[clap(long, default_value_t = 5)]
    samples: usize,
    /// Wall-time budget for the repetitions of a single step, in seconds.
    #[clap(long, default_value_t = 30.0)]
    time_budget: f64,
    /// Optional Matrix Market file for A1. Requires --a2-mtx.
    #[clap(long, value_name = "PATH", requires = "a2_mtx")]
    a1_mtx: Option<PathBuf>,
    /// Optional Matrix Market file for A2. Requires --a1-mtx.
    #[clap(long, value_name = "PATH", requires = "a1_mtx")]
    a2_mtx: Option<PathBuf>,
    /// Path to the output CSV file.
    #[clap(long, value_name = "PATH")]
    output: PathBuf,
}

/// Represents a single row of data in the output CSV: one time step on one backend.
#[derive(Debug, Serialize)]
struct StepRecord {
    backend: BackendKind,
    nx: usize,
    ny: usize,
    step: usize,
    rank: usize,
    iterations: usize,
    status: String,
    residual_norm: f64,
    threshold: f64,
    samples: usize,
    min_s: f64,
    median_s: f64,
    mean_s: f64,
    rss_kb: u64,
}

/// Builds the operators and the initial state, either from files or from the heat problem.
fn setup(
    args: &BenchmarkArgs,
    config: &SolverConfig,
) -> Result<(PreparedOperator, PreparedOperator, LowRankState)> {
    match (&args.a1_mtx, &args.a2_mtx) {
        (Some(a1_path), Some(a2_path)) => {
            let a1 = load_matrix_market(a1_path)
                .with_context(|| format!("Failed to load A1 from {a1_path:?}"))?;
            let a2 = load_matrix_market(a2_path)
                .with_context(|| format!("Failed to load A2 from {a2_path:?}"))?;
            let problem = HeatProblem::new(a1.nrows(), a2.nrows(), 1.0, 1.0, args.dt)?;
            let a1 = PreparedOperator::new("A1", a1)?;
            let a2 = PreparedOperator::new("A2", a2)?;
            let initial = problem.initial_state(config.rel_eps, config.max_rank)?;
            Ok((a1, a2, initial))
        }
        (None, None) => {
            let problem = HeatProblem::new(args.nx, args.ny, args.lx, args.ly, args.dt)?;
            let (a1, a2) = problem.operators()?;
            let initial = problem.initial_state(config.rel_eps, config.max_rank)?;
            Ok((a1, a2, initial))
        }
        _ => Err(anyhow!("--a1-mtx and --a2-mtx must be given together")),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize logger: {}", e))?;

    let args = BenchmarkArgs::parse();
    ensure!(!args.backends.is_empty(), "At least one backend must be selected.");

    let config = SolverConfig::default()
        .with_rel_eps(args.rel_eps)
        .with_max_iter(args.max_iter)
        .with_max_rank(args.max_rank);
    config.validate()?;
    let bench = BenchmarkConfig {
        samples: args.samples,
        time_budget_s: args.time_budget,
    };

    let setup_start = Instant::now();
    let (a1, a2, initial) = setup(&args, &config)?;
    log::info!(
        "Prepared a {}x{} problem with initial rank {} in {:.2}s.",
        initial.nrows(),
        initial.ncols(),
        initial.rank(),
        setup_start.elapsed().as_secs_f64()
    );

    // Create the CSV writer. Opening the file here will truncate it if it exists.
    let mut writer = csv::Writer::from_path(&args.output)
        .with_context(|| format!("Failed to create CSV writer for {:?}", &args.output))?;

    for &backend in &args.backends {
        log::info!("Running {} steps on backend {}...", args.steps, backend);
        let mut solver = ExtendedKrylovSolver::new(config.with_backend(backend))
            .with_context(|| format!("Failed to set up backend {backend}"))?;
        let mut state = initial.clone();

        for step in 1..=args.steps {
            let (stats, solution) = measure(&bench, || solver.step(&a1, &a2, &state))
                .with_context(|| format!("Step {step} failed on backend {backend}"))?;

            log::info!(
                "Step {}: rank {}, {} iterations ({}), median {:.4}s.",
                step,
                solution.state.rank(),
                solution.iterations,
                solution.status,
                stats.median_s
            );

            // Write each record immediately so partial runs keep their data.
            writer.serialize(StepRecord {
                backend,
                nx: state.nrows(),
                ny: state.ncols(),
                step,
                rank: solution.state.rank(),
                iterations: solution.iterations,
                status: solution.status.to_string(),
                residual_norm: solution.residual_norm,
                threshold: solution.threshold,
                samples: stats.samples,
                min_s: stats.min_s,
                median_s: stats.median_s,
                mean_s: stats.mean_s,
                rss_kb: get_peak_rss_kb(),
            })?;
            writer.flush()?;

            state = solution.state;
        }
    }

    log::info!("Benchmark complete. Results saved to {:?}.", &args.output);
    Ok(())
}
