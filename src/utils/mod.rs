//! Common utilities for data loading and performance measurement.
//!
//! This module provides helper functions used by the experiment binaries.
//! It is organized into two submodules:
//!
//! - **`data_loader`**: Parses sparse coefficient operators stored in the Matrix Market
//!   coordinate format, so runners can take `A1` and `A2` from files instead of the
//!   built-in heat problem.
//!
//! - **`perf`**: Timing statistics over repeated runs, driven by an explicit
//!   [`perf::BenchmarkConfig`], and the peak resident set size (RSS) on Linux.

pub mod data_loader;
pub mod perf;
