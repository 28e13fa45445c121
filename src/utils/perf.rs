//! Performance measurement utilities for memory and timing analysis.
//!
//! Timing is configured through an explicit [`BenchmarkConfig`] value passed by the
//! caller; there are no process-wide defaults. Memory statistics target Linux and are
//! read from /proc/self/status.

use serde::Serialize;
use std::time::Instant;

/// Controls how many times a measured closure is repeated.
///
/// Sampling stops after `samples` runs or as soon as the accumulated wall time exceeds
/// `time_budget_s`, whichever comes first. At least one sample is always taken.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BenchmarkConfig {
    pub samples: usize,
    pub time_budget_s: f64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            samples: 5,
            time_budget_s: 30.0,
        }
    }
}

/// Summary statistics of a series of wall-clock timings, in seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TimingStats {
    pub samples: usize,
    pub min_s: f64,
    pub median_s: f64,
    pub mean_s: f64,
}

impl TimingStats {
    /// Summarizes the given samples. Returns `None` for an empty slice.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            None
        } else {
            Some(Self::summarize(samples))
        }
    }

    /// Expects a non-empty slice.
    fn summarize(samples: &[f64]) -> Self {
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let median_s = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
        };
        Self {
            samples: n,
            min_s: sorted[0],
            median_s,
            mean_s: sorted.iter().sum::<f64>() / n as f64,
        }
    }
}

/// Runs `f` repeatedly according to `config` and returns the timing statistics together
/// with the output of the last run.
pub fn measure<T, E>(
    config: &BenchmarkConfig,
    mut f: impl FnMut() -> Result<T, E>,
) -> Result<(TimingStats, T), E> {
    let target = config.samples.max(1);
    let mut timings = Vec::with_capacity(target);
    let mut elapsed_total = 0.0;

    let start = Instant::now();
    let mut last = f()?;
    let first = start.elapsed().as_secs_f64();
    timings.push(first);
    elapsed_total += first;

    while timings.len() < target && elapsed_total < config.time_budget_s {
        let start = Instant::now();
        last = f()?;
        let t = start.elapsed().as_secs_f64();
        timings.push(t);
        elapsed_total += t;
    }

    if timings.len() < target {
        log::info!(
            "Time budget of {:.1}s exhausted after {} of {} samples.",
            config.time_budget_s,
            timings.len(),
            target
        );
    }

    Ok((TimingStats::summarize(&timings), last))
}

/// Reads the peak resident set size (VmPeak) from /proc/self/status on Linux.
///
/// # Returns
/// The peak memory usage in kilobytes (KB), or 0 if the value cannot be read
/// or the platform is not Linux.
#[cfg(target_os = "linux")]
pub fn get_peak_rss_kb() -> u64 {
    let status_content = match std::fs::read_to_string("/proc/self/status") {
        Ok(content) => content,
        Err(_) => return 0,
    };

    status_content
        .lines()
        .find(|line| line.starts_with("VmPeak:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse().ok())
        .unwrap_or(0)
}

/// Fallback for non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn get_peak_rss_kb() -> u64 {
    use std::sync::Once;
    static WARN_ONCE: Once = Once::new();
    WARN_ONCE.call_once(|| {
        log::warn!("Peak RSS measurement is only supported on Linux; returning 0.");
    });
    0
}
