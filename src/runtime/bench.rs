//! Benchmark sampling for `bench` tests.
//!
//! The sampler re-invokes a passing test body: `warmup` discarded
//! invocations, then up to `iterations` timed samples. Metrics are plain
//! order statistics plus a normal-approximation confidence interval, so
//! equal samples always produce equal metrics. Hitting the test's
//! deadline mid-sampling sets `timed_out` and reports whatever was
//! collected.

use std::time::Instant;

use rhai::{Dynamic, FnPtr};

use crate::isolate::Interrupt;
use crate::report::{BenchMetrics, ExecError};
use crate::runtime::{BodyError, Harness};

/// Sampling controls, from the entry's options.
pub struct BenchParams {
    pub warmup: u32,
    pub iterations: u32,
    pub confidence: f64,
}

/// Runs the sampling loop on the current (blocking) thread.
///
/// A thrown body aborts the bench with the error; an interrupt only stops
/// sampling early.
pub fn sample(
    harness: &Harness,
    body: &FnPtr,
    arg: Option<&Dynamic>,
    params: &BenchParams,
    deadline: Instant,
    interrupt: Interrupt,
) -> Result<BenchMetrics, ExecError> {
    let mut timed_out = false;
    let mut samples_ms: Vec<f64> = Vec::with_capacity(params.iterations as usize);

    for _ in 0..params.warmup {
        if Instant::now() >= deadline {
            timed_out = true;
            break;
        }
        match harness.call(body, arg, interrupt.clone()) {
            Ok(_) => {}
            Err(BodyError::Interrupted) => {
                timed_out = true;
                break;
            }
            Err(BodyError::Error(error)) => return Err(error),
        }
    }

    if !timed_out {
        for _ in 0..params.iterations {
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            let started = Instant::now();
            match harness.call(body, arg, interrupt.clone()) {
                Ok(_) => samples_ms.push(started.elapsed().as_secs_f64() * 1_000.0),
                Err(BodyError::Interrupted) => {
                    timed_out = true;
                    break;
                }
                Err(BodyError::Error(error)) => return Err(error),
            }
        }
    }

    Ok(metrics_from_samples(&samples_ms, params.confidence, timed_out))
}

/// Folds raw samples into metrics. Deterministic for equal inputs.
pub(crate) fn metrics_from_samples(samples_ms: &[f64], confidence: f64, timed_out: bool) -> BenchMetrics {
    let n = samples_ms.len();
    if n == 0 {
        return BenchMetrics {
            ops_per_sec: 0.0,
            mean_ms: 0.0,
            median_ms: 0.0,
            p95_ms: 0.0,
            std_dev_ms: 0.0,
            ci_low_ms: 0.0,
            ci_high_ms: 0.0,
            confidence,
            iterations: 0,
            timed_out,
        };
    }

    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mean = samples_ms.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    };
    let p95 = sorted[(((n as f64) * 0.95).ceil() as usize).clamp(1, n) - 1];

    let std_dev = if n > 1 {
        let variance = samples_ms
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f64>()
            / (n - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };

    let margin = z_value(confidence) * std_dev / (n as f64).sqrt();

    BenchMetrics {
        ops_per_sec: if mean > 0.0 { 1_000.0 / mean } else { 0.0 },
        mean_ms: mean,
        median_ms: median,
        p95_ms: p95,
        std_dev_ms: std_dev,
        ci_low_ms: mean - margin,
        ci_high_ms: mean + margin,
        confidence,
        iterations: n as u32,
        timed_out,
    }
}

/// Normal-approximation z-value for the supported confidence ladder
/// (0.90 / 0.95 / 0.99, nearest wins).
fn z_value(confidence: f64) -> f64 {
    if confidence >= 0.985 {
        2.576
    } else if confidence >= 0.925 {
        1.960
    } else {
        1.645
    }
}
