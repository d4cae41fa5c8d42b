// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bottleneck classification and regression detection over an
//! [`Aggregator`]'s rolling history. Purely advisory: nothing here mutates
//! runtime state, it only reports.

use tracing::info;

use crate::aggregator::Aggregator;
use crate::error::TelemetryError;
use crate::sample::Metric;

/// Default regression threshold: a 10% increase over baseline.
pub const DEFAULT_REGRESSION_THRESHOLD: f64 = 0.10;

/// The dominant constraint across a subsystem's recent samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bottleneck {
    /// Which metric is currently most pressured.
    pub metric: Metric,
    /// That metric's normalized (0-100) rolling mean.
    pub pressure: f64,
}

/// Computes [`Bottleneck`]s and flags regressions from an [`Aggregator`]'s
/// history. Stateless beyond the aggregator it borrows: every call re-derives
/// its answer from current history rather than caching a verdict.
#[derive(Clone, Copy, Debug, Default)]
pub struct Analyzer {
    /// Fractional increase over baseline that counts as a regression.
    pub regression_threshold: f64,
}

impl Analyzer {
    /// Creates an analyzer using [`DEFAULT_REGRESSION_THRESHOLD`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            regression_threshold: DEFAULT_REGRESSION_THRESHOLD,
        }
    }

    /// Creates an analyzer with a custom regression threshold.
    #[must_use]
    pub fn with_threshold(regression_threshold: f64) -> Self {
        Self { regression_threshold }
    }

    /// `bottleneck = argmax({cpu_avg, gpu_avg, memory_pressure_avg,
    /// io_latency_avg, cache_miss_avg})`, each normalized into 0-100 first.
    /// Ties keep the earliest metric in [`Metric`]'s declared order.
    pub fn bottleneck(
        &self,
        aggregator: &Aggregator,
        subsystem: &str,
    ) -> Result<Bottleneck, TelemetryError> {
        let mut best: Option<Bottleneck> = None;
        for metric in Metric::ALL {
            let raw = aggregator.mean(subsystem, metric)?;
            let pressure = raw.clamp(0.0, 100.0);
            if best.is_none_or(|b| pressure > b.pressure) {
                best = Some(Bottleneck { metric, pressure });
            }
        }
        // Every branch of the loop above sets `best` on the first iteration.
        let bottleneck = best.unwrap_or(Bottleneck {
            metric: Metric::Cpu,
            pressure: 0.0,
        });
        info!(subsystem, metric = ?bottleneck.metric, pressure = bottleneck.pressure, "bottleneck computed");
        Ok(bottleneck)
    }

    /// `regression = recent_mean(metric) > baseline_mean(metric) × (1 +
    /// threshold)`, baseline over the leading `baseline_window` samples,
    /// recent over the trailing `recent_window` samples.
    pub fn regression(
        &self,
        aggregator: &Aggregator,
        subsystem: &str,
        metric: Metric,
        baseline_window: usize,
        recent_window: usize,
    ) -> Result<bool, TelemetryError> {
        let (baseline, recent) =
            aggregator.window_means(subsystem, metric, baseline_window, recent_window)?;
        let regressed = recent > baseline * (1.0 + self.regression_threshold);
        if regressed {
            info!(subsystem, metric = ?metric, baseline, recent, "regression detected");
        }
        Ok(regressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::TelemetrySample;

    fn sample(cpu: f32, gpu: f32, mem: u64, latency_us: u64, err: f64) -> TelemetrySample {
        TelemetrySample {
            timestamp_micros: 0,
            cpu_percent: cpu,
            gpu_percent: gpu,
            memory_bytes: mem,
            latency_micros: latency_us,
            throughput: 0.0,
            error_rate: err,
            frame_time_micros: 16_666,
            fps: 60.0,
        }
    }

    #[test]
    fn bottleneck_picks_the_highest_pressure_metric() {
        let mut agg = Aggregator::new(100, 1_000);
        // cpu 20%, gpu 90% -> gpu should dominate.
        agg.record("render", sample(20.0, 90.0, 0, 0, 0.0));
        let analyzer = Analyzer::new();
        let b = analyzer.bottleneck(&agg, "render").unwrap();
        assert_eq!(b.metric, Metric::Gpu);
        assert!((b.pressure - 90.0).abs() < 1e-9);
    }

    #[test]
    fn bottleneck_ties_keep_earliest_metric() {
        let mut agg = Aggregator::new(100, 1_000);
        agg.record("render", sample(50.0, 50.0, 0, 0, 0.0));
        let b = Analyzer::new().bottleneck(&agg, "render").unwrap();
        assert_eq!(b.metric, Metric::Cpu);
    }

    #[test]
    fn regression_flags_a_sustained_increase() {
        let mut agg = Aggregator::new(100, 1_000);
        for cpu in [10.0, 10.0, 10.0] {
            agg.record("build", sample(cpu, 0.0, 0, 0, 0.0));
        }
        for cpu in [50.0, 50.0, 50.0] {
            agg.record("build", sample(cpu, 0.0, 0, 0, 0.0));
        }
        let analyzer = Analyzer::new();
        assert!(analyzer
            .regression(&agg, "build", Metric::Cpu, 3, 3)
            .unwrap());
    }

    #[test]
    fn regression_is_silent_within_threshold() {
        let mut agg = Aggregator::new(100, 1_000);
        for cpu in [10.0, 10.0, 10.0, 10.5, 10.5, 10.5] {
            agg.record("build", sample(cpu, 0.0, 0, 0, 0.0));
        }
        let analyzer = Analyzer::new();
        assert!(!analyzer
            .regression(&agg, "build", Metric::Cpu, 3, 3)
            .unwrap());
    }
}
