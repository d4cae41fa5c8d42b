// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-subsystem rolling telemetry history and statistics.

use std::collections::BTreeMap;

use ember_core::RingBuffer;
use tracing::trace;

use crate::error::TelemetryError;
use crate::sample::{Metric, TelemetrySample};

/// Default ring capacity per subsystem.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Owns one fixed-capacity ring of [`TelemetrySample`]s per subsystem and
/// answers rolling mean/standard-deviation queries over them. Never fails on
/// `record`: telemetry is advisory and must stay out of the hot error path.
pub struct Aggregator {
    capacity: usize,
    memory_budget_bytes: u64,
    subsystems: BTreeMap<String, RingBuffer<TelemetrySample>>,
}

impl Aggregator {
    /// Creates an aggregator keeping `capacity` samples per subsystem.
    /// `memory_budget_bytes` is the denominator [`Metric::MemoryPressure`]
    /// normalizes `memory_bytes` against.
    #[must_use]
    pub fn new(capacity: usize, memory_budget_bytes: u64) -> Self {
        Self {
            capacity,
            memory_budget_bytes,
            subsystems: BTreeMap::new(),
        }
    }

    /// Records one sample for `subsystem`, evicting the oldest sample if
    /// that subsystem's ring is already at capacity.
    pub fn record(&mut self, subsystem: impl Into<String>, sample: TelemetrySample) {
        let subsystem = subsystem.into();
        let capacity = self.capacity;
        self.subsystems
            .entry(subsystem.clone())
            .or_insert_with(|| RingBuffer::new(capacity))
            .push(sample);
        trace!(subsystem, "telemetry sample recorded");
    }

    /// Rolling arithmetic mean of `metric`'s raw value across every sample
    /// currently held for `subsystem`.
    pub fn mean(&self, subsystem: &str, metric: Metric) -> Result<f64, TelemetryError> {
        let ring = self.ring(subsystem)?;
        let budget = self.memory_budget_bytes;
        Ok(Self::mean_of(ring.iter(), ring.len(), metric, budget))
    }

    /// Rolling population standard deviation of `metric`'s raw value across
    /// every sample currently held for `subsystem`.
    pub fn stddev(&self, subsystem: &str, metric: Metric) -> Result<f64, TelemetryError> {
        let ring = self.ring(subsystem)?;
        let budget = self.memory_budget_bytes;
        let mean = Self::mean_of(ring.iter(), ring.len(), metric, budget);
        let variance = ring
            .iter()
            .map(|s| {
                let d = metric.raw(s, budget) - mean;
                d * d
            })
            .sum::<f64>()
            / ring.len() as f64;
        Ok(variance.sqrt())
    }

    /// Baseline (leading `baseline_window` samples) and recent (trailing
    /// `recent_window` samples) means of `metric` for `subsystem`, the two
    /// inputs the regression detector compares.
    pub fn window_means(
        &self,
        subsystem: &str,
        metric: Metric,
        baseline_window: usize,
        recent_window: usize,
    ) -> Result<(f64, f64), TelemetryError> {
        let ring = self.ring(subsystem)?;
        if baseline_window > ring.len() || recent_window > ring.len() {
            return Err(TelemetryError::WindowTooLarge {
                subsystem: subsystem.to_string(),
                requested: baseline_window.max(recent_window),
                available: ring.len(),
            });
        }
        let budget = self.memory_budget_bytes;
        let leading = ring.iter().take(baseline_window);
        let baseline = Self::mean_of(leading, baseline_window, metric, budget);
        let recent = Self::mean_of(ring.tail(recent_window), recent_window, metric, budget);
        Ok((baseline, recent))
    }

    /// Subsystem names currently being tracked, in sorted order.
    pub fn subsystems(&self) -> impl Iterator<Item = &str> {
        self.subsystems.keys().map(String::as_str)
    }

    /// Number of samples currently held for `subsystem`, or 0 if it has
    /// never been recorded.
    #[must_use]
    pub fn sample_count(&self, subsystem: &str) -> usize {
        self.subsystems.get(subsystem).map_or(0, RingBuffer::len)
    }

    /// The memory budget new samples' [`Metric::MemoryPressure`] is
    /// normalized against.
    #[must_use]
    pub const fn memory_budget_bytes(&self) -> u64 {
        self.memory_budget_bytes
    }

    fn ring(&self, subsystem: &str) -> Result<&RingBuffer<TelemetrySample>, TelemetryError> {
        self.subsystems
            .get(subsystem)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| TelemetryError::UnknownSubsystem(subsystem.to_string()))
    }

    fn mean_of<'a>(
        samples: impl Iterator<Item = &'a TelemetrySample>,
        count: usize,
        metric: Metric,
        memory_budget_bytes: u64,
    ) -> f64 {
        if count == 0 {
            return 0.0;
        }
        samples.map(|s| metric.raw(s, memory_budget_bytes)).sum::<f64>() / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f32) -> TelemetrySample {
        TelemetrySample {
            timestamp_micros: 0,
            cpu_percent: cpu,
            gpu_percent: 0.0,
            memory_bytes: 0,
            latency_micros: 0,
            throughput: 0.0,
            error_rate: 0.0,
            frame_time_micros: 16_666,
            fps: 60.0,
        }
    }

    #[test]
    fn unknown_subsystem_errors() {
        let agg = Aggregator::new(DEFAULT_CAPACITY, 1);
        let err = agg.mean("build", Metric::Cpu).unwrap_err();
        assert!(matches!(err, TelemetryError::UnknownSubsystem(_)));
    }

    #[test]
    fn mean_and_stddev_over_recorded_samples() {
        let mut agg = Aggregator::new(DEFAULT_CAPACITY, 1);
        for cpu in [10.0, 20.0, 30.0] {
            agg.record("build", sample(cpu));
        }
        assert!((agg.mean("build", Metric::Cpu).unwrap() - 20.0).abs() < 1e-9);
        assert!(agg.stddev("build", Metric::Cpu).unwrap() > 0.0);
    }

    #[test]
    fn ring_evicts_oldest_past_capacity() {
        let mut agg = Aggregator::new(2, 1);
        agg.record("build", sample(10.0));
        agg.record("build", sample(20.0));
        agg.record("build", sample(30.0));
        assert_eq!(agg.sample_count("build"), 2);
        assert!((agg.mean("build", Metric::Cpu).unwrap() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn window_means_reports_baseline_and_recent() {
        let mut agg = Aggregator::new(DEFAULT_CAPACITY, 1);
        for cpu in [10.0, 10.0, 50.0, 50.0] {
            agg.record("build", sample(cpu));
        }
        let (baseline, recent) = agg.window_means("build", Metric::Cpu, 2, 2).unwrap();
        assert!((baseline - 10.0).abs() < 1e-9);
        assert!((recent - 50.0).abs() < 1e-9);
    }

    #[test]
    fn window_larger_than_history_errors() {
        let mut agg = Aggregator::new(DEFAULT_CAPACITY, 1);
        agg.record("build", sample(1.0));
        let err = agg.window_means("build", Metric::Cpu, 5, 5).unwrap_err();
        assert!(matches!(err, TelemetryError::WindowTooLarge { .. }));
    }
}
