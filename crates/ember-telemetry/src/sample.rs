// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! One subsystem's telemetry reading at a point in time.

/// A single telemetry reading from one subsystem.
///
/// `gpu_percent` is sourced from the optional OS performance-counter input;
/// like every other field pulled from that source, it is zero rather than
/// absent when the counter isn't available on the host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TelemetrySample {
    /// Microseconds since the Unix epoch, supplied by the caller.
    pub timestamp_micros: u64,
    /// CPU utilization, 0-100.
    pub cpu_percent: f32,
    /// GPU utilization, 0-100; zero if the host has no GPU counter.
    pub gpu_percent: f32,
    /// Resident memory in bytes.
    pub memory_bytes: u64,
    /// Operation latency in microseconds.
    pub latency_micros: u64,
    /// Throughput in subsystem-defined units per second.
    pub throughput: f64,
    /// Error rate as a 0.0-1.0 fraction.
    pub error_rate: f64,
    /// Frame time in microseconds.
    pub frame_time_micros: u64,
    /// Frames per second.
    pub fps: f32,
}

/// The five metrics the bottleneck analyzer compares, each normalized into a
/// 0-100 "pressure" percentage before the argmax.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    /// `cpu_percent`, already 0-100.
    Cpu,
    /// `gpu_percent`, already 0-100.
    Gpu,
    /// `memory_bytes` normalized against a configured budget.
    MemoryPressure,
    /// `latency_micros` converted to `latency_ms / 10`, per the normalization
    /// rule that puts IO latency on a comparable footing with percentages.
    IoLatency,
    /// `error_rate` expressed as a percentage; doubles as the cache-miss
    /// signal for subsystems that report misses through their error rate.
    CacheMiss,
}

impl Metric {
    /// All metrics the bottleneck analyzer considers, in the order the
    /// argmax breaks ties (earlier wins).
    pub(crate) const ALL: [Self; 5] = [
        Self::Cpu,
        Self::Gpu,
        Self::MemoryPressure,
        Self::IoLatency,
        Self::CacheMiss,
    ];

    /// Extracts this metric's raw (un-normalized) value from one sample.
    #[must_use]
    pub fn raw(self, sample: &TelemetrySample, memory_budget_bytes: u64) -> f64 {
        match self {
            Self::Cpu => f64::from(sample.cpu_percent),
            Self::Gpu => f64::from(sample.gpu_percent),
            Self::MemoryPressure => {
                if memory_budget_bytes == 0 {
                    0.0
                } else {
                    sample.memory_bytes as f64 / memory_budget_bytes as f64 * 100.0
                }
            }
            Self::IoLatency => (sample.latency_micros as f64 / 1000.0) / 10.0,
            Self::CacheMiss => sample.error_rate * 100.0,
        }
    }

    /// This metric's value, clamped to the 0-100 pressure range the
    /// bottleneck analyzer compares.
    #[must_use]
    pub fn normalized(self, sample: &TelemetrySample, memory_budget_bytes: u64) -> f64 {
        self.raw(sample, memory_budget_bytes).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetrySample {
        TelemetrySample {
            timestamp_micros: 0,
            cpu_percent: 40.0,
            gpu_percent: 10.0,
            memory_bytes: 512,
            latency_micros: 250_000,
            throughput: 1.0,
            error_rate: 0.5,
            frame_time_micros: 16_666,
            fps: 60.0,
        }
    }

    #[test]
    fn io_latency_divides_ms_by_ten() {
        // 250_000us = 250ms; 250 / 10 = 25.
        assert!((Metric::IoLatency.raw(&sample(), 1024) - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn memory_pressure_is_a_percentage_of_budget() {
        assert!((Metric::MemoryPressure.raw(&sample(), 1024) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cache_miss_is_error_rate_as_percent() {
        assert!((Metric::CacheMiss.raw(&sample(), 1024) - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn normalized_clamps_above_100() {
        let mut s = sample();
        s.cpu_percent = 500.0;
        assert_eq!(Metric::Cpu.normalized(&s, 1024), 100.0);
    }
}
