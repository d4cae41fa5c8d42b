// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fixed-width feature extraction feeding the failure-probability predictor.

use ember_core::{ErrorContext, Hash32, Severity};

use crate::history::FailureDomain;

const SEVERITY_COUNT: usize = 5;
const DOMAIN_COUNT: usize = 9;
const SUBSYSTEM_BUCKETS: usize = 8;
const PATH_BUCKETS: usize = 8;
const THREAD_BUCKETS: usize = 8;
const SCALAR_COUNT: usize = 4; // memory, cpu, error rate, hour-of-day

/// Width of the feature vector the predictor consumes.
pub const FEATURE_COUNT: usize = SEVERITY_COUNT
    + DOMAIN_COUNT
    + SUBSYSTEM_BUCKETS
    + SCALAR_COUNT
    + PATH_BUCKETS
    + THREAD_BUCKETS;

/// Extra, caller-supplied context the [`ErrorContext`](ember_core::ErrorContext)
/// itself doesn't carry but the feature vector wants.
#[derive(Clone, Copy, Debug, Default)]
pub struct FeatureContext {
    /// Hour of day (0-23) the error occurred, local or UTC per caller
    /// convention; only relative bucketing matters here.
    pub hour_of_day: u8,
    /// Hash of the source file path involved, if any.
    pub file_path_hash: Option<Hash32>,
    /// Id of the thread that raised the error.
    pub thread_id: u64,
}

fn severity_index(severity: Severity) -> usize {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
        Severity::Critical => 3,
        Severity::Fatal => 4,
    }
}

fn domain_index(domain: FailureDomain) -> usize {
    match domain {
        FailureDomain::Compile => 0,
        FailureDomain::Runtime => 1,
        FailureDomain::Memory => 2,
        FailureDomain::Io => 3,
        FailureDomain::Network => 4,
        FailureDomain::Resource => 5,
        FailureDomain::Perf => 6,
        FailureDomain::Security => 7,
        FailureDomain::Config => 8,
    }
}

fn bucket(bytes: &[u8], buckets: usize) -> usize {
    let hash = Hash32::of(bytes);
    hash.as_bytes()[0] as usize % buckets
}

fn set_one_hot(features: &mut [f64], offset: usize, width: usize, index: usize) {
    features[offset + index.min(width - 1)] = 1.0;
}

/// Builds the fixed-width feature vector for one error, classified under
/// `domain`.
#[must_use]
pub fn extract(
    context: &ErrorContext,
    domain: FailureDomain,
    ctx: FeatureContext,
) -> [f64; FEATURE_COUNT] {
    let mut features = [0.0; FEATURE_COUNT];
    let mut offset = 0;

    set_one_hot(&mut features, offset, SEVERITY_COUNT, severity_index(context.severity));
    offset += SEVERITY_COUNT;

    set_one_hot(&mut features, offset, DOMAIN_COUNT, domain_index(domain));
    offset += DOMAIN_COUNT;

    let subsystem_bucket = bucket(context.source.as_bytes(), SUBSYSTEM_BUCKETS);
    set_one_hot(&mut features, offset, SUBSYSTEM_BUCKETS, subsystem_bucket);
    offset += SUBSYSTEM_BUCKETS;

    let memory_fraction = context
        .resource_snapshot
        .memory_bytes
        .map_or(0.0, |b| (b as f64 / (1u64 << 32) as f64).min(1.0));
    let cpu_fraction = context
        .resource_snapshot
        .cpu_percent
        .map_or(0.0, |c| f64::from(c) / 100.0);
    features[offset] = memory_fraction;
    features[offset + 1] = cpu_fraction;
    // error rate rides in via telemetry, not carried on ErrorContext itself
    features[offset + 2] = 0.0;
    features[offset + 3] = f64::from(ctx.hour_of_day.min(23)) / 23.0;
    offset += SCALAR_COUNT;

    let path_bucket = ctx
        .file_path_hash
        .map_or(0, |h| h.as_bytes()[0] as usize % PATH_BUCKETS);
    set_one_hot(&mut features, offset, PATH_BUCKETS, path_bucket);
    offset += PATH_BUCKETS;

    let thread_bucket = (ctx.thread_id % THREAD_BUCKETS as u64) as usize;
    set_one_hot(&mut features, offset, THREAD_BUCKETS, thread_bucket);

    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_core::{Category, ResourceSnapshot};

    fn context(severity: Severity) -> ErrorContext {
        ErrorContext {
            id: 0,
            source: "ember-swap".to_string(),
            category: Category::Swap,
            severity,
            timestamp_micros: 0,
            detail: "quiesce timeout".to_string(),
            resource_snapshot: ResourceSnapshot {
                memory_bytes: Some(1 << 31),
                cpu_percent: Some(50.0),
            },
        }
    }

    #[test]
    fn vector_has_declared_width() {
        let ctx = context(Severity::Critical);
        let features = extract(&ctx, FailureDomain::Memory, FeatureContext::default());
        assert_eq!(features.len(), FEATURE_COUNT);
    }

    #[test]
    fn severity_one_hot_is_exclusive() {
        let ctx = context(Severity::Fatal);
        let features = extract(&ctx, FailureDomain::Compile, FeatureContext::default());
        let severity_slice = &features[..SEVERITY_COUNT];
        assert_eq!(severity_slice.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(severity_slice[4], 1.0);
    }

    #[test]
    fn memory_fraction_is_normalized() {
        let ctx = context(Severity::Error);
        let features = extract(&ctx, FailureDomain::Memory, FeatureContext::default());
        let memory_index = SEVERITY_COUNT + DOMAIN_COUNT + SUBSYSTEM_BUCKETS;
        assert!((features[memory_index] - 0.5).abs() < 1e-9);
    }
}
