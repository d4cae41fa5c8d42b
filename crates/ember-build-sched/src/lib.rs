// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Build scheduler: topological, budget-aware job placement.
//!
//! Takes a topologically ordered rebuild set (as produced by `ember-graph`)
//! and assigns modules to parallel job slots under a CPU/memory budget. At
//! each step the ready set is every pending module whose dependencies have
//! already built (or were cache hits); `min(ready, free_slots)` jobs launch,
//! with critical-priority modules preempting lower-priority ones when slots
//! are scarce. A failed module's dependents are skipped rather than stalling
//! unrelated subtrees.

#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use ember_core::ModuleId;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Relative scheduling priority of a build job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    /// Ordinary priority; yields slots to `Critical` jobs when scarce.
    Normal,
    /// Preempts `Normal` jobs for a free slot (non-preemptive once running).
    Critical,
}

/// One module's place in a build run: its dependencies, priority, and the
/// time the caller estimates it will take.
#[derive(Clone, Debug)]
pub struct JobSpec {
    /// The module to build.
    pub module: ModuleId,
    /// Modules that must finish (or already be cache hits) before this one
    /// is ready.
    pub deps: Vec<ModuleId>,
    /// Caller's estimate, used only for logging/telemetry — the ready-set
    /// loop itself schedules by dependency readiness, not by estimate.
    pub estimated_build_time: Duration,
    /// Scheduling priority.
    pub priority: Priority,
}

/// Outcome of compiling a single module: the opaque result of the external
/// compiler driver.
#[derive(Clone, Debug)]
pub struct BuildOutcome {
    /// Whether the build succeeded.
    pub success: bool,
    /// Failure message, populated only when `success` is `false`.
    pub message: Option<String>,
    /// Wall-clock build time in nanoseconds.
    pub time_ns: u64,
}

/// Builds one module. Implementations wrap the opaque compiler driver;
/// modules that are already cache hits should still implement this (the
/// scheduler calls it for every module in the rebuild set) and return
/// immediately with a zero-cost success.
#[async_trait::async_trait]
pub trait Builder: Send + Sync + 'static {
    /// Compiles `module`, returning its outcome.
    async fn build(&self, module: ModuleId) -> BuildOutcome;
}

/// CPU/memory budget the scheduler launches jobs under.
#[derive(Clone, Copy, Debug)]
pub struct ResourceBudget {
    /// Available CPU cores.
    pub cores: usize,
    /// Available memory, in gibibytes.
    pub memory_gb: f64,
    /// Estimated memory cost of one job, in gibibytes.
    pub per_job_memory_gb: f64,
}

impl ResourceBudget {
    /// `min(cores, memory_gb / per_job_memory_gb)`, floored and at least 1.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        if self.per_job_memory_gb <= 0.0 {
            return self.cores.max(1);
        }
        let memory_slots = (self.memory_gb / self.per_job_memory_gb).floor() as usize;
        self.cores.min(memory_slots).max(1)
    }
}

/// Result of running a full build pass over a rebuild set.
#[derive(Clone, Debug, Default)]
pub struct BuildReport {
    /// Modules that built successfully.
    pub completed: Vec<ModuleId>,
    /// Modules whose build failed or timed out.
    pub failed: Vec<ModuleId>,
    /// Modules skipped because a dependency failed.
    pub skipped: Vec<ModuleId>,
}

/// Assigns a rebuild set to parallel job slots and drives it to completion.
pub struct BuildScheduler {
    budget: ResourceBudget,
    job_timeout: Duration,
}

impl BuildScheduler {
    /// Creates a scheduler with the given budget and per-job timeout.
    #[must_use]
    pub fn new(budget: ResourceBudget, job_timeout: Duration) -> Self {
        Self {
            budget,
            job_timeout,
        }
    }

    /// Runs `jobs` to completion against `builder`.
    ///
    /// A job that exceeds `job_timeout` is recorded as failed; its
    /// dependents are skipped, but unrelated subtrees continue running.
    #[instrument(skip(self, jobs, builder), fields(job_count = jobs.len()))]
    pub async fn run(&self, jobs: Vec<JobSpec>, builder: Arc<dyn Builder>) -> BuildReport {
        let slots = self.budget.slot_count();
        info!(slots, "starting build pass");

        let mut pending: HashMap<ModuleId, JobSpec> =
            jobs.into_iter().map(|j| (j.module, j)).collect();
        let mut done: HashSet<ModuleId> = HashSet::new();
        let mut failed: HashSet<ModuleId> = HashSet::new();
        let mut skipped: HashSet<ModuleId> = HashSet::new();
        let mut running: HashSet<ModuleId> = HashSet::new();

        let mut in_flight: JoinSet<(ModuleId, BuildOutcome)> = JoinSet::new();

        loop {
            self.skip_modules_with_failed_deps(&mut pending, &failed, &mut skipped);

            let ready = self.ready_modules(&pending, &done);
            let free_slots = slots.saturating_sub(running.len());
            for module in ready.into_iter().take(free_slots) {
                let Some(job) = pending.remove(&module) else {
                    continue;
                };
                running.insert(module);
                let builder = Arc::clone(&builder);
                let timeout = self.job_timeout;
                info!(module = %job.module, priority = ?job.priority, "launching build job");
                in_flight.spawn(async move {
                    let outcome = match tokio::time::timeout(timeout, builder.build(module)).await {
                        Ok(outcome) => outcome,
                        Err(_) => BuildOutcome {
                            success: false,
                            message: Some("build timed out".to_string()),
                            time_ns: timeout.as_nanos() as u64,
                        },
                    };
                    (module, outcome)
                });
            }

            if pending.is_empty() && running.is_empty() {
                break;
            }

            let Some(joined) = in_flight.join_next().await else {
                // No in-flight jobs and nothing became ready: a dependency
                // cycle slipped past the graph layer, or every remaining
                // module is blocked on something that will never complete.
                warn!(remaining = pending.len(), "build pass stalled with no ready modules");
                break;
            };
            let (module, outcome) = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(error = %join_err, "build task panicked");
                    continue;
                }
            };
            running.remove(&module);
            if outcome.success {
                info!(module = %module, time_ns = outcome.time_ns, "build succeeded");
                done.insert(module);
            } else {
                warn!(module = %module, message = ?outcome.message, "build failed");
                failed.insert(module);
            }
        }

        BuildReport {
            completed: done.into_iter().collect(),
            failed: failed.into_iter().collect(),
            skipped: skipped.into_iter().collect(),
        }
    }

    fn ready_modules(
        &self,
        pending: &HashMap<ModuleId, JobSpec>,
        done: &HashSet<ModuleId>,
    ) -> Vec<ModuleId> {
        let mut ready: Vec<ModuleId> = pending
            .iter()
            .filter(|(_, job)| job.deps.iter().all(|d| done.contains(d)))
            .map(|(id, _)| *id)
            .collect();
        ready.sort_unstable_by(|a, b| {
            let pa = pending.get(a).map_or(Priority::Normal, |j| j.priority);
            let pb = pending.get(b).map_or(Priority::Normal, |j| j.priority);
            pb.cmp(&pa).then(a.0.cmp(&b.0))
        });
        ready
    }

    fn skip_modules_with_failed_deps(
        &self,
        pending: &mut HashMap<ModuleId, JobSpec>,
        failed: &HashSet<ModuleId>,
        skipped: &mut HashSet<ModuleId>,
    ) {
        let newly_skipped: Vec<ModuleId> = pending
            .iter()
            .filter(|(_, job)| {
                job.deps
                    .iter()
                    .any(|d| failed.contains(d) || skipped.contains(d))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in newly_skipped {
            pending.remove(&id);
            skipped.insert(id);
            warn!(module = %id, "skipping module: dependency failed");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct AlwaysSucceeds;

    #[async_trait::async_trait]
    impl Builder for AlwaysSucceeds {
        async fn build(&self, _module: ModuleId) -> BuildOutcome {
            BuildOutcome {
                success: true,
                message: None,
                time_ns: 1,
            }
        }
    }

    struct FailsOne(ModuleId);

    #[async_trait::async_trait]
    impl Builder for FailsOne {
        async fn build(&self, module: ModuleId) -> BuildOutcome {
            if module == self.0 {
                BuildOutcome {
                    success: false,
                    message: Some("boom".to_string()),
                    time_ns: 1,
                }
            } else {
                BuildOutcome {
                    success: true,
                    message: None,
                    time_ns: 1,
                }
            }
        }
    }

    fn budget() -> ResourceBudget {
        ResourceBudget {
            cores: 4,
            memory_gb: 16.0,
            per_job_memory_gb: 1.0,
        }
    }

    #[tokio::test]
    async fn all_jobs_complete_with_no_dependencies() {
        let scheduler = BuildScheduler::new(budget(), Duration::from_secs(5));
        let jobs = vec![
            JobSpec {
                module: ModuleId(1),
                deps: vec![],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
            JobSpec {
                module: ModuleId(2),
                deps: vec![],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
        ];
        let report = scheduler.run(jobs, Arc::new(AlwaysSucceeds)).await;
        assert_eq!(report.completed.len(), 2);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_empty());
    }

    #[tokio::test]
    async fn dependent_waits_for_dependency() {
        let scheduler = BuildScheduler::new(budget(), Duration::from_secs(5));
        let jobs = vec![
            JobSpec {
                module: ModuleId(1),
                deps: vec![],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
            JobSpec {
                module: ModuleId(2),
                deps: vec![ModuleId(1)],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
        ];
        let report = scheduler.run(jobs, Arc::new(AlwaysSucceeds)).await;
        assert_eq!(report.completed.len(), 2);
    }

    #[tokio::test]
    async fn failed_module_skips_its_dependents_but_not_unrelated_subtrees() {
        let scheduler = BuildScheduler::new(budget(), Duration::from_secs(5));
        let jobs = vec![
            JobSpec {
                module: ModuleId(1),
                deps: vec![],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
            JobSpec {
                module: ModuleId(2),
                deps: vec![ModuleId(1)],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
            JobSpec {
                module: ModuleId(3),
                deps: vec![],
                estimated_build_time: Duration::from_millis(1),
                priority: Priority::Normal,
            },
        ];
        let report = scheduler
            .run(jobs, Arc::new(FailsOne(ModuleId(1))))
            .await;
        assert!(report.failed.contains(&ModuleId(1)));
        assert!(report.skipped.contains(&ModuleId(2)));
        assert!(report.completed.contains(&ModuleId(3)));
    }

    #[tokio::test]
    async fn job_exceeding_timeout_is_recorded_as_failed() {
        struct NeverFinishes;
        #[async_trait::async_trait]
        impl Builder for NeverFinishes {
            async fn build(&self, _module: ModuleId) -> BuildOutcome {
                tokio::time::sleep(Duration::from_secs(60)).await;
                BuildOutcome {
                    success: true,
                    message: None,
                    time_ns: 0,
                }
            }
        }
        let scheduler = BuildScheduler::new(budget(), Duration::from_millis(10));
        let jobs = vec![JobSpec {
            module: ModuleId(1),
            deps: vec![],
            estimated_build_time: Duration::from_millis(1),
            priority: Priority::Normal,
        }];
        let report = scheduler.run(jobs, Arc::new(NeverFinishes)).await;
        assert!(report.failed.contains(&ModuleId(1)));
    }

    #[test]
    fn slot_count_respects_both_cpu_and_memory() {
        let b = ResourceBudget {
            cores: 8,
            memory_gb: 4.0,
            per_job_memory_gb: 2.0,
        };
        assert_eq!(b.slot_count(), 2);
    }

    #[test]
    fn slot_count_is_at_least_one() {
        let b = ResourceBudget {
            cores: 8,
            memory_gb: 0.1,
            per_job_memory_gb: 2.0,
        };
        assert_eq!(b.slot_count(), 1);
    }
}
