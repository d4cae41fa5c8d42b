// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The concrete [`Runtime`]: every component wired behind one command
//! dispatch entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ember_build_sched::{Builder, JobSpec, Priority, ResourceBudget};
use ember_cache::BuildCache;
use ember_cas::MemoryTier;
use ember_core::{
    Category, ErrorContext, Hash32, ModuleId, ReportableError, ResourceSnapshot, Severity,
};
use ember_graph::DependencyGraph;
use ember_recovery::{BreakerConfig, FailureDomain, FeatureContext, RecoveryEngine, Strategy};
use ember_state::StateManager;
use ember_swap::{AbortReason, CheckpointStore, RetentionPolicy, SwapCoordinator};
use ember_telemetry::{Aggregator, Analyzer};
use ember_quality::QualityOptimizer;
use tracing::{info, instrument, warn};

use crate::command::{Command, Reply};
use crate::error::RuntimeError;
use crate::registry::ModuleRegistry;

/// A freshly loaded module's agent size in bytes. The line protocol carries
/// no structural metadata, so every module is registered at one fixed
/// shape; a real module-image loader would supply this from the artifact's
/// own metadata instead.
pub const DEFAULT_AGENT_SIZE: u32 = 64;
/// Live agent count a freshly loaded module starts with.
pub const DEFAULT_INITIAL_AGENT_COUNT: u32 = 0;
/// Ceiling on a freshly loaded module's agent count.
pub const DEFAULT_MAX_AGENTS: u32 = 4_096;
/// How long `SWAP_MODULE` waits for in-flight callers to drain before
/// reporting a quiesce timeout.
pub const DEFAULT_QUIESCE_TIMEOUT_MICROS: u64 = 5_000_000;

/// Tunables a caller resolves (from config, CLI flags, or plain defaults)
/// and hands to [`Runtime::new`]. Kept separate from [`Runtime`] itself so
/// construction stays infallible: anything that can fail (parsing a config
/// file, say) happens one layer up, in the daemon.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// CPU/memory budget the build scheduler launches jobs under.
    pub build_budget: ResourceBudget,
    /// Per-job build timeout.
    pub job_timeout: Duration,
    /// Byte budget the build cache evicts against.
    pub cache_max_bytes: usize,
    /// Memory budget telemetry's memory-pressure metric normalizes against.
    pub memory_budget_bytes: u64,
    /// Samples kept per subsystem in the telemetry aggregator.
    pub telemetry_capacity: usize,
    /// Swap outcomes kept in the coordinator's history ring.
    pub swap_history_capacity: usize,
    /// Retention policy for committed checkpoints.
    pub checkpoint_retention: RetentionPolicy,
    /// Quiesce deadline for `SWAP_MODULE`.
    pub quiesce_timeout_micros: u64,
    /// Circuit breaker tunables guarding the `ember-swap` subsystem.
    pub swap_breaker: BreakerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            build_budget: ResourceBudget { cores: 4, memory_gb: 8.0, per_job_memory_gb: 0.5 },
            job_timeout: Duration::from_secs(30),
            cache_max_bytes: 512 * 1024 * 1024,
            memory_budget_bytes: 4u64 * 1024 * 1024 * 1024,
            telemetry_capacity: ember_telemetry::DEFAULT_CAPACITY,
            swap_history_capacity: 256,
            checkpoint_retention: RetentionPolicy::KeepAll,
            quiesce_timeout_micros: DEFAULT_QUIESCE_TIMEOUT_MICROS,
            swap_breaker: BreakerConfig::default(),
        }
    }
}

/// Every component wired together behind the line-protocol command surface.
///
/// Holds two independent [`CheckpointStore`]s over two independent
/// [`MemoryTier`]s: one owned directly by [`Self::checkpoints`] for the
/// standalone `CHECKPOINT`/`ROLLBACK` commands, one owned privately inside
/// [`SwapCoordinator`] for its own automatic pre-swap checkpoints.
/// `SwapCoordinator` exposes no accessor to its internal store, so the two
/// purposes can't share one instance.
pub struct Runtime {
    modules: ModuleRegistry,
    graph: DependencyGraph,
    cache: BuildCache<MemoryTier>,
    scheduler: ember_build_sched::BuildScheduler,
    state: StateManager,
    swap: SwapCoordinator<MemoryTier>,
    checkpoints: CheckpointStore<MemoryTier>,
    telemetry: Aggregator,
    analyzer: Analyzer,
    recovery: RecoveryEngine,
    quality: QualityOptimizer,
    builder: Arc<dyn Builder>,
    quiesce_timeout_micros: u64,
}

impl Runtime {
    /// Wires every component from `config`, driving builds through
    /// `builder` (the opaque compiler-driver seam).
    #[must_use]
    pub fn new(config: RuntimeConfig, builder: Arc<dyn Builder>) -> Self {
        let mut recovery = RecoveryEngine::new();
        recovery.configure_breaker("ember-swap", config.swap_breaker);
        Self {
            modules: ModuleRegistry::new(),
            graph: DependencyGraph::new(),
            cache: BuildCache::new(MemoryTier::new(), config.cache_max_bytes),
            scheduler: ember_build_sched::BuildScheduler::new(
                config.build_budget,
                config.job_timeout,
            ),
            state: StateManager::new(),
            swap: SwapCoordinator::new(
                CheckpointStore::new(MemoryTier::new(), config.checkpoint_retention),
                config.swap_history_capacity,
            ),
            checkpoints: CheckpointStore::new(MemoryTier::new(), config.checkpoint_retention),
            telemetry: Aggregator::new(config.telemetry_capacity, config.memory_budget_bytes),
            analyzer: Analyzer::new(),
            recovery,
            quality: QualityOptimizer::new(ember_quality::QualityConfig::default()),
            builder,
            quiesce_timeout_micros: config.quiesce_timeout_micros,
        }
    }

    /// Parses and executes one command line, returning the single reply
    /// line to write back to the caller.
    #[instrument(skip(self, line), fields(now_micros))]
    pub async fn dispatch(&mut self, line: &str, now_micros: u64) -> String {
        let command = match line.trim().parse::<Command>() {
            Ok(command) => command,
            Err(err) => return Reply::err(Category::Internal, err.to_string()).to_string(),
        };

        match command {
            Command::LoadModule { name } => self.load_module(&name),
            Command::UnloadModule { name } => self.unload_module(&name),
            Command::SwapModule { name, artifact_path } => {
                self.swap_module(&name, &artifact_path, now_micros).await
            }
            Command::Checkpoint { module, name } => self.checkpoint(&module, &name),
            Command::Rollback { module, name } => self.rollback(&module, &name, now_micros),
            Command::Build { path } => self.build(&path, now_micros).await,
            Command::Status => self.status(),
            Command::Heartbeat { timestamp_micros } => {
                Reply::ok(format!("alive at {timestamp_micros}"))
            }
        }
        .to_string()
    }

    fn load_module(&mut self, name: &str) -> Reply {
        if self.modules.id_of(name).is_some() {
            return self.fail("runtime", RuntimeError::AlreadyLoaded(name.to_string()), 0);
        }
        let Some(id) = self.modules.load(name) else {
            return self.fail("runtime", RuntimeError::AlreadyLoaded(name.to_string()), 0);
        };
        if let Err(err) = self.state.register(
            id,
            name,
            DEFAULT_AGENT_SIZE,
            DEFAULT_INITIAL_AGENT_COUNT,
            DEFAULT_MAX_AGENTS,
        ) {
            return self.fail("ember-state", RuntimeError::from(err), 0);
        }
        // The line protocol carries no dependency edges, so each module is
        // registered with itself as its only source, keyed by name; `BUILD
        // <path>` only ever finds a module this way if the caller names
        // paths to match.
        let content_hash = Hash32::of(name.as_bytes());
        if let Err(err) =
            self.graph.add_module(id, vec![PathBuf::from(name)], vec![], content_hash)
        {
            return self.fail("ember-graph", RuntimeError::from(err), 0);
        }
        info!(module = %id, name, content_hash = %content_hash, "module loaded");
        Reply::ok(format!("{name} loaded as {id}"))
    }

    fn unload_module(&mut self, name: &str) -> Reply {
        match self.modules.deactivate(name) {
            Some(id) => {
                info!(module = %id, name, "module unloaded");
                Reply::ok(format!("{name} unloaded"))
            }
            None => self.fail("runtime", RuntimeError::NotLoaded(name.to_string()), 0),
        }
    }

    #[instrument(skip(self), fields(module = name))]
    async fn swap_module(&mut self, name: &str, artifact_path: &Path, now_micros: u64) -> Reply {
        let Some(id) = self.modules.id_of(name) else {
            return self.fail("runtime", RuntimeError::NotLoaded(name.to_string()), now_micros);
        };
        if let Err(err) = self.recovery.check_breaker("ember-swap", now_micros) {
            warn!(module = %id, "swap refused, ember-swap breaker open");
            return Reply::err(Category::CircuitOpen, err.to_string());
        }
        if let Err(source) = tokio::fs::metadata(artifact_path).await {
            return self.fail(
                "ember-swap",
                RuntimeError::ArtifactUnreadable { path: artifact_path.to_path_buf(), source },
                now_micros,
            );
        }

        let Some((active, hot_swappable, previous_version)) =
            self.modules.entry(id).map(|entry| (entry.active, entry.hot_swappable, entry.version))
        else {
            return self.fail("runtime", RuntimeError::NotLoaded(name.to_string()), now_micros);
        };

        let quiesce_timeout = self.quiesce_timeout_micros;
        let outcome =
            self.run_swap(id, active, hot_swappable, previous_version, now_micros, quiesce_timeout);
        match outcome {
            Ok(new_version) => {
                self.modules.set_version(id, new_version);
                self.recovery.record_breaker_success("ember-swap", now_micros);
                Reply::ok(format!("{name} swapped to v{new_version}"))
            }
            Err(err) => self.fail("ember-swap", err, now_micros),
        }
    }

    /// Drives the full `Prepare -> ... -> Commit` state machine for one
    /// swap, aborting (and restoring the pre-swap checkpoint) on the first
    /// failing step.
    #[allow(clippy::too_many_arguments)]
    fn run_swap(
        &mut self,
        module: ModuleId,
        active: bool,
        hot_swappable: bool,
        previous_version: u32,
        now_micros: u64,
        quiesce_timeout_micros: u64,
    ) -> Result<u32, RuntimeError> {
        self.swap.prepare(module, active, hot_swappable, now_micros)?;
        self.swap.begin_quiesce(module, now_micros, quiesce_timeout_micros)?;

        // No in-flight-caller tracking infrastructure exists in this
        // workspace; every swap quiesces against zero callers.
        match self.swap.poll_quiesce(module, 0, now_micros) {
            Ok(true) => {}
            Ok(false) => unreachable!("zero in-flight callers always quiesce immediately"),
            Err(err) => {
                return self.abort_and_report(module, AbortReason::QuiesceTimeout, now_micros, err)
            }
        }

        if let Err(err) = self.swap.snapshot_take(module, &self.state) {
            return self.abort_and_report(module, AbortReason::SnapshotFailed, now_micros, err);
        }

        // No module-image metadata is available from this workspace's
        // loader seam, so every swap is treated as a same-schema swap.
        let swap_result = self.swap.artifact_swap(module, previous_version, previous_version);
        let needs_transform = match swap_result {
            Ok(needs_transform) => needs_transform,
            Err(err) => {
                return self.abort_and_report(module, AbortReason::ValidationFailed, now_micros, err)
            }
        };
        if needs_transform {
            self.swap.state_transform_done(module)?;
        }

        let report = self.state.validate_module(module)?;
        if let Err(err) = self.swap.validate(module, report.is_clean()) {
            return self.abort_and_report(module, AbortReason::ValidationFailed, now_micros, err);
        }

        let new_version = self.swap.activate(module, previous_version)?;
        self.swap.commit(module, now_micros)?;
        Ok(new_version)
    }

    fn abort_and_report(
        &mut self,
        module: ModuleId,
        reason: AbortReason,
        now_micros: u64,
        err: ember_swap::SwapError,
    ) -> Result<u32, RuntimeError> {
        if let Err(abort_err) = self.swap.abort(module, &self.state, reason, now_micros) {
            warn!(module = %module, error = %abort_err, "swap abort itself failed");
        }
        Err(RuntimeError::from(err))
    }

    fn checkpoint(&mut self, module: &str, name: &str) -> Reply {
        let Some(id) = self.modules.id_of(module) else {
            return self.fail("runtime", RuntimeError::NotLoaded(module.to_string()), 0);
        };
        let snapshot = match self.state.snapshot(id) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.fail("ember-state", RuntimeError::from(err), 0),
        };
        match self.checkpoints.create(name, &snapshot) {
            Ok(()) => Reply::ok(format!("checkpoint {name:?} taken for {module}")),
            Err(err) => self.fail("ember-swap", RuntimeError::from(err), 0),
        }
    }

    fn rollback(&mut self, module: &str, name: &str, now_micros: u64) -> Reply {
        let Some(id) = self.modules.id_of(module) else {
            return self.fail("runtime", RuntimeError::NotLoaded(module.to_string()), now_micros);
        };
        let snapshot = match self.checkpoints.restore(id, name) {
            Ok(snapshot) => snapshot,
            Err(err) => return self.fail("ember-swap", RuntimeError::from(err), now_micros),
        };
        match self.state.restore_snapshot(&snapshot, now_micros) {
            Ok(()) => Reply::ok(format!("{module} rolled back to {name:?}")),
            Err(err) => self.fail("ember-state", RuntimeError::from(err), now_micros),
        }
    }

    async fn build(&mut self, path: &Path, now_micros: u64) -> Reply {
        self.cache.invalidate_source(path);
        let rebuild_set = self.graph.compute_rebuild_set(path);
        if rebuild_set.is_empty() {
            return Reply::ok(format!("{} affects no registered module", path.display()));
        }

        let jobs: Vec<JobSpec> = rebuild_set
            .iter()
            .map(|&module| JobSpec {
                module,
                deps: self.graph.deps_of(module).to_vec(),
                estimated_build_time: Duration::ZERO,
                priority: Priority::Normal,
            })
            .collect();

        let job_count = rebuild_set.len();
        let report = self.scheduler.run(jobs, Arc::clone(&self.builder)).await;
        for &module in &report.failed {
            self.report_build_failure(module, now_micros);
        }
        self.record_build_telemetry(job_count, report.failed.len(), now_micros);
        Reply::ok(format!(
            "build: {} completed, {} failed, {} skipped",
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        ))
    }

    /// Feeds the build pass into telemetry and, through the bottleneck
    /// analyzer, into the quality optimizer, the same pressure-driven path
    /// an adaptive-quality loop runs off a frame-time counter, just fed by
    /// the build subsystem's own error rate instead.
    fn record_build_telemetry(&mut self, job_count: usize, failed: usize, now_micros: u64) {
        let error_rate = if job_count == 0 { 0.0 } else { failed as f64 / job_count as f64 };
        self.telemetry.record(
            "build",
            ember_telemetry::TelemetrySample {
                timestamp_micros: now_micros,
                cpu_percent: 0.0,
                gpu_percent: 0.0,
                memory_bytes: 0,
                latency_micros: 0,
                throughput: job_count as f64,
                error_rate,
                frame_time_micros: 0,
                fps: 0.0,
            },
        );
        if let Ok(bottleneck) = self.analyzer.bottleneck(&self.telemetry, "build") {
            self.quality.evaluate("build", bottleneck.pressure);
        }
    }

    fn report_build_failure(&mut self, module: ModuleId, now_micros: u64) {
        let context = ErrorContext {
            id: 0,
            source: "ember-build-sched".to_string(),
            category: Category::Compile,
            severity: Severity::Error,
            timestamp_micros: now_micros,
            detail: format!("{module} failed to build"),
            resource_snapshot: ResourceSnapshot::default(),
        };
        self.report(context, FailureDomain::Compile, now_micros);
    }

    fn status(&self) -> Reply {
        Reply::ok(format!(
            "modules={} active={} cache_entries={} cache_bytes={} model_accuracy={:.3}",
            self.modules.len(),
            self.modules.active_names().count(),
            self.cache.len(),
            self.cache.total_bytes(),
            self.recovery.model_accuracy(),
        ))
    }

    fn fail(&mut self, source: &str, err: RuntimeError, now_micros: u64) -> Reply {
        let reply = Reply::err(err.category(), err.to_string());
        let domain = failure_domain(&err);
        let context = ErrorContext {
            id: 0,
            source: source.to_string(),
            category: err.category(),
            severity: err.severity(),
            timestamp_micros: now_micros,
            detail: err.to_string(),
            resource_snapshot: ResourceSnapshot::default(),
        };
        self.report(context, domain, now_micros);
        reply
    }

    /// Posts `context` to the recovery engine, immediately closes out the
    /// outcome as "not prevented" (the runtime has no separate signal for
    /// whether a chosen strategy later succeeded, so every reported failure
    /// counts against its subsystem's breaker as it happens), and if the
    /// decision is `ScaleDown`, forwards it straight to the quality
    /// optimizer: an instruction to step down a tier, not a suggestion to
    /// consider one.
    fn report(&mut self, context: ErrorContext, domain: FailureDomain, now_micros: u64) {
        let source = context.source.clone();
        match self.recovery.report(context, domain, FeatureContext::default(), now_micros) {
            Ok(decision) => {
                let strategy = decision.strategy;
                let confidence = decision.model_confidence;
                info!(?strategy, confidence, "recovery decision");
                if let Err(err) = self.recovery.report_outcome(decision.error_id, false, now_micros)
                {
                    warn!(error = %err, "failed to record recovery outcome");
                }
                if decision.strategy == Strategy::ScaleDown {
                    self.quality.force_step_down(&source);
                }
            }
            Err(err) => warn!(error = %err, "recovery engine refused the report"),
        }
    }
}

/// Local error-to-domain classification for posting a [`RuntimeError`] to
/// the recovery engine. Distinct from [`ReportableError::category`]: the
/// recovery rule table branches on [`FailureDomain`], a coarser vocabulary
/// this crate's errors don't carry natively.
fn failure_domain(err: &RuntimeError) -> FailureDomain {
    match err {
        RuntimeError::ArtifactUnreadable { .. } => FailureDomain::Io,
        RuntimeError::State(_) => FailureDomain::Memory,
        RuntimeError::AlreadyLoaded(_)
        | RuntimeError::NotLoaded(_)
        | RuntimeError::Graph(_)
        | RuntimeError::Swap(_)
        | RuntimeError::Recovery(_) => FailureDomain::Runtime,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ember_build_sched::BuildOutcome;

    struct AlwaysSucceeds;

    #[async_trait::async_trait]
    impl Builder for AlwaysSucceeds {
        async fn build(&self, _module: ModuleId) -> BuildOutcome {
            BuildOutcome { success: true, message: None, time_ns: 1 }
        }
    }

    fn runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default(), Arc::new(AlwaysSucceeds))
    }

    #[tokio::test]
    async fn load_then_status_reports_it_active() {
        let mut rt = runtime();
        let reply = rt.dispatch("LOAD_MODULE traffic", 0).await;
        assert!(reply.starts_with("OK"), "{reply}");
        let status = rt.dispatch("STATUS", 0).await;
        assert!(status.contains("modules=1"), "{status}");
        assert!(status.contains("active=1"), "{status}");
    }

    #[tokio::test]
    async fn loading_twice_fails() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        let reply = rt.dispatch("LOAD_MODULE traffic", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }

    #[tokio::test]
    async fn unload_then_status_reports_it_inactive() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        rt.dispatch("UNLOAD_MODULE traffic", 0).await;
        let status = rt.dispatch("STATUS", 0).await;
        assert!(status.contains("modules=1"), "{status}");
        assert!(status.contains("active=0"), "{status}");
    }

    #[tokio::test]
    async fn unloading_unknown_module_fails() {
        let mut rt = runtime();
        let reply = rt.dispatch("UNLOAD_MODULE ghost", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }

    #[tokio::test]
    async fn checkpoint_then_rollback_round_trips() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        let reply = rt.dispatch("CHECKPOINT traffic snap-0", 0).await;
        assert!(reply.starts_with("OK"), "{reply}");
        let reply = rt.dispatch("ROLLBACK traffic snap-0", 1).await;
        assert!(reply.starts_with("OK"), "{reply}");
    }

    #[tokio::test]
    async fn rollback_without_checkpoint_fails() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        let reply = rt.dispatch("ROLLBACK traffic nope", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }

    #[tokio::test]
    async fn swap_on_unknown_module_fails() {
        let mut rt = runtime();
        let reply = rt.dispatch("SWAP_MODULE ghost /tmp/nope.so", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }

    #[tokio::test]
    async fn swap_with_missing_artifact_fails() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        let reply = rt.dispatch("SWAP_MODULE traffic /nonexistent/path.so", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }

    #[tokio::test]
    async fn build_on_unregistered_path_reports_no_effect() {
        let mut rt = runtime();
        let reply = rt.dispatch("BUILD /nowhere.rs", 0).await;
        assert_eq!(reply, "OK /nowhere.rs affects no registered module");
    }

    #[tokio::test]
    async fn build_on_loaded_module_path_runs_the_scheduler() {
        let mut rt = runtime();
        rt.dispatch("LOAD_MODULE traffic", 0).await;
        let reply = rt.dispatch("BUILD traffic", 0).await;
        assert_eq!(reply, "OK build: 1 completed, 0 failed, 0 skipped");
    }

    #[tokio::test]
    async fn heartbeat_always_succeeds() {
        let mut rt = runtime();
        let reply = rt.dispatch("HEARTBEAT 100", 0).await;
        assert_eq!(reply, "OK alive at 100");
    }

    #[tokio::test]
    async fn malformed_command_is_rejected() {
        let mut rt = runtime();
        let reply = rt.dispatch("NONSENSE", 0).await;
        assert!(reply.starts_with("ERR"), "{reply}");
    }
}
