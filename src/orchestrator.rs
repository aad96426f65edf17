//! Deployment orchestrator.
//!
//! Drives a run through its phases: planning, applying wave by wave, and
//! persisting; or, for teardown, removing recorded instances in reverse
//! dependency order. State is written after every instance so an
//! interrupted run leaves an accurate record behind.

use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterRegistry, ResourceAdapter};
use crate::config::{ConfigHasher, DeployConfig};
use crate::error::{ProvisionError, Result, StateError, StratumError};
use crate::planner::{
    DependencyGraph, DeploymentInstance, DeploymentOutputs, DeploymentPlan, DiffType, OutputSet,
    generate_resource_id,
};
use crate::state::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, InstanceState, LockInfo, StateStore,
    generate_holder_id,
};

/// Default per-call deadline for adapter operations.
pub const DEFAULT_DEADLINE_SECS: u64 = 300;

/// Floor on the interval between lock renewals.
const MIN_RENEW_INTERVAL_MS: u64 = 10;

/// Phases of a run, used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Resolving configuration and building the instance graph.
    Planning,
    /// Applying instances wave by wave.
    Applying,
    /// Writing the final state record.
    Persisting,
    /// Removing instances in reverse order.
    RemovingReverse,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// User-facing outputs of the deployment.
    pub outputs: DeploymentOutputs,
    /// Instances applied, in completion order.
    pub applied: Vec<String>,
    /// One-line summary of what the plan changed.
    pub summary: String,
    /// State as persisted at the end of the run.
    #[serde(skip)]
    pub state: DeploymentState,
}

/// Result of a complete teardown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RemoveReport {
    /// Instances removed, in completion order.
    pub removed: Vec<String>,
    /// Instances left in place because a dependent could not be removed.
    pub skipped: Vec<String>,
}

/// Runs deployments against a state store and a set of adapters.
pub struct Orchestrator<S: StateStore> {
    store: S,
    adapters: AdapterRegistry,
    hasher: ConfigHasher,
    account: Option<String>,
    sequential: bool,
    deadline: Duration,
    holder: String,
}

impl<S: StateStore> Orchestrator<S> {
    /// Creates an orchestrator with concurrent waves and the default deadline.
    #[must_use]
    pub fn new(store: S, adapters: AdapterRegistry) -> Self {
        Self {
            store,
            adapters,
            hasher: ConfigHasher::new(),
            account: None,
            sequential: false,
            deadline: Duration::from_secs(DEFAULT_DEADLINE_SECS),
            holder: generate_holder_id(),
        }
    }

    /// Sets the account id used to derive the default topic.
    #[must_use]
    pub fn with_account(mut self, account: Option<String>) -> Self {
        self.account = account;
        self
    }

    /// Applies instances one at a time instead of concurrently within a wave.
    #[must_use]
    pub const fn with_sequential(mut self, sequential: bool) -> Self {
        self.sequential = sequential;
        self
    }

    /// Sets the deadline of each adapter call.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the lock holder identifier.
    #[must_use]
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Returns the state store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Plans a deployment without touching any remote resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or the plan is invalid.
    pub async fn plan(&self, config: &DeployConfig) -> Result<DeploymentPlan> {
        info!("{} '{}'", RunPhase::Planning, config.name);
        let state = self.store.load(&config.name).await?;
        DeploymentPlan::prepare(config, &state, self.account.as_deref())
    }

    /// Returns the recorded outputs of a deployment, if it has been applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded.
    pub async fn outputs(&self, deployment: &str) -> Result<Option<DeploymentOutputs>> {
        Ok(self.store.load(deployment).await?.deployment_outputs())
    }

    /// Creates or updates every instance of the deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error before any remote call if the plan is
    /// invalid, or the first provisioning error of the failing wave.
    pub async fn apply(&self, config: &DeployConfig) -> Result<ApplyReport> {
        self.apply_with(config, |state| {
            DeploymentPlan::prepare(config, state, self.account.as_deref())
        })
        .await
    }

    /// Applies an arbitrary instance set under the deployment's name.
    ///
    /// # Errors
    ///
    /// Same as [`Orchestrator::apply`].
    pub async fn apply_instances(
        &self,
        config: &DeployConfig,
        instances: Vec<DeploymentInstance>,
    ) -> Result<ApplyReport> {
        self.apply_with(config, move |state| {
            let resource_id = state.resource_id.clone().unwrap_or_else(generate_resource_id);
            DeploymentPlan::from_instances(config, state, &resource_id, instances)
        })
        .await
    }

    /// Removes every recorded instance of a deployment.
    ///
    /// Removal is best effort: failures are collected and the remaining
    /// instances are still attempted.
    ///
    /// # Errors
    ///
    /// Returns [`StratumError::TeardownFailed`] listing every failed removal,
    /// or a state error if the record cannot be read or written.
    pub async fn remove(&self, deployment: &str) -> Result<RemoveReport> {
        self.locked(deployment, DeploymentOperation::Remove, self.run_remove(deployment))
            .await
    }

    async fn apply_with<P>(&self, config: &DeployConfig, plan: P) -> Result<ApplyReport>
    where
        P: FnOnce(&DeploymentState) -> Result<DeploymentPlan>,
    {
        self.locked(&config.name, DeploymentOperation::Apply, self.run_apply(config, plan))
            .await
    }

    /// Runs `run` while holding the deployment's lock, renewing it until
    /// `run` finishes.
    async fn locked<T, F>(&self, deployment: &str, operation: DeploymentOperation, run: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let lock = self
            .store
            .acquire_lock(deployment, &self.holder, &operation.to_string())
            .await?;

        let (stop, stopped) = oneshot::channel::<()>();
        let run = async move {
            let result = run.await;
            drop(stop);
            result
        };
        let (result, kept) = tokio::join!(run, self.keep_alive(deployment, &lock, stopped));

        self.release(deployment, &lock).await;
        match (result, kept) {
            (Ok(_), Err(lost)) => Err(lost),
            (result, _) => result,
        }
    }

    /// Renews the lock every third of its lifetime until `stopped` fires.
    async fn keep_alive(&self, deployment: &str, lock: &LockInfo, mut stopped: oneshot::Receiver<()>) -> Result<()> {
        let interval = (self.store.lock_ttl() / 3).max(Duration::from_millis(MIN_RENEW_INTERVAL_MS));
        loop {
            tokio::select! {
                _ = &mut stopped => return Ok(()),
                () = tokio::time::sleep(interval) => {}
            }

            match self.store.refresh_lock(deployment, &lock.lock_id).await {
                Ok(renewed) => debug!("Lock on '{deployment}' held until {}", renewed.expires_at),
                Err(e @ StratumError::State(StateError::LockLost { .. })) => {
                    error!("Lost the lock on '{deployment}' while the run was in progress");
                    return Err(e);
                }
                Err(e) => warn!("Failed to renew lock {} on '{deployment}': {e}", lock.lock_id),
            }
        }
    }

    async fn release(&self, deployment: &str, lock: &LockInfo) {
        if let Err(e) = self.store.release_lock(deployment, &lock.lock_id).await {
            warn!("Failed to release lock {} on '{deployment}': {e}", lock.lock_id);
        }
    }

    async fn run_apply<P>(&self, config: &DeployConfig, plan: P) -> Result<ApplyReport>
    where
        P: FnOnce(&DeploymentState) -> Result<DeploymentPlan>,
    {
        info!("{} '{}'", RunPhase::Planning, config.name);
        let mut state = self.store.load(&config.name).await?;
        let plan = plan(&state)?;
        info!("Plan for '{}': {}", plan.deployment, plan.summary());

        for orphan in plan.diff.diffs.iter().filter(|d| d.diff_type == DiffType::Orphan) {
            warn!("Instance '{}' is recorded but no longer declared; leaving it in state", orphan.name);
        }

        state.resource_id = Some(plan.resource_id.clone());
        state.region = Some(config.region.clone());
        let state = Mutex::new(state);

        let mut produced: BTreeMap<String, OutputSet> = BTreeMap::new();
        let mut applied: Vec<String> = Vec::new();
        let waves = plan.graph.waves();

        for (wave_index, wave) in waves.iter().enumerate() {
            info!(
                "{} wave {}/{}: {}",
                RunPhase::Applying,
                wave_index + 1,
                waves.len(),
                wave.iter().map(|&i| plan.graph.name(i)).collect::<Vec<_>>().join(", ")
            );

            let results = if self.sequential {
                let mut results = Vec::with_capacity(wave.len());
                for &index in wave {
                    let result = self.apply_instance(&plan, index, &produced, &state).await;
                    let failed = result.is_err();
                    results.push((index, result));
                    if failed {
                        break;
                    }
                }
                results
            } else {
                let runs = wave.iter().map(|&index| {
                    let produced = &produced;
                    let state = &state;
                    let plan = &plan;
                    async move { (index, self.apply_instance(plan, index, produced, state).await) }
                });
                join_all(runs).await
            };

            let mut failure: Option<StratumError> = None;
            for (index, result) in results {
                let name = plan.instances[index].name.clone();
                match result {
                    Ok(outputs) => {
                        produced.insert(name.clone(), outputs);
                        applied.push(name);
                    }
                    Err(e) => {
                        error!("Failed to apply '{name}': {e}");
                        failure.get_or_insert(e);
                    }
                }
            }

            if let Some(err) = failure {
                warn!(
                    "Stopping after wave {}; {} later wave(s) not attempted",
                    wave_index + 1,
                    waves.len() - wave_index - 1
                );
                let mut state = state.into_inner();
                state.add_history(DeploymentHistoryEntry::failed(
                    DeploymentOperation::Apply,
                    &plan.config_hash,
                    applied,
                    err.to_string(),
                ));
                if let Err(save_err) = self.store.save(&plan.deployment, &state).await {
                    error!("Failed to record the failed run: {save_err}");
                }
                return Err(err);
            }
        }

        info!("{} '{}'", RunPhase::Persisting, plan.deployment);
        let mut state = state.into_inner();
        state.config_hash.clone_from(&plan.config_hash);
        state.add_history(DeploymentHistoryEntry::new(
            DeploymentOperation::Apply,
            &plan.config_hash,
            applied.clone(),
        ));
        self.store.save(&plan.deployment, &state).await?;

        let outputs = DeploymentOutputs::from_outputs(&plan.deployment, &state.outputs());
        info!("Applied {} instance(s) of '{}'", applied.len(), plan.deployment);

        Ok(ApplyReport {
            outputs,
            applied,
            summary: plan.summary(),
            state,
        })
    }

    /// Applies one instance and records it. `position` is its declaration index.
    async fn apply_instance(
        &self,
        plan: &DeploymentPlan,
        position: usize,
        produced: &BTreeMap<String, OutputSet>,
        state: &Mutex<DeploymentState>,
    ) -> Result<OutputSet> {
        let instance = &plan.instances[position];
        let adapter = self.adapters.get(instance.resource_type)?;
        let resolved = instance.resolve(produced)?;

        debug!("Applying '{}' with {} config key(s)", instance.name, resolved.len());
        let outputs = tokio::time::timeout(self.deadline, adapter.apply(&instance.name, &resolved))
            .await
            .map_err(|_| {
                ProvisionError::apply(instance.resource_type, &instance.name, self.deadline_exceeded())
            })??;

        let record = InstanceState::new(
            &instance.name,
            instance.resource_type,
            &instance.resource_name,
            position,
            &self.hasher.hash_instance(instance),
            outputs.clone(),
        )
        .with_dependencies(instance.dependencies().into_iter().map(String::from).collect());

        let mut state = state.lock().await;
        state.set_instance(record);
        self.store.save(&plan.deployment, &state).await?;
        info!(
            "Applied {} '{}' ({})",
            instance.resource_type, instance.name, instance.resource_name
        );

        Ok(outputs)
    }

    async fn run_remove(&self, deployment: &str) -> Result<RemoveReport> {
        let state = self.store.load(deployment).await?;
        if state.is_empty() {
            info!("Nothing recorded for '{deployment}'");
            self.store.delete(deployment).await?;
            return Ok(RemoveReport::default());
        }

        let recorded: Vec<InstanceState> = state.ordered_instances().into_iter().cloned().collect();
        let present: HashSet<&str> = recorded.iter().map(|i| i.name.as_str()).collect();
        let nodes: Vec<(&str, Vec<&str>)> = recorded
            .iter()
            .map(|i| {
                let deps = i
                    .depends_on
                    .iter()
                    .map(String::as_str)
                    .filter(|d| present.contains(d))
                    .collect();
                (i.name.as_str(), deps)
            })
            .collect();
        let graph = DependencyGraph::from_edges(&nodes)?;

        let state = Mutex::new(state);
        let mut report = RemoveReport::default();
        let mut failures: Vec<ProvisionError> = Vec::new();
        let mut blocked: HashSet<usize> = HashSet::new();

        for wave in graph.waves().iter().rev() {
            let mut runnable: Vec<(usize, &dyn ResourceAdapter)> = Vec::with_capacity(wave.len());
            for &index in wave {
                let instance = &recorded[index];
                let adapter = match self.adapters.get(instance.resource_type) {
                    Ok(adapter) => adapter,
                    Err(e) => {
                        failures.push(ProvisionError::remove(instance.resource_type, &instance.name, e));
                        blocked.insert(index);
                        continue;
                    }
                };

                let dependent_failed = graph.dependents_of(index).iter().any(|d| blocked.contains(d));
                if dependent_failed && adapter.removal_requires_dependents_gone() {
                    warn!("Skipping '{}': a dependent could not be removed", instance.name);
                    report.skipped.push(instance.name.clone());
                    blocked.insert(index);
                    continue;
                }
                runnable.push((index, adapter));
            }

            info!(
                "{}: {}",
                RunPhase::RemovingReverse,
                runnable
                    .iter()
                    .map(|(i, _)| recorded[*i].name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );

            let results = if self.sequential {
                let mut results = Vec::with_capacity(runnable.len());
                for &(index, adapter) in &runnable {
                    results.push((index, self.remove_instance(deployment, &recorded[index], adapter, &state).await));
                }
                results
            } else {
                let runs = runnable.iter().map(|&(index, adapter)| {
                    let instance = &recorded[index];
                    let state = &state;
                    async move { (index, self.remove_instance(deployment, instance, adapter, state).await) }
                });
                join_all(runs).await
            };

            for (index, result) in results {
                match result {
                    Ok(()) => report.removed.push(recorded[index].name.clone()),
                    Err(StratumError::Provision(e)) => {
                        error!("{e}");
                        failures.push(e);
                        blocked.insert(index);
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        info!("{} '{deployment}'", RunPhase::Persisting);
        let mut state = state.into_inner();
        if state.is_empty() {
            self.store.delete(deployment).await?;
            info!("Removed {} instance(s); record of '{deployment}' deleted", report.removed.len());
        } else {
            let config_hash = state.config_hash.clone();
            state.add_history(DeploymentHistoryEntry::failed(
                DeploymentOperation::Remove,
                &config_hash,
                report.removed.clone(),
                format!("{} removal(s) failed", failures.len()),
            ));
            self.store.save(deployment, &state).await?;
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(StratumError::TeardownFailed { failures })
        }
    }

    /// Removes one recorded instance and drops it from state.
    async fn remove_instance(
        &self,
        deployment: &str,
        instance: &InstanceState,
        adapter: &dyn ResourceAdapter,
        state: &Mutex<DeploymentState>,
    ) -> Result<()> {
        tokio::time::timeout(self.deadline, adapter.remove(&instance.name, &instance.outputs))
            .await
            .map_err(|_| {
                ProvisionError::remove(instance.resource_type, &instance.name, self.deadline_exceeded())
            })??;

        let mut state = state.lock().await;
        state.remove_instance(&instance.name);
        self.store.save(deployment, &state).await?;
        info!(
            "Removed {} '{}' ({})",
            instance.resource_type, instance.name, instance.resource_name
        );
        Ok(())
    }

    fn deadline_exceeded(&self) -> String {
        format!("deadline of {:?} exceeded", self.deadline)
    }
}

impl<S: StateStore> fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("backend", &self.store.backend_type())
            .field("adapters", &self.adapters)
            .field("sequential", &self.sequential)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Planning => write!(f, "Planning"),
            Self::Applying => write!(f, "Applying"),
            Self::Persisting => write!(f, "Persisting"),
            Self::RemovingReverse => write!(f, "Removing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockResourceAdapter;
    use crate::adapters::testing::memory_plane;
    use crate::cloud::{ControlPlane, FailurePoint, MemoryControlPlane};
    use crate::error::{ConfigError, StateError};
    use crate::planner::ResourceType;
    use crate::state::LocalStateStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        memory: Arc<MemoryControlPlane>,
        orchestrator: Orchestrator<LocalStateStore>,
        config: DeployConfig,
        state_dir: TempDir,
        code_dir: TempDir,
    }

    fn fixture_with(customize: impl FnOnce(&mut AdapterRegistry)) -> Fixture {
        let (memory, plane) = memory_plane();
        let state_dir = TempDir::new().expect("state dir");
        let code_dir = TempDir::new().expect("code dir");
        std::fs::write(code_dir.path().join("index.js"), "exports.main = async () => 200").expect("write code");

        let mut adapters = AdapterRegistry::with_control_plane(&plane);
        customize(&mut adapters);

        let orchestrator = Orchestrator::new(LocalStateStore::with_base_dir(state_dir.path()), adapters)
            .with_account(Some(String::from("123456789012")))
            .with_holder("test-run");
        let config = DeployConfig {
            name: String::from("svc"),
            code: code_dir.path().display().to_string(),
            ..DeployConfig::default()
        };

        Fixture {
            memory,
            orchestrator,
            config,
            state_dir,
            code_dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn calls_with(memory: &MemoryControlPlane, prefix: &str) -> Vec<String> {
        memory
            .calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    #[tokio::test]
    async fn test_apply_provisions_whole_stack() {
        let f = fixture();
        let report = f.orchestrator.apply(&f.config).await.expect("apply should succeed");

        let state = f.orchestrator.store().load("svc").await.expect("load");
        let id = state.resource_id.clone().expect("resource id recorded");
        assert_eq!(report.outputs.bucket, Some(format!("svc-process-{id}")));
        assert_eq!(
            report.outputs.function,
            Some(format!("arn:aws:lambda:us-east-1:123456789012:function:svc-process-function-{id}"))
        );
        assert!(report.outputs.subscription.is_some());
        assert_eq!(f.memory.resource_count(), 5);

        assert_eq!(state.instances.len(), 5);
        assert_eq!(state.region.as_deref(), Some("us-east-1"));
        assert!(!state.config_hash.is_empty());
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
        assert_eq!(
            state.get_instance("function").expect("function recorded").depends_on,
            vec![String::from("bucket"), String::from("role")]
        );
        assert!(!f.orchestrator.store().is_locked("svc").await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_function_applied_only_after_its_dependencies() {
        let f = fixture();
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");

        let puts = calls_with(&f.memory, "put");
        let position = |kind: &str| {
            puts.iter()
                .position(|c| c.starts_with(&format!("put {kind} ")))
                .expect("call recorded")
        };
        assert!(position("role") < position("function"));
        assert!(position("bucket") < position("function"));
        assert!(position("function") < position("subscription"));
    }

    #[tokio::test]
    async fn test_reapply_is_idempotent() {
        let f = fixture();
        let first = f.orchestrator.apply(&f.config).await.expect("first apply");
        let second = f.orchestrator.apply(&f.config).await.expect("second apply");

        assert_eq!(first.outputs, second.outputs);
        assert_eq!(f.memory.creation_count(), 5);
        assert_eq!(f.memory.resource_count(), 5);
        assert!(f.orchestrator.plan(&f.config).await.expect("plan").is_noop());
    }

    #[tokio::test]
    async fn test_plan_sees_edited_code() {
        let f = fixture();
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");
        std::fs::write(f.code_dir.path().join("index.js"), "exports.main = async () => 204").expect("edit code");

        let plan = f.orchestrator.plan(&f.config).await.expect("plan");
        for diff in &plan.diff.diffs {
            let expected = if diff.name == "function" { DiffType::Update } else { DiffType::NoChange };
            assert_eq!(diff.diff_type, expected, "{}", diff.name);
        }
    }

    #[tokio::test]
    async fn test_sequential_mode_applies_in_topological_order() {
        let mut f = fixture();
        f.orchestrator = f.orchestrator.with_sequential(true);
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");

        let kinds: Vec<String> = calls_with(&f.memory, "put")
            .iter()
            .map(|c| c.split(' ').nth(1).unwrap_or_default().to_string())
            .collect();
        assert_eq!(kinds, vec!["bucket", "role", "table", "function", "subscription"]);
    }

    #[tokio::test]
    async fn test_instances_of_a_wave_run_concurrently() {
        let latency = Duration::from_millis(300);
        let first_wave = [ResourceType::Bucket, ResourceType::Role, ResourceType::Table];

        let concurrent = fixture();
        for kind in first_wave {
            concurrent.memory.set_latency(kind, latency);
        }
        let started = tokio::time::Instant::now();
        concurrent.orchestrator.apply(&concurrent.config).await.expect("apply should succeed");
        let elapsed = started.elapsed();
        assert!(elapsed < latency * 2, "first wave took {elapsed:?}");

        let mut sequential = fixture();
        sequential.orchestrator = sequential.orchestrator.with_sequential(true);
        for kind in first_wave {
            sequential.memory.set_latency(kind, latency);
        }
        let started = tokio::time::Instant::now();
        sequential.orchestrator.apply(&sequential.config).await.expect("apply should succeed");
        assert!(started.elapsed() >= latency * 3);
    }

    fn short_lock_orchestrator(f: &Fixture, ttl: Duration) -> Orchestrator<LocalStateStore> {
        let plane: Arc<dyn ControlPlane> = f.memory.clone();
        Orchestrator::new(
            LocalStateStore::with_base_dir(f.state_dir.path()).with_lock_ttl(ttl),
            AdapterRegistry::with_control_plane(&plane),
        )
        .with_account(Some(String::from("123456789012")))
        .with_holder("long-run")
    }

    #[tokio::test]
    async fn test_lock_is_renewed_while_a_run_is_in_progress() {
        let f = fixture();
        let orchestrator = short_lock_orchestrator(&f, Duration::from_millis(300));
        for kind in [ResourceType::Bucket, ResourceType::Role, ResourceType::Table, ResourceType::Function] {
            f.memory.set_latency(kind, Duration::from_millis(400));
        }

        let rival = LocalStateStore::with_base_dir(f.state_dir.path());
        let attempt = async {
            tokio::time::sleep(Duration::from_millis(600)).await;
            rival.acquire_lock("svc", "rival", "apply").await
        };
        let (report, attempt) = tokio::join!(orchestrator.apply(&f.config), attempt);

        report.expect("apply should succeed");
        assert!(matches!(
            attempt,
            Err(StratumError::State(StateError::LockedByOther { ref holder, .. })) if holder == "long-run"
        ));
        assert!(!orchestrator.store().is_locked("svc").await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_run_reports_a_lock_taken_from_it() {
        let f = fixture();
        let orchestrator = short_lock_orchestrator(&f, Duration::from_millis(300));
        for kind in [ResourceType::Bucket, ResourceType::Role, ResourceType::Table, ResourceType::Function] {
            f.memory.set_latency(kind, Duration::from_millis(400));
        }

        let rival = LocalStateStore::with_base_dir(f.state_dir.path());
        let takeover = async {
            tokio::time::sleep(Duration::from_millis(150)).await;
            rival.force_unlock("svc").await.expect("force unlock");
            rival.acquire_lock("svc", "rival", "apply").await.expect("rival acquires")
        };
        let (result, rival_lock) = tokio::join!(orchestrator.apply(&f.config), takeover);

        let err = result.unwrap_err();
        assert!(matches!(err, StratumError::State(StateError::LockLost { .. })), "{err}");
        let held = rival.get_lock_info("svc").await.expect("lock info").expect("rival keeps its lock");
        assert_eq!(held.lock_id, rival_lock.lock_id);
    }

    #[tokio::test]
    async fn test_remove_reverses_order_and_is_repeatable() {
        let f = fixture();
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");

        let report = f.orchestrator.remove("svc").await.expect("remove should succeed");
        assert_eq!(report.removed.len(), 5);
        assert!(report.skipped.is_empty());
        assert_eq!(f.memory.resource_count(), 0);
        assert!(!f.orchestrator.store().exists("svc").await.expect("exists"));

        let deletes = calls_with(&f.memory, "delete");
        assert!(deletes[0].starts_with("delete subscription "));
        assert!(deletes[1].starts_with("delete function "));
        let mut rest: Vec<&str> = deletes[2..].iter().map(|c| c.split(' ').nth(1).unwrap_or_default()).collect();
        rest.sort_unstable();
        assert_eq!(rest, vec!["bucket", "role", "table"]);

        let again = f.orchestrator.remove("svc").await.expect("second remove is a no-op");
        assert!(again.removed.is_empty());
        assert_eq!(calls_with(&f.memory, "delete").len(), 5);
    }

    #[tokio::test]
    async fn test_failure_stops_after_wave() {
        let f = fixture();
        f.memory.fail(ResourceType::Function, FailurePoint::Put);

        let err = f.orchestrator.apply(&f.config).await.unwrap_err();
        assert!(matches!(err, StratumError::Provision(ref e) if e.instance == "function"));

        let state = f.orchestrator.store().load("svc").await.expect("load");
        for name in ["bucket", "role", "table"] {
            assert!(state.get_instance(name).is_some(), "{name} should be recorded");
        }
        assert!(state.get_instance("function").is_none());
        assert!(state.get_instance("subscription").is_none());
        assert!(calls_with(&f.memory, "put subscription").is_empty());

        let last = state.history.last().expect("history entry");
        assert!(!last.success);
        assert!(!f.orchestrator.store().is_locked("svc").await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_rerun_after_failure_converges() {
        let f = fixture();
        f.memory.fail(ResourceType::Function, FailurePoint::Put);
        assert!(f.orchestrator.apply(&f.config).await.is_err());
        let partial = f.orchestrator.store().load("svc").await.expect("load");

        f.memory.clear_failures();
        f.orchestrator.apply(&f.config).await.expect("rerun should succeed");

        let state = f.orchestrator.store().load("svc").await.expect("load");
        assert_eq!(state.resource_id, partial.resource_id);
        assert_eq!(state.instances.len(), 5);
        assert_eq!(f.memory.creation_count(), 5);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_adapter_call() {
        let f = fixture_with(|adapters| {
            let mut mock = MockResourceAdapter::new();
            mock.expect_resource_type().return_const(ResourceType::Bucket);
            mock.expect_apply().times(0);
            adapters.register(Box::new(mock));
        });

        let instances = vec![
            DeploymentInstance::new("a", "svc-a", ResourceType::Bucket).with_reference("x", "b", "name"),
            DeploymentInstance::new("b", "svc-b", ResourceType::Bucket).with_reference("x", "a", "name"),
        ];
        let err = f.orchestrator.apply_instances(&f.config, instances).await.unwrap_err();

        assert!(matches!(err, StratumError::Config(ConfigError::CircularDependency { .. })));
        assert!(f.memory.calls().is_empty());
        assert!(!f.orchestrator.store().exists("svc").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_deadline_leaves_instance_unrecorded() {
        let mut f = fixture();
        f.orchestrator = f.orchestrator.with_deadline(Duration::from_millis(50));
        f.memory.set_latency(ResourceType::Table, Duration::from_millis(500));

        let err = f.orchestrator.apply(&f.config).await.unwrap_err();
        match err {
            StratumError::Provision(e) => {
                assert_eq!(e.instance, "table");
                assert!(e.cause.contains("deadline"));
            }
            other => panic!("unexpected error: {other}"),
        }

        let state = f.orchestrator.store().load("svc").await.expect("load");
        assert!(state.get_instance("table").is_none());
        assert!(state.get_instance("bucket").is_some());
        assert!(calls_with(&f.memory, "put function").is_empty());
    }

    #[tokio::test]
    async fn test_teardown_is_best_effort() {
        let f = fixture();
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");
        f.memory.fail(ResourceType::Function, FailurePoint::Delete);

        let err = f.orchestrator.remove("svc").await.unwrap_err();
        match err {
            StratumError::TeardownFailed { failures } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].instance, "function");
            }
            other => panic!("unexpected error: {other}"),
        }

        let state = f.orchestrator.store().load("svc").await.expect("load");
        let left: Vec<&str> = state.instances.keys().map(String::as_str).collect();
        assert_eq!(left, vec!["function"]);
        assert_eq!(f.memory.resource_count(), 1);

        f.memory.clear_failures();
        let report = f.orchestrator.remove("svc").await.expect("retry should succeed");
        assert_eq!(report.removed, vec![String::from("function")]);
        assert!(!f.orchestrator.store().exists("svc").await.expect("exists"));
    }

    #[tokio::test]
    async fn test_removal_waits_for_dependents_when_adapter_requires_it() {
        let f = fixture_with(|adapters| {
            let mut mock = MockResourceAdapter::new();
            mock.expect_resource_type().return_const(ResourceType::Role);
            mock.expect_removal_requires_dependents_gone().return_const(true);
            mock.expect_apply().returning(|_, config| {
                let name = config.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                Ok(OutputSet::from([
                    (String::from("arn"), format!("arn:aws:iam::123456789012:role/{name}")),
                    (String::from("name"), name),
                ]))
            });
            mock.expect_remove().times(0);
            adapters.register(Box::new(mock));
        });
        f.orchestrator.apply(&f.config).await.expect("apply should succeed");
        f.memory.fail(ResourceType::Function, FailurePoint::Delete);

        assert!(matches!(
            f.orchestrator.remove("svc").await,
            Err(StratumError::TeardownFailed { .. })
        ));

        let state = f.orchestrator.store().load("svc").await.expect("load");
        let left: Vec<&str> = state.instances.keys().map(String::as_str).collect();
        assert_eq!(left, vec!["function", "role"]);
    }

    #[tokio::test]
    async fn test_locked_deployment_is_not_touched() {
        let f = fixture();
        f.orchestrator
            .store()
            .acquire_lock("svc", "someone-else", "apply")
            .await
            .expect("lock");

        let err = f.orchestrator.apply(&f.config).await.unwrap_err();
        assert!(matches!(err, StratumError::State(StateError::LockedByOther { .. })));
        assert!(f.memory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_outputs_after_apply_and_remove() {
        let f = fixture();
        assert!(f.orchestrator.outputs("svc").await.expect("outputs").is_none());

        let report = f.orchestrator.apply(&f.config).await.expect("apply");
        assert_eq!(f.orchestrator.outputs("svc").await.expect("outputs"), Some(report.outputs));

        f.orchestrator.remove("svc").await.expect("remove");
        assert!(f.orchestrator.outputs("svc").await.expect("outputs").is_none());
    }
}
