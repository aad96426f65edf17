//! Diff engine for comparing desired instances against recorded state.
//!
//! Each desired instance is hashed and compared with the hash recorded when
//! it was last applied. Recorded instances with no desired counterpart are
//! reported as orphans.

use tracing::debug;

use crate::config::ConfigHasher;
use crate::state::DeploymentState;

use super::instance::DeploymentInstance;

/// Engine for computing diffs between desired instances and state.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// Difference for a single instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDiff {
    /// Instance name.
    pub name: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Hash recorded in state (if any).
    pub old_hash: Option<String>,
    /// Hash of the desired instance (if any).
    pub new_hash: Option<String>,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Instance has never been applied.
    Create,
    /// Instance was applied with a different configuration.
    Update,
    /// Instance is unchanged.
    NoChange,
    /// Instance is recorded but no longer desired.
    Orphan,
}

/// Complete diff result.
#[derive(Debug, Clone, Default)]
pub struct DiffResult {
    /// All instance diffs, desired instances first.
    pub diffs: Vec<InstanceDiff>,
    /// Number of instances to create.
    pub creates: usize,
    /// Number of instances to update.
    pub updates: usize,
    /// Number of unchanged instances.
    pub unchanged: usize,
    /// Number of orphaned instances.
    pub orphans: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: ConfigHasher::new(),
        }
    }

    /// Hashes a desired instance.
    #[must_use]
    pub fn instance_hash(&self, instance: &DeploymentInstance) -> String {
        self.hasher.hash_instance(instance)
    }

    /// Computes the diff between desired instances and recorded state.
    #[must_use]
    pub fn compute_diff(&self, instances: &[DeploymentInstance], state: &DeploymentState) -> DiffResult {
        let mut diffs = Vec::with_capacity(instances.len());

        for instance in instances {
            let new_hash = self.instance_hash(instance);
            let recorded = state.get_instance(&instance.name);

            let diff_type = match recorded {
                None => DiffType::Create,
                Some(r) if r.resource_name == instance.resource_name
                    && ConfigHasher::hashes_match(&r.config_hash, &new_hash) =>
                {
                    DiffType::NoChange
                }
                Some(_) => DiffType::Update,
            };

            debug!("Instance {} diff: {diff_type}", instance.name);
            diffs.push(InstanceDiff {
                name: instance.name.clone(),
                diff_type,
                old_hash: recorded.map(|r| r.config_hash.clone()),
                new_hash: Some(new_hash),
            });
        }

        for recorded in state.ordered_instances() {
            if !instances.iter().any(|i| i.name == recorded.name) {
                debug!("Found orphaned instance: {}", recorded.name);
                diffs.push(InstanceDiff {
                    name: recorded.name.clone(),
                    diff_type: DiffType::Orphan,
                    old_hash: Some(recorded.config_hash.clone()),
                    new_hash: None,
                });
            }
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        DiffResult {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            unchanged: count(DiffType::NoChange),
            orphans: count(DiffType::Orphan),
            diffs,
        }
    }
}

impl DiffResult {
    /// Returns true if nothing would change.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.creates == 0 && self.updates == 0 && self.orphans == 0
    }

    /// Returns the diff for an instance.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InstanceDiff> {
        self.diffs.iter().find(|d| d.name == name)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::NoChange => "no-change",
            Self::Orphan => "orphan",
        };
        write!(f, "{s}")
    }
}
