//! State types for tracking deployment state.
//!
//! A deployment's state record holds the outputs of every instance that has
//! been applied and not yet removed. Outputs are the only input a teardown
//! needs, so the record is written after each instance completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::StateError;
use crate::planner::{DeploymentOutputs, OutputSet, ResourceType};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept in a record.
const MAX_HISTORY: usize = 100;

/// The complete state record of one deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// State format version.
    pub version: String,
    /// Deployment name.
    pub name: String,
    /// Suffix shared by every physical resource name of this deployment.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Region the resources live in.
    #[serde(default)]
    pub region: Option<String>,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Applied instances keyed by instance name.
    #[serde(default)]
    pub instances: BTreeMap<String, InstanceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Deployment history (recent entries).
    #[serde(default)]
    pub history: Vec<DeploymentHistoryEntry>,
}

/// State of a single applied instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceState {
    /// Logical instance name.
    pub name: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Physical resource name.
    pub resource_name: String,
    /// Declaration position, used to order teardown deterministically.
    pub position: usize,
    /// Instances this one depended on when applied.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Hash of the instance's desired configuration when applied.
    pub config_hash: String,
    /// Outputs returned by the adapter.
    pub outputs: OutputSet,
    /// When the instance was last applied.
    pub applied_at: DateTime<Utc>,
}

/// A single entry in the deployment history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: DeploymentOperation,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Instances affected.
    pub resources: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of deployment operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentOperation {
    /// Create or update every instance.
    Apply,
    /// Tear every instance down.
    Remove,
}

impl DeploymentState {
    /// Creates a new empty deployment state.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            name: name.to_string(),
            resource_id: None,
            region: None,
            config_hash: String::new(),
            instances: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Checks that the record was written in the current state format.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::VersionMismatch`] for any other version.
    pub fn check_version(&self) -> std::result::Result<(), StateError> {
        if self.version == STATE_VERSION {
            Ok(())
        } else {
            Err(StateError::version_mismatch(STATE_VERSION, &self.version))
        }
    }

    /// Returns true if no instance is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Gets an instance by name.
    #[must_use]
    pub fn get_instance(&self, name: &str) -> Option<&InstanceState> {
        self.instances.get(name)
    }

    /// Adds or updates an instance.
    pub fn set_instance(&mut self, instance: InstanceState) {
        self.instances.insert(instance.name.clone(), instance);
        self.last_updated = Utc::now();
    }

    /// Removes an instance by name.
    pub fn remove_instance(&mut self, name: &str) -> Option<InstanceState> {
        let result = self.instances.remove(name);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: DeploymentHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns recorded instances in declaration order.
    #[must_use]
    pub fn ordered_instances(&self) -> Vec<&InstanceState> {
        let mut instances: Vec<&InstanceState> = self.instances.values().collect();
        instances.sort_by_key(|i| (i.position, i.name.as_str()));
        instances
    }

    /// Returns every recorded output set keyed by instance name.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, OutputSet> {
        self.instances
            .iter()
            .map(|(name, instance)| (name.clone(), instance.outputs.clone()))
            .collect()
    }

    /// Returns the user-facing outputs, if the stack has been applied.
    #[must_use]
    pub fn deployment_outputs(&self) -> Option<DeploymentOutputs> {
        if self.is_empty() {
            return None;
        }
        Some(DeploymentOutputs::from_outputs(&self.name, &self.outputs()))
    }
}

impl InstanceState {
    /// Creates a new instance record stamped with the current time.
    #[must_use]
    pub fn new(
        name: &str,
        resource_type: ResourceType,
        resource_name: &str,
        position: usize,
        config_hash: &str,
        outputs: OutputSet,
    ) -> Self {
        Self {
            name: name.to_string(),
            resource_type,
            resource_name: resource_name.to_string(),
            position,
            depends_on: Vec::new(),
            config_hash: config_hash.to_string(),
            outputs,
            applied_at: Utc::now(),
        }
    }

    /// Records the instances this one depends on.
    #[must_use]
    pub fn with_dependencies(mut self, depends_on: Vec<String>) -> Self {
        self.depends_on = depends_on;
        self
    }
}

impl DeploymentHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(operation: DeploymentOperation, config_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(
        operation: DeploymentOperation,
        config_hash: &str,
        resources: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::new(operation, config_hash, resources)
        }
    }
}

impl std::fmt::Display for DeploymentOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Remove => write!(f, "remove"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(name: &str, rt: ResourceType, position: usize) -> InstanceState {
        InstanceState::new(
            name,
            rt,
            &format!("svc-{name}"),
            position,
            "hash",
            OutputSet::from([(String::from("arn"), format!("arn:{name}"))]),
        )
    }

    #[test]
    fn test_ordered_instances_follow_position() {
        let mut state = DeploymentState::new("svc");
        state.set_instance(instance("table", ResourceType::Table, 3));
        state.set_instance(instance("bucket", ResourceType::Bucket, 0));
        state.set_instance(instance("function", ResourceType::Function, 2));

        let names: Vec<&str> = state.ordered_instances().iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["bucket", "function", "table"]);
    }

    #[test]
    fn test_remove_instance() {
        let mut state = DeploymentState::new("svc");
        state.set_instance(instance("bucket", ResourceType::Bucket, 0));
        assert!(!state.is_empty());
        assert!(state.remove_instance("bucket").is_some());
        assert!(state.remove_instance("bucket").is_none());
        assert!(state.is_empty());
        assert!(state.deployment_outputs().is_none());
    }

    #[test]
    fn test_version_check() {
        let mut state = DeploymentState::new("svc");
        assert!(state.check_version().is_ok());

        state.version = String::from("0.9");
        let err = state.check_version().unwrap_err();
        assert!(matches!(err, StateError::VersionMismatch { ref expected, ref found } if expected == STATE_VERSION && found == "0.9"));
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = DeploymentState::new("svc");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(DeploymentHistoryEntry::new(
                DeploymentOperation::Apply,
                &i.to_string(),
                Vec::new(),
            ));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = DeploymentState::new("svc");
        state.resource_id = Some(String::from("ab12cd34"));
        state.set_instance(instance("role", ResourceType::Role, 1).with_dependencies(Vec::new()));

        let json = serde_json::to_string(&state).expect("serialize");
        let parsed: DeploymentState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, state);
    }
}
