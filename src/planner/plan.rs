//! Deployment plan construction.
//!
//! Planning is pure: it reads the configuration and the recorded state and
//! produces the ordered instance graph plus a diff, without touching any
//! remote system.

use chrono::{DateTime, Utc};

use crate::config::{ConfigHasher, DeployConfig};
use crate::error::{ConfigError, Result};
use crate::state::DeploymentState;

use super::diff::{DiffEngine, DiffResult, DiffType};
use super::graph::DependencyGraph;
use super::instance::DeploymentInstance;
use super::topology::{build_topology, generate_resource_id};

/// A complete deployment plan.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Deployment name.
    pub deployment: String,
    /// Resource id shared by every physical name.
    pub resource_id: String,
    /// Whether the resource id was generated for this plan.
    pub fresh_resource_id: bool,
    /// Hash of the resolved configuration.
    pub config_hash: String,
    /// Instances in declaration order.
    pub instances: Vec<DeploymentInstance>,
    /// Ordered dependency graph over `instances`.
    pub graph: DependencyGraph,
    /// Desired instances compared with recorded state.
    pub diff: DiffResult,
}

impl DeploymentPlan {
    /// Plans a deployment from its configuration and recorded state.
    ///
    /// The resource id recorded in state is reused so that a re-run targets
    /// the same physical resources. `account` is only needed when the
    /// configuration does not name a topic.
    ///
    /// # Errors
    ///
    /// Returns an error if no topic can be determined or the instance graph
    /// is invalid.
    pub fn prepare(config: &DeployConfig, state: &DeploymentState, account: Option<&str>) -> Result<Self> {
        let topic = config.topic_arn(account).ok_or_else(|| {
            ConfigError::validation("no topic configured and the account id is unknown", "topic")
        })?;

        let (resource_id, fresh_resource_id) = match &state.resource_id {
            Some(id) => (id.clone(), false),
            None => (generate_resource_id(), true),
        };

        let instances = build_topology(config, &resource_id, &topic);
        Self::from_instances(config, state, &resource_id, instances).map(|mut plan| {
            plan.fresh_resource_id = fresh_resource_id;
            plan
        })
    }

    /// Plans an arbitrary instance set.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unknown references or cycles.
    pub fn from_instances(
        config: &DeployConfig,
        state: &DeploymentState,
        resource_id: &str,
        instances: Vec<DeploymentInstance>,
    ) -> Result<Self> {
        let graph = DependencyGraph::build(&instances)?;
        let diff = DiffEngine::new().compute_diff(&instances, state);

        Ok(Self {
            created_at: Utc::now(),
            deployment: config.name.clone(),
            resource_id: resource_id.to_string(),
            fresh_resource_id: false,
            config_hash: ConfigHasher::new().hash_config(config),
            instances,
            graph,
            diff,
        })
    }

    /// Returns instances in dependency order.
    #[must_use]
    pub fn ordered_instances(&self) -> Vec<&DeploymentInstance> {
        self.graph.order().iter().map(|&i| &self.instances[i]).collect()
    }

    /// Returns the waves of instances; each wave only depends on earlier ones.
    #[must_use]
    pub fn waves(&self) -> Vec<Vec<&DeploymentInstance>> {
        self.graph
            .waves()
            .iter()
            .map(|wave| wave.iter().map(|&i| &self.instances[i]).collect())
            .collect()
    }

    /// Returns true if applying would change nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.diff.is_noop()
    }

    /// Returns a one-line summary of the diff.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} unchanged, {} orphaned",
            self.diff.creates, self.diff.updates, self.diff.unchanged, self.diff.orphans
        )
    }
}

impl std::fmt::Display for DeploymentPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Deployment Plan for '{}' ({} instances, {} waves):",
            self.deployment,
            self.instances.len(),
            self.graph.waves().len()
        )?;
        for (step, instance) in self.ordered_instances().into_iter().enumerate() {
            let action = self
                .diff
                .get(&instance.name)
                .map_or(DiffType::Create, |d| d.diff_type);
            writeln!(
                f,
                "  {}. {action} {} {} ({})",
                step + 1,
                instance.resource_type,
                instance.name,
                instance.resource_name
            )?;
        }
        for orphan in self.diff.diffs.iter().filter(|d| d.diff_type == DiffType::Orphan) {
            writeln!(f, "  - orphan {}", orphan.name)?;
        }
        write!(f, "{}", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StratumError;
    use crate::planner::ResourceType;

    fn config() -> DeployConfig {
        DeployConfig {
            name: String::from("svc"),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn test_prepare_generates_and_reuses_resource_id() {
        let fresh = DeploymentPlan::prepare(&config(), &DeploymentState::new("svc"), Some("123456789012"))
            .expect("plan should build");
        assert!(fresh.fresh_resource_id);
        assert_eq!(fresh.resource_id.len(), 8);

        let mut state = DeploymentState::new("svc");
        state.resource_id = Some(String::from("feedbeef"));
        let reused = DeploymentPlan::prepare(&config(), &state, Some("123456789012")).expect("plan should build");
        assert!(!reused.fresh_resource_id);
        assert_eq!(reused.instances[0].resource_name, "svc-process-feedbeef");
    }

    #[test]
    fn test_prepare_needs_a_topic() {
        let err = DeploymentPlan::prepare(&config(), &DeploymentState::new("svc"), None).unwrap_err();
        assert!(matches!(err, StratumError::Config(ConfigError::ValidationError { .. })));

        let with_topic = DeployConfig {
            topic: Some(String::from("arn:aws:sns:us-east-1:1:t")),
            ..config()
        };
        assert!(DeploymentPlan::prepare(&with_topic, &DeploymentState::new("svc"), None).is_ok());
    }

    #[test]
    fn test_waves_follow_dependencies() {
        let plan = DeploymentPlan::prepare(&config(), &DeploymentState::new("svc"), Some("1")).expect("plan");
        let waves: Vec<Vec<&str>> = plan
            .waves()
            .iter()
            .map(|w| w.iter().map(|i| i.name.as_str()).collect())
            .collect();
        assert_eq!(
            waves,
            vec![vec!["bucket", "role", "table"], vec!["function"], vec!["subscription"]]
        );
    }

    #[test]
    fn test_cyclic_instances_rejected() {
        let instances = vec![
            DeploymentInstance::new("a", "a", ResourceType::Bucket).with_reference("x", "b", "name"),
            DeploymentInstance::new("b", "b", ResourceType::Role).with_reference("x", "a", "name"),
        ];
        let err = DeploymentPlan::from_instances(&config(), &DeploymentState::new("svc"), "id", instances)
            .unwrap_err();
        assert!(matches!(err, StratumError::Config(ConfigError::CircularDependency { .. })));
    }

    #[test]
    fn test_display_lists_steps() {
        let plan = DeploymentPlan::prepare(&config(), &DeploymentState::new("svc"), Some("1")).expect("plan");
        let text = plan.to_string();
        assert!(text.contains("1. create bucket bucket"));
        assert!(text.contains("5 to create"));
    }
}
