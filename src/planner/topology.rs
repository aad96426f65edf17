//! The fixed process-stack topology.
//!
//! A deployment is always the same five instances: a code bucket, an
//! execution role, the function, a table and a subscription of the function
//! to a topic. Physical names are derived from the deployment name and a
//! per-deployment resource id so that several stacks can share an account.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::DeployConfig;
use crate::policy::resolve_policy;

use super::instance::{DeploymentInstance, OutputSet, ResourceType};

/// Instance name of the code bucket.
pub const BUCKET: &str = "bucket";
/// Instance name of the execution role.
pub const ROLE: &str = "role";
/// Instance name of the function.
pub const FUNCTION: &str = "function";
/// Instance name of the table.
pub const TABLE: &str = "table";
/// Instance name of the topic subscription.
pub const SUBSCRIPTION: &str = "subscription";

/// Service principal allowed to assume the execution role.
pub const ROLE_SERVICE: &str = "lambda.amazonaws.com";

/// Subscription protocol used to deliver topic messages to the function.
pub const SUBSCRIPTION_PROTOCOL: &str = "lambda";

/// Hash key of the table.
pub const TABLE_HASH_KEY: &str = "id";

/// Length of a generated resource id.
const RESOURCE_ID_LEN: usize = 8;

/// The user-facing outputs of an applied deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOutputs {
    /// Deployment name.
    pub name: String,
    /// Bucket name.
    pub bucket: Option<String>,
    /// Role ARN.
    pub role: Option<String>,
    /// Function ARN.
    pub function: Option<String>,
    /// Table ARN.
    pub table: Option<String>,
    /// Subscription ARN.
    pub subscription: Option<String>,
}

/// Generates a fresh resource id.
#[must_use]
pub fn generate_resource_id() -> String {
    uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(RESOURCE_ID_LEN)
        .collect()
}

/// Derives the physical name of an instance.
#[must_use]
pub fn physical_name(deployment: &str, resource_type: ResourceType, resource_id: &str) -> String {
    match resource_type {
        ResourceType::Bucket => format!("{deployment}-process-{resource_id}"),
        ResourceType::Role => format!("{deployment}-process-function-role-{resource_id}"),
        ResourceType::Function => format!("{deployment}-process-function-{resource_id}"),
        ResourceType::Table => format!("{deployment}-process-table-{resource_id}"),
        ResourceType::Subscription => format!("{deployment}-process-subscription-{resource_id}"),
    }
}

/// Builds the instances of a deployment in declaration order.
#[must_use]
pub fn build_topology(config: &DeployConfig, resource_id: &str, topic: &str) -> Vec<DeploymentInstance> {
    let name = |rt| physical_name(&config.name, rt, resource_id);
    let region = config.region.as_str();
    let policy = resolve_policy(config.permissions.as_ref()).to_value();
    let env = serde_json::to_value(&config.env).unwrap_or_default();

    vec![
        DeploymentInstance::new(BUCKET, &name(ResourceType::Bucket), ResourceType::Bucket)
            .with_literal("name", name(ResourceType::Bucket))
            .with_literal("region", region),
        DeploymentInstance::new(ROLE, &name(ResourceType::Role), ResourceType::Role)
            .with_literal("name", name(ResourceType::Role))
            .with_literal("region", region)
            .with_literal("service", ROLE_SERVICE)
            .with_literal("policy", policy),
        DeploymentInstance::new(FUNCTION, &name(ResourceType::Function), ResourceType::Function)
            .with_literal("name", name(ResourceType::Function))
            .with_literal("region", region)
            .with_literal("description", config.function_description())
            .with_literal("memory", config.memory)
            .with_literal("timeout", config.timeout)
            .with_literal("runtime", config.runtime.as_str())
            .with_literal("handler", config.handler.as_str())
            .with_literal("code", config.code.as_str())
            .with_literal("env", env)
            .with_reference("role", ROLE, "arn")
            .with_reference("bucket", BUCKET, "name"),
        DeploymentInstance::new(TABLE, &name(ResourceType::Table), ResourceType::Table)
            .with_literal("name", name(ResourceType::Table))
            .with_literal("region", region)
            .with_literal("hash_key", TABLE_HASH_KEY),
        DeploymentInstance::new(
            SUBSCRIPTION,
            &name(ResourceType::Subscription),
            ResourceType::Subscription,
        )
        .with_literal("name", name(ResourceType::Subscription))
        .with_literal("region", region)
        .with_literal("topic", topic)
        .with_literal("protocol", SUBSCRIPTION_PROTOCOL)
        .with_reference("endpoint", FUNCTION, "arn"),
    ]
}

impl DeploymentOutputs {
    /// Collects the user-facing outputs from per-instance output sets.
    #[must_use]
    pub fn from_outputs(name: &str, outputs: &BTreeMap<String, OutputSet>) -> Self {
        let field = |instance: &str, key: &str| outputs.get(instance).and_then(|o| o.get(key)).cloned();
        Self {
            name: name.to_string(),
            bucket: field(BUCKET, "name"),
            role: field(ROLE, "arn"),
            function: field(FUNCTION, "arn"),
            table: field(TABLE, "arn"),
            subscription: field(SUBSCRIPTION, "arn"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{DependencyGraph, DesiredValue};
    use serde_json::json;

    fn config() -> DeployConfig {
        DeployConfig {
            name: String::from("svc"),
            ..DeployConfig::default()
        }
    }

    #[test]
    fn test_physical_names_share_resource_id() {
        let instances = build_topology(&config(), "ab12cd34", "arn:topic");
        let names: Vec<&str> = instances.iter().map(|i| i.resource_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "svc-process-ab12cd34",
                "svc-process-function-role-ab12cd34",
                "svc-process-function-ab12cd34",
                "svc-process-table-ab12cd34",
                "svc-process-subscription-ab12cd34",
            ]
        );
    }

    #[test]
    fn test_topology_orders_deterministically() {
        let instances = build_topology(&config(), "ab12cd34", "arn:topic");
        let graph = DependencyGraph::build(&instances).expect("topology should be acyclic");
        assert_eq!(
            graph.ordered_names(),
            vec![BUCKET, ROLE, FUNCTION, TABLE, SUBSCRIPTION]
        );
    }

    #[test]
    fn test_function_carries_config_and_references() {
        let instances = build_topology(&config(), "ab12cd34", "arn:topic");
        let function = &instances[2];

        assert_eq!(
            function.desired_config.get("memory"),
            Some(&DesiredValue::literal(896))
        );
        assert_eq!(
            function.desired_config.get("description"),
            Some(&DesiredValue::literal("A function for the svc process component"))
        );
        assert_eq!(
            function.desired_config.get("role"),
            Some(&DesiredValue::reference(ROLE, "arn"))
        );
        assert_eq!(function.desired_config.get("env"), Some(&DesiredValue::literal(json!({}))));
    }

    #[test]
    fn test_role_gets_default_policy() {
        let instances = build_topology(&config(), "ab12cd34", "arn:topic");
        let DesiredValue::Literal(policy) = &instances[1].desired_config["policy"] else {
            panic!("policy should be a literal");
        };
        assert_eq!(policy["Statement"][0]["Action"], json!(["dynamodb:*", "logs:*"]));
    }

    #[test]
    fn test_generated_ids_are_short_and_distinct() {
        let a = generate_resource_id();
        let b = generate_resource_id();
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_outputs_pick_identifying_fields() {
        let mut outputs = BTreeMap::new();
        outputs.insert(
            String::from(BUCKET),
            OutputSet::from([
                (String::from("name"), String::from("svc-process-x")),
                (String::from("arn"), String::from("arn:aws:s3:::svc-process-x")),
            ]),
        );
        outputs.insert(
            String::from(FUNCTION),
            OutputSet::from([(String::from("arn"), String::from("arn:fn"))]),
        );

        let summary = DeploymentOutputs::from_outputs("svc", &outputs);
        assert_eq!(summary.bucket.as_deref(), Some("svc-process-x"));
        assert_eq!(summary.function.as_deref(), Some("arn:fn"));
        assert_eq!(summary.role, None);
    }
}
