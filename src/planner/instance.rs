//! Deployment instances: the nodes of a resource graph.
//!
//! An instance carries its desired configuration as a map of literal values
//! and references to other instances' outputs. References are resolved only
//! once the referenced instance has been applied.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::PlanError;

/// Output field name to value, produced by a successful apply.
pub type OutputSet = BTreeMap<String, String>;

/// Desired configuration after every reference has been substituted.
pub type ResolvedConfig = Map<String, Value>;

/// The closed set of resource types the engine can provision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Object store bucket.
    Bucket,
    /// Execution role.
    Role,
    /// Serverless function.
    Function,
    /// Key-value table.
    Table,
    /// Notification subscription.
    Subscription,
}

/// A single desired configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredValue {
    /// A literal value.
    Literal(Value),
    /// The output field of another instance.
    Reference {
        /// Referenced instance name.
        instance: String,
        /// Output field of the referenced instance.
        field: String,
    },
}

/// A named, typed node in the resource graph.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentInstance {
    /// Logical instance name, unique within a deployment.
    pub name: String,
    /// Physical resource name.
    pub resource_name: String,
    /// Resource type.
    pub resource_type: ResourceType,
    /// Desired configuration.
    pub desired_config: BTreeMap<String, DesiredValue>,
}

impl ResourceType {
    /// All resource types, in canonical declaration order.
    pub const ALL: [Self; 5] = [
        Self::Bucket,
        Self::Role,
        Self::Function,
        Self::Table,
        Self::Subscription,
    ];

    /// Returns the control plane kind identifier.
    #[must_use]
    pub const fn kind(self) -> &'static str {
        match self {
            Self::Bucket => "bucket",
            Self::Role => "role",
            Self::Function => "function",
            Self::Table => "table",
            Self::Subscription => "subscription",
        }
    }
}

impl DesiredValue {
    /// Creates a literal from anything convertible to JSON.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a reference to another instance's output field.
    pub fn reference(instance: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Reference {
            instance: instance.into(),
            field: field.into(),
        }
    }
}

impl DeploymentInstance {
    /// Creates an instance with an empty configuration.
    #[must_use]
    pub fn new(name: &str, resource_name: &str, resource_type: ResourceType) -> Self {
        Self {
            name: name.to_string(),
            resource_name: resource_name.to_string(),
            resource_type,
            desired_config: BTreeMap::new(),
        }
    }

    /// Adds a literal configuration value.
    #[must_use]
    pub fn with_literal(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.desired_config
            .insert(key.to_string(), DesiredValue::literal(value));
        self
    }

    /// Adds a reference to another instance's output.
    #[must_use]
    pub fn with_reference(mut self, key: &str, instance: &str, field: &str) -> Self {
        self.desired_config
            .insert(key.to_string(), DesiredValue::reference(instance, field));
        self
    }

    /// Returns the distinct instances this one references, in key order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&str> {
        let mut deps: Vec<&str> = Vec::new();
        for value in self.desired_config.values() {
            if let DesiredValue::Reference { instance, .. } = value
                && !deps.contains(&instance.as_str())
            {
                deps.push(instance);
            }
        }
        deps
    }

    /// Substitutes every reference with the referenced output value.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced instance or output field is missing.
    pub fn resolve(
        &self,
        outputs: &BTreeMap<String, OutputSet>,
    ) -> Result<ResolvedConfig, PlanError> {
        let mut resolved = Map::new();
        for (key, value) in &self.desired_config {
            let concrete = match value {
                DesiredValue::Literal(literal) => literal.clone(),
                DesiredValue::Reference { instance, field } => outputs
                    .get(instance)
                    .and_then(|set| set.get(field))
                    .map(|v| Value::String(v.clone()))
                    .ok_or_else(|| PlanError::MissingOutput {
                        instance: self.name.clone(),
                        target: instance.clone(),
                        field: field.clone(),
                    })?,
            };
            resolved.insert(key.clone(), concrete);
        }
        Ok(resolved)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}
