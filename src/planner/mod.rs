//! Planning module for deployment operations.
//!
//! This module models a deployment as a graph of typed instances, orders the
//! graph and compares it against recorded state.

mod diff;
mod graph;
mod instance;
mod plan;
mod topology;

pub use diff::{DiffEngine, DiffResult, DiffType, InstanceDiff};
pub use graph::DependencyGraph;
pub use instance::{DeploymentInstance, DesiredValue, OutputSet, ResolvedConfig, ResourceType};
pub use plan::DeploymentPlan;
pub use topology::{
    BUCKET, DeploymentOutputs, FUNCTION, ROLE, ROLE_SERVICE, SUBSCRIPTION, SUBSCRIPTION_PROTOCOL, TABLE,
    TABLE_HASH_KEY, build_topology, generate_resource_id, physical_name,
};
