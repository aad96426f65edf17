//! Resource adapters.
//!
//! One adapter per resource type turns a resolved configuration into control
//! plane calls and reports the outputs other instances may reference. Removal
//! only needs the outputs recorded at apply time.

mod bucket;
mod function;
mod role;
mod subscription;
mod table;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cloud::{ControlPlane, RemoteResource, ResourceRequest};
use crate::error::{CloudError, PlanError, ProvisionError};
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

pub use bucket::BucketAdapter;
pub use function::{FunctionAdapter, code_digest};
pub use role::RoleAdapter;
pub use subscription::SubscriptionAdapter;
pub use table::TableAdapter;

/// Creates, updates and removes one type of remote resource.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceAdapter: Send + Sync {
    /// The resource type this adapter handles.
    fn resource_type(&self) -> ResourceType;

    /// Creates or updates the resource; applying twice has the effect of once.
    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError>;

    /// Removes the resource described by previously recorded outputs.
    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError>;

    /// Whether removal must wait until every dependent has been removed.
    fn removal_requires_dependents_gone(&self) -> bool {
        false
    }
}

/// Adapters keyed by the resource type they handle.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ResourceType, Box<dyn ResourceAdapter>>,
}

impl AdapterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with an adapter for every resource type.
    #[must_use]
    pub fn with_control_plane(plane: &Arc<dyn ControlPlane>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(BucketAdapter::new(Arc::clone(plane))));
        registry.register(Box::new(RoleAdapter::new(Arc::clone(plane))));
        registry.register(Box::new(FunctionAdapter::new(Arc::clone(plane))));
        registry.register(Box::new(TableAdapter::new(Arc::clone(plane))));
        registry.register(Box::new(SubscriptionAdapter::new(Arc::clone(plane))));
        debug!("Registered adapters against the {} control plane", plane.name());
        registry
    }

    /// Registers an adapter, replacing any adapter for the same type.
    pub fn register(&mut self, adapter: Box<dyn ResourceAdapter>) {
        self.adapters.insert(adapter.resource_type(), adapter);
    }

    /// Returns the adapter for a resource type.
    ///
    /// # Errors
    ///
    /// Returns an error if no adapter is registered for the type.
    pub fn get(&self, resource_type: ResourceType) -> Result<&dyn ResourceAdapter, PlanError> {
        self.adapters
            .get(&resource_type)
            .map(|adapter| &**adapter)
            .ok_or(PlanError::MissingAdapter { resource_type })
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.adapters.keys().collect();
        types.sort();
        f.debug_struct("AdapterRegistry").field("types", &types).finish()
    }
}

/// Deserializes a resolved configuration into an adapter's typed view.
fn decode<T: DeserializeOwned>(
    resource_type: ResourceType,
    instance: &str,
    config: &ResolvedConfig,
) -> Result<T, ProvisionError> {
    serde_json::from_value(Value::Object(config.clone()))
        .map_err(|e| ProvisionError::apply(resource_type, instance, format!("invalid configuration: {e}")))
}

/// Puts a resource and returns the standard outputs.
async fn put(
    plane: &dyn ControlPlane,
    instance: &str,
    request: ResourceRequest,
) -> Result<OutputSet, ProvisionError> {
    let resource_type = request.kind;
    info!("Applying {resource_type} '{instance}' as {}", request.name);

    let resource = plane
        .put_resource(&request)
        .await
        .map_err(|e| ProvisionError::apply(resource_type, instance, e))?;

    Ok(base_outputs(&request, resource))
}

/// Deletes the resource named in recorded outputs. A missing resource counts as removed.
async fn delete(
    plane: &dyn ControlPlane,
    resource_type: ResourceType,
    instance: &str,
    outputs: &OutputSet,
) -> Result<(), ProvisionError> {
    let name = outputs
        .get("name")
        .ok_or_else(|| ProvisionError::remove(resource_type, instance, "recorded outputs have no name"))?;
    let region = outputs.get("region").map_or("", String::as_str);

    info!("Removing {resource_type} '{instance}' ({name})");
    match plane.delete_resource(resource_type, region, name).await {
        Ok(()) => Ok(()),
        Err(CloudError::NotFound { .. }) => {
            debug!("{resource_type} {name} already gone");
            Ok(())
        }
        Err(e) => Err(ProvisionError::remove(resource_type, instance, e)),
    }
}

fn base_outputs(request: &ResourceRequest, resource: RemoteResource) -> OutputSet {
    let mut outputs = resource.attributes;
    outputs.insert(String::from("name"), request.name.clone());
    outputs.insert(String::from("region"), request.region.clone());
    outputs.insert(String::from("id"), resource.id);
    outputs.insert(String::from("arn"), resource.arn);
    outputs
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use crate::cloud::{ControlPlane, MemoryControlPlane};

    /// A memory plane shared as both its concrete and trait object type.
    pub(crate) fn memory_plane() -> (Arc<MemoryControlPlane>, Arc<dyn ControlPlane>) {
        let plane = Arc::new(MemoryControlPlane::new("123456789012"));
        let shared: Arc<dyn ControlPlane> = plane.clone();
        (plane, shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_covers_every_type() {
        let (_, plane) = testing::memory_plane();
        let registry = AdapterRegistry::with_control_plane(&plane);
        for rt in ResourceType::ALL {
            let adapter = registry.get(rt).expect("adapter should be registered");
            assert_eq!(adapter.resource_type(), rt);
            assert!(!adapter.removal_requires_dependents_gone());
        }
    }

    #[test]
    fn test_missing_adapter() {
        let registry = AdapterRegistry::new();
        let err = registry.get(ResourceType::Table).err().expect("lookup should fail");
        assert!(matches!(err, PlanError::MissingAdapter { resource_type: ResourceType::Table }));
    }

    #[test]
    fn test_registered_mock_replaces_default() {
        let (_, plane) = testing::memory_plane();
        let mut registry = AdapterRegistry::with_control_plane(&plane);

        let mut mock = MockResourceAdapter::new();
        mock.expect_resource_type().return_const(ResourceType::Bucket);
        mock.expect_removal_requires_dependents_gone().return_const(true);
        registry.register(Box::new(mock));

        let adapter = registry.get(ResourceType::Bucket).expect("adapter");
        assert!(adapter.removal_requires_dependents_gone());
    }
}
