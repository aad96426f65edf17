//! Code bucket adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cloud::{ControlPlane, ResourceRequest};
use crate::error::ProvisionError;
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

use super::{ResourceAdapter, decode, delete, put};

/// Provisions the object store bucket that holds function code.
pub struct BucketAdapter {
    plane: Arc<dyn ControlPlane>,
}

#[derive(Debug, Deserialize)]
struct BucketConfig {
    name: String,
    region: String,
}

impl BucketAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResourceAdapter for BucketAdapter {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Bucket
    }

    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError> {
        let config: BucketConfig = decode(ResourceType::Bucket, instance, config)?;
        let request = ResourceRequest::new(
            ResourceType::Bucket,
            &config.name,
            &config.region,
            json!({ "versioning": false }),
        );
        put(self.plane.as_ref(), instance, request).await
    }

    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError> {
        delete(self.plane.as_ref(), ResourceType::Bucket, instance, outputs).await
    }
}
