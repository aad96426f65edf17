//! Execution role adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cloud::{ControlPlane, ResourceRequest};
use crate::error::ProvisionError;
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

use super::{ResourceAdapter, decode, delete, put};

/// Provisions the role the function executes as.
pub struct RoleAdapter {
    plane: Arc<dyn ControlPlane>,
}

#[derive(Debug, Deserialize)]
struct RoleConfig {
    name: String,
    region: String,
    service: String,
    policy: Value,
}

impl RoleAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResourceAdapter for RoleAdapter {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Role
    }

    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError> {
        let config: RoleConfig = decode(ResourceType::Role, instance, config)?;
        let spec = json!({
            "assume_role_policy": {
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Principal": { "Service": config.service },
                    "Action": "sts:AssumeRole"
                }]
            },
            "policy": config.policy,
        });
        let request = ResourceRequest::new(ResourceType::Role, &config.name, &config.region, spec);
        put(self.plane.as_ref(), instance, request).await
    }

    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError> {
        delete(self.plane.as_ref(), ResourceType::Role, instance, outputs).await
    }
}
