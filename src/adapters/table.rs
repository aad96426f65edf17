//! Key-value table adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cloud::{ControlPlane, ResourceRequest};
use crate::error::ProvisionError;
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

use super::{ResourceAdapter, decode, delete, put};

/// Provisions the table the function stores its data in.
pub struct TableAdapter {
    plane: Arc<dyn ControlPlane>,
}

#[derive(Debug, Deserialize)]
struct TableConfig {
    name: String,
    region: String,
    hash_key: String,
}

impl TableAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResourceAdapter for TableAdapter {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Table
    }

    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError> {
        let config: TableConfig = decode(ResourceType::Table, instance, config)?;
        let spec = json!({
            "attribute_definitions": [{ "name": config.hash_key, "type": "S" }],
            "key_schema": [{ "name": config.hash_key, "key_type": "HASH" }],
            "billing_mode": "PAY_PER_REQUEST",
        });
        let request = ResourceRequest::new(ResourceType::Table, &config.name, &config.region, spec);
        put(self.plane.as_ref(), instance, request).await
    }

    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError> {
        delete(self.plane.as_ref(), ResourceType::Table, instance, outputs).await
    }
}
