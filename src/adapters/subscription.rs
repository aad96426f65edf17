//! Topic subscription adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cloud::{ControlPlane, ResourceRequest};
use crate::error::ProvisionError;
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

use super::{ResourceAdapter, decode, delete, put};

/// Subscribes the function to the notification topic.
pub struct SubscriptionAdapter {
    plane: Arc<dyn ControlPlane>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionConfig {
    name: String,
    region: String,
    topic: String,
    protocol: String,
    endpoint: String,
}

impl SubscriptionAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResourceAdapter for SubscriptionAdapter {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Subscription
    }

    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError> {
        let config: SubscriptionConfig = decode(ResourceType::Subscription, instance, config)?;
        let spec = json!({
            "topic": config.topic,
            "protocol": config.protocol,
            "endpoint": config.endpoint,
        });
        let request = ResourceRequest::new(ResourceType::Subscription, &config.name, &config.region, spec);

        let mut outputs = put(self.plane.as_ref(), instance, request).await?;
        outputs.insert(String::from("topic"), config.topic);
        Ok(outputs)
    }

    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError> {
        delete(self.plane.as_ref(), ResourceType::Subscription, instance, outputs).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::memory_plane;

    #[tokio::test]
    async fn test_subscription_targets_function_endpoint() {
        let (memory, plane) = memory_plane();
        let adapter = SubscriptionAdapter::new(plane);

        let mut config = ResolvedConfig::new();
        config.insert(String::from("name"), json!("svc-sub"));
        config.insert(String::from("region"), json!("us-east-1"));
        config.insert(String::from("topic"), json!("arn:aws:sns:us-east-1:1:svc-topic"));
        config.insert(String::from("protocol"), json!("lambda"));
        config.insert(String::from("endpoint"), json!("arn:fn"));

        let outputs = adapter.apply("subscription", &config).await.expect("apply should succeed");
        assert_eq!(outputs["topic"], "arn:aws:sns:us-east-1:1:svc-topic");
        assert!(outputs["arn"].starts_with("arn:aws:sns:us-east-1:1:svc-topic:"));

        let spec = memory.spec(ResourceType::Subscription, "svc-sub").expect("spec stored");
        assert_eq!(spec["endpoint"], json!("arn:fn"));
    }
}
