//! In-memory control plane.
//!
//! Resources live in a map keyed by kind and name. ARNs are derived from the
//! account, region and name, so repeated puts of the same resource return the
//! same identity. Failures and latency can be injected per kind.

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::error::CloudError;
use crate::planner::ResourceType;

use super::types::{CallerIdentity, RemoteResource, ResourceRequest};
use super::{CloudResult, ControlPlane};

/// Account id reported when none is configured.
const DEFAULT_ACCOUNT: &str = "000000000000";

/// Which call an injected failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// Create or update.
    Put,
    /// Delete.
    Delete,
}

/// A stored resource.
#[derive(Debug, Clone)]
struct Stored {
    resource: RemoteResource,
    region: String,
    spec: Value,
}

#[derive(Debug, Default)]
struct Inner {
    resources: BTreeMap<(ResourceType, String), Stored>,
    failures: HashSet<(ResourceType, FailurePoint)>,
    latency: HashMap<ResourceType, Duration>,
    calls: Vec<String>,
    creations: usize,
}

/// An in-memory control plane.
#[derive(Debug)]
pub struct MemoryControlPlane {
    account: String,
    inner: Mutex<Inner>,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new(DEFAULT_ACCOUNT)
    }
}

impl MemoryControlPlane {
    /// Creates an empty plane for an account.
    #[must_use]
    pub fn new(account: &str) -> Self {
        Self {
            account: account.to_string(),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Makes every call of a kind at a point fail until cleared.
    pub fn fail(&self, kind: ResourceType, point: FailurePoint) {
        self.lock().failures.insert((kind, point));
    }

    /// Clears every injected failure.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Delays every call of a kind.
    pub fn set_latency(&self, kind: ResourceType, latency: Duration) {
        self.lock().latency.insert(kind, latency);
    }

    /// Returns true if a resource exists.
    #[must_use]
    pub fn contains(&self, kind: ResourceType, name: &str) -> bool {
        self.lock().resources.contains_key(&(kind, name.to_string()))
    }

    /// Returns the last spec put for a resource.
    #[must_use]
    pub fn spec(&self, kind: ResourceType, name: &str) -> Option<Value> {
        self.lock()
            .resources
            .get(&(kind, name.to_string()))
            .map(|s| s.spec.clone())
    }

    /// Returns the region a resource was put in.
    #[must_use]
    pub fn region(&self, kind: ResourceType, name: &str) -> Option<String> {
        self.lock()
            .resources
            .get(&(kind, name.to_string()))
            .map(|s| s.region.clone())
    }

    /// Returns the number of live resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.lock().resources.len()
    }

    /// Returns how many resources were created (updates excluded).
    #[must_use]
    pub fn creation_count(&self) -> usize {
        self.lock().creations
    }

    /// Returns every call as `"<op> <kind> <name>"`, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Records a call and returns the configured latency and whether it should fail.
    fn enter(&self, op: &str, kind: ResourceType, name: &str, point: FailurePoint) -> (Option<Duration>, bool) {
        let mut inner = self.lock();
        inner.calls.push(format!("{op} {kind} {name}"));
        (
            inner.latency.get(&kind).copied(),
            inner.failures.contains(&(kind, point)),
        )
    }

    fn arn(&self, request: &ResourceRequest) -> String {
        let account = &self.account;
        let region = &request.region;
        let name = &request.name;
        match request.kind {
            ResourceType::Bucket => format!("arn:aws:s3:::{name}"),
            ResourceType::Role => format!("arn:aws:iam::{account}:role/{name}"),
            ResourceType::Function => format!("arn:aws:lambda:{region}:{account}:function:{name}"),
            ResourceType::Table => format!("arn:aws:dynamodb:{region}:{account}:table/{name}"),
            ResourceType::Subscription => {
                let topic = request
                    .spec
                    .get("topic")
                    .and_then(Value::as_str)
                    .unwrap_or("topic");
                let digest = hex::encode(Sha256::digest(name.as_bytes()));
                format!("{topic}:{}", &digest[..16])
            }
        }
    }
}

#[async_trait]
impl ControlPlane for MemoryControlPlane {
    async fn caller_identity(&self) -> CloudResult<CallerIdentity> {
        Ok(CallerIdentity {
            account: self.account.clone(),
        })
    }

    async fn put_resource(&self, request: &ResourceRequest) -> CloudResult<RemoteResource> {
        let (latency, fail) = self.enter("put", request.kind, &request.name, FailurePoint::Put);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(CloudError::api_error(500, format!("injected failure putting {}", request.name)));
        }

        let arn = self.arn(request);
        let mut inner = self.lock();
        let key = (request.kind, request.name.clone());
        let resource = match inner.resources.get(&key) {
            Some(existing) => existing.resource.clone(),
            None => {
                inner.creations += 1;
                RemoteResource {
                    id: format!("{}-{}", request.kind, inner.creations),
                    arn,
                    attributes: BTreeMap::new(),
                }
            }
        };

        debug!("Memory plane stored {} {}", request.kind, request.name);
        inner.resources.insert(
            key,
            Stored {
                resource: resource.clone(),
                region: request.region.clone(),
                spec: request.spec.clone(),
            },
        );
        Ok(resource)
    }

    async fn delete_resource(&self, kind: ResourceType, _region: &str, name: &str) -> CloudResult<()> {
        let (latency, fail) = self.enter("delete", kind, name, FailurePoint::Delete);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(CloudError::api_error(500, format!("injected failure deleting {name}")));
        }

        match self.lock().resources.remove(&(kind, name.to_string())) {
            Some(_) => Ok(()),
            None => Err(CloudError::NotFound {
                kind: kind.kind().to_string(),
                name: name.to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(kind: ResourceType, name: &str) -> ResourceRequest {
        ResourceRequest::new(kind, name, "us-east-1", json!({"topic": "arn:aws:sns:us-east-1:1:t"}))
    }

    #[tokio::test]
    async fn test_put_is_an_upsert() {
        let plane = MemoryControlPlane::new("123456789012");
        let first = plane
            .put_resource(&request(ResourceType::Function, "fn"))
            .await
            .expect("put");
        let second = plane
            .put_resource(&request(ResourceType::Function, "fn"))
            .await
            .expect("put");

        assert_eq!(first, second);
        assert_eq!(first.arn, "arn:aws:lambda:us-east-1:123456789012:function:fn");
        assert_eq!(plane.creation_count(), 1);
        assert_eq!(plane.resource_count(), 1);
    }

    #[tokio::test]
    async fn test_subscription_arn_is_under_topic() {
        let plane = MemoryControlPlane::default();
        let resource = plane
            .put_resource(&request(ResourceType::Subscription, "sub"))
            .await
            .expect("put");
        assert!(resource.arn.starts_with("arn:aws:sns:us-east-1:1:t:"));
    }

    #[tokio::test]
    async fn test_delete_missing_is_not_found() {
        let plane = MemoryControlPlane::default();
        let err = plane
            .delete_resource(ResourceType::Bucket, "us-east-1", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, CloudError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let plane = MemoryControlPlane::default();
        plane.fail(ResourceType::Table, FailurePoint::Put);
        assert!(plane.put_resource(&request(ResourceType::Table, "t")).await.is_err());
        assert!(!plane.contains(ResourceType::Table, "t"));

        plane.clear_failures();
        assert!(plane.put_resource(&request(ResourceType::Table, "t")).await.is_ok());
        assert_eq!(plane.calls(), vec!["put table t", "put table t"]);
    }
}
