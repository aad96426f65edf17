//! Remote control plane integration.
//!
//! Adapters talk to the provider through the [`ControlPlane`] trait. Two
//! implementations ship: an HTTP client for a real endpoint and an in-memory
//! plane used for dry runs and tests.

mod client;
mod memory;
mod types;

use async_trait::async_trait;

use crate::error::CloudError;
use crate::planner::ResourceType;

pub use client::HttpControlPlane;
pub use memory::{FailurePoint, MemoryControlPlane};
pub use types::{CallerIdentity, RemoteResource, ResourceRequest};

/// Result type for control plane calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Operations the provider control plane exposes.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Returns the account the credentials belong to.
    async fn caller_identity(&self) -> CloudResult<CallerIdentity>;

    /// Creates the resource, or updates it in place if it already exists.
    async fn put_resource(&self, request: &ResourceRequest) -> CloudResult<RemoteResource>;

    /// Deletes a resource. Returns [`CloudError::NotFound`] if it does not exist.
    async fn delete_resource(&self, kind: ResourceType, region: &str, name: &str) -> CloudResult<()>;

    /// Returns a short name for logs.
    fn name(&self) -> &'static str;
}
