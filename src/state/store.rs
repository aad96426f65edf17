//! State store trait definition.
//!
//! Every operation is keyed by deployment name, so one store can hold the
//! records of many deployments.

use async_trait::async_trait;
use std::time::Duration;

use super::lock::{LockInfo, default_ttl};
use super::types::DeploymentState;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads a deployment's state.
    ///
    /// A deployment with no record yields an empty state.
    async fn load(&self, deployment: &str) -> Result<DeploymentState>;

    /// Saves a deployment's state, replacing any previous record atomically.
    async fn save(&self, deployment: &str, state: &DeploymentState) -> Result<()>;

    /// Deletes a deployment's state. Deleting a missing record succeeds.
    async fn delete(&self, deployment: &str) -> Result<()>;

    /// Checks if a record exists.
    async fn exists(&self, deployment: &str) -> Result<bool>;

    /// Acquires the deployment's lock.
    ///
    /// Creating the lock is atomic: of two overlapping callers exactly one
    /// succeeds and the other gets [`StateError::LockedByOther`]. An expired
    /// lock is taken over.
    ///
    /// [`StateError::LockedByOther`]: crate::error::StateError::LockedByOther
    async fn acquire_lock(&self, deployment: &str, holder: &str, operation: &str) -> Result<LockInfo>;

    /// Pushes the expiry of a held lock to a full lifetime from now.
    ///
    /// Fails with [`StateError::LockLost`] if `lock_id` no longer holds it.
    ///
    /// [`StateError::LockLost`]: crate::error::StateError::LockLost
    async fn refresh_lock(&self, deployment: &str, lock_id: &str) -> Result<LockInfo>;

    /// Releases the deployment's lock if `lock_id` still holds it.
    async fn release_lock(&self, deployment: &str, lock_id: &str) -> Result<()>;

    /// Removes the deployment's lock whoever holds it.
    async fn force_unlock(&self, deployment: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self, deployment: &str) -> Result<Option<LockInfo>>;

    /// Checks whether a live, unexpired lock is held.
    async fn is_locked(&self, deployment: &str) -> Result<bool> {
        Ok(self
            .get_lock_info(deployment)
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Lifetime of a lock between renewals.
    fn lock_ttl(&self) -> Duration {
        default_ttl()
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self, deployment: &str) -> Result<DeploymentState> {
        (**self).load(deployment).await
    }

    async fn save(&self, deployment: &str, state: &DeploymentState) -> Result<()> {
        (**self).save(deployment, state).await
    }

    async fn delete(&self, deployment: &str) -> Result<()> {
        (**self).delete(deployment).await
    }

    async fn exists(&self, deployment: &str) -> Result<bool> {
        (**self).exists(deployment).await
    }

    async fn acquire_lock(&self, deployment: &str, holder: &str, operation: &str) -> Result<LockInfo> {
        (**self).acquire_lock(deployment, holder, operation).await
    }

    async fn refresh_lock(&self, deployment: &str, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(deployment, lock_id).await
    }

    async fn release_lock(&self, deployment: &str, lock_id: &str) -> Result<()> {
        (**self).release_lock(deployment, lock_id).await
    }

    async fn force_unlock(&self, deployment: &str) -> Result<()> {
        (**self).force_unlock(deployment).await
    }

    async fn get_lock_info(&self, deployment: &str) -> Result<Option<LockInfo>> {
        (**self).get_lock_info(deployment).await
    }

    fn lock_ttl(&self) -> Duration {
        (**self).lock_ttl()
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
