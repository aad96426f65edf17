//! S3-based state storage backend.
//!
//! Records live under `{prefix}{deployment}/state.json` with the lock beside
//! them, so several deployments can share one bucket. Lock writes are
//! conditional puts: creation uses `If-None-Match: *` and takeover or renewal
//! uses `If-Match` on the `ETag` that was read.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StateError, StratumError};

use super::lock::{LockInfo, default_ttl, generate_holder_id};
use super::store::StateStore;
use super::types::DeploymentState;

/// State object name.
const STATE_KEY: &str = "state.json";

/// Lock object name.
const LOCK_KEY: &str = "state.lock";

/// Precondition of a lock write.
#[derive(Debug)]
enum LockWrite<'a> {
    /// The lock object must not exist.
    Create,
    /// The lock object must still carry this `ETag`.
    Replace(&'a str),
}

/// An object body with its `ETag`.
#[derive(Debug)]
struct StoredObject {
    content: String,
    e_tag: Option<String>,
}

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
    lock_ttl: Duration,
}

impl S3StateStore {
    /// Creates a store, loading AWS credentials from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket name is empty.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        if bucket.trim().is_empty() {
            return Err(StratumError::State(StateError::s3("state bucket name is empty")));
        }

        let config = match region {
            Some(region) => {
                aws_config::from_env()
                    .region(aws_config::Region::new(region.to_string()))
                    .load()
                    .await
            }
            None => aws_config::load_from_env().await,
        };

        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a store around an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
            lock_ttl: default_ttl(),
        }
    }

    /// Sets the lifetime of locks taken through this store.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    fn key(&self, deployment: &str, object: &str) -> String {
        object_key(&self.prefix, deployment, object)
    }

    async fn get_object(&self, key: &str) -> Result<Option<StoredObject>> {
        let result = self.client.get_object().bucket(&self.bucket).key(key).send().await;

        match result {
            Ok(response) => {
                let e_tag = response.e_tag().map(String::from);
                let bytes = response.body.collect().await.map_err(|e| {
                    StratumError::State(StateError::s3(format!("Failed to read S3 object: {e}")))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    StratumError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;

                Ok(Some(StoredObject { content, e_tag }))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(StratumError::State(StateError::s3(format!("S3 get error: {service_err}"))))
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StratumError::State(StateError::s3(format!("S3 put error: {e}"))))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StratumError::State(StateError::s3(format!("S3 delete error: {e}"))))?;
        Ok(())
    }

    /// Writes the lock object if `condition` holds. Returns false if it does not.
    async fn put_lock(&self, deployment: &str, lock: &LockInfo, condition: LockWrite<'_>) -> Result<bool> {
        let content = serde_json::to_string_pretty(lock).map_err(|e| {
            StratumError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
        })?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(deployment, LOCK_KEY))
            .body(content.into_bytes().into())
            .content_type("application/json");
        let request = match condition {
            LockWrite::Create => request.if_none_match("*"),
            LockWrite::Replace(e_tag) => request.if_match(e_tag),
        };

        match request.send().await {
            Ok(_) => Ok(true),
            Err(e) if is_precondition_failure(&e) => Ok(false),
            Err(e) => Err(StratumError::State(StateError::LockFailed {
                message: format!("S3 lock put error: {e}"),
            })),
        }
    }

    async fn read_lock(&self, deployment: &str) -> Result<Option<(LockInfo, Option<String>)>> {
        let Some(object) = self.get_object(&self.key(deployment, LOCK_KEY)).await? else {
            return Ok(None);
        };
        let lock = serde_json::from_str(&object.content).map_err(|e| {
            StratumError::State(StateError::Corrupted {
                message: format!("Failed to parse lock: {e}"),
            })
        })?;
        Ok(Some((lock, object.e_tag)))
    }
}

/// True when a conditional write lost to a concurrent writer.
fn is_precondition_failure<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    let by_code = matches!(err.code(), Some("PreconditionFailed" | "ConditionalRequestConflict"));
    let by_status = err.raw_response().is_some_and(|raw| {
        let status = raw.status().as_u16();
        status == 409 || status == 412
    });
    by_code || by_status
}

fn locked_by(lock: LockInfo) -> StratumError {
    StratumError::State(StateError::LockedByOther {
        holder: lock.holder,
        since: lock.acquired_at.to_rfc3339(),
    })
}

/// Normalizes a key prefix to either empty or `segment/`.
fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .unwrap_or_default()
}

fn object_key(prefix: &str, deployment: &str, object: &str) -> String {
    format!("{prefix}{deployment}/{object}")
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, deployment: &str) -> Result<DeploymentState> {
        let key = self.key(deployment, STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(object) = self.get_object(&key).await? else {
            debug!("No state found in S3 for {deployment}");
            return Ok(DeploymentState::new(deployment));
        };

        let state: DeploymentState = serde_json::from_str(&object.content).map_err(|e| {
            StratumError::State(StateError::Corrupted {
                message: format!("Failed to parse state: {e}"),
            })
        })?;
        state.check_version()?;
        info!("Loaded state for deployment: {}", state.name);
        Ok(state)
    }

    async fn save(&self, deployment: &str, state: &DeploymentState) -> Result<()> {
        let key = self.key(deployment, STATE_KEY);
        debug!("Saving state to s3://{}/{key}", self.bucket);

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StratumError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;

        // A single PutObject replaces the object whole, so readers never see
        // a partially written record.
        self.put_object(&key, content).await
    }

    async fn delete(&self, deployment: &str) -> Result<()> {
        let key = self.key(deployment, STATE_KEY);
        info!("Deleting state from s3://{}/{key}", self.bucket);
        self.delete_object(&key).await
    }

    async fn exists(&self, deployment: &str) -> Result<bool> {
        let key = self.key(deployment, STATE_KEY);
        let result = self.client.head_object().bucket(&self.bucket).key(&key).send().await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StratumError::State(StateError::s3(format!("S3 head error: {service_err}"))))
                }
            }
        }
    }

    async fn acquire_lock(&self, deployment: &str, holder: &str, operation: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::with_ttl(deployment, &holder_id, self.lock_ttl).for_operation(operation);

        if self.put_lock(deployment, &lock_info, LockWrite::Create).await? {
            info!(
                "Acquired state lock: {} (expires in {}s)",
                lock_info.lock_id,
                lock_info.remaining_secs()
            );
            return Ok(lock_info);
        }

        let Some((existing, e_tag)) = self.read_lock(deployment).await? else {
            return Err(StratumError::State(StateError::LockFailed {
                message: format!("Lock on '{deployment}' is contended; retry"),
            }));
        };
        if !existing.is_expired() {
            return Err(locked_by(existing));
        }

        debug!("Expired lock found, taking over");
        let Some(e_tag) = e_tag else {
            return Err(StratumError::State(StateError::LockFailed {
                message: String::from("S3 returned the expired lock without an ETag"),
            }));
        };
        if self.put_lock(deployment, &lock_info, LockWrite::Replace(&e_tag)).await? {
            info!("Took over expired state lock: {}", lock_info.lock_id);
            return Ok(lock_info);
        }

        match self.read_lock(deployment).await? {
            Some((winner, _)) => Err(locked_by(winner)),
            None => Err(StratumError::State(StateError::LockFailed {
                message: format!("Lock on '{deployment}' is contended; retry"),
            })),
        }
    }

    async fn refresh_lock(&self, deployment: &str, lock_id: &str) -> Result<LockInfo> {
        let lost = || {
            StratumError::State(StateError::LockLost {
                lock_id: lock_id.to_string(),
            })
        };
        let Some((current, Some(e_tag))) = self.read_lock(deployment).await? else {
            return Err(lost());
        };
        if current.lock_id != lock_id {
            return Err(lost());
        }

        let renewed = current.renewed(self.lock_ttl);
        if self.put_lock(deployment, &renewed, LockWrite::Replace(&e_tag)).await? {
            debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
            Ok(renewed)
        } else {
            Err(lost())
        }
    }

    async fn release_lock(&self, deployment: &str, lock_id: &str) -> Result<()> {
        if let Some((existing, _)) = self.read_lock(deployment).await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(deployment, LOCK_KEY)).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn force_unlock(&self, deployment: &str) -> Result<()> {
        self.delete_object(&self.key(deployment, LOCK_KEY)).await
    }

    async fn get_lock_info(&self, deployment: &str) -> Result<Option<LockInfo>> {
        Ok(self.read_lock(deployment).await?.map(|(lock, _)| lock))
    }

    fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}
