//! Local file-based state storage backend.
//!
//! Each deployment gets its own directory under the base directory holding
//! `state.json` and, while a run is in progress, `state.lock`. Every file is
//! written to a uniquely named temporary file in the same directory first and
//! then moved into place, so readers see either the old or the new content.
//! The lock is moved into place only if no lock file exists yet.

use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, StateError, StratumError};

use super::lock::{LockInfo, default_ttl, generate_holder_id};
use super::store::StateStore;
use super::types::DeploymentState;

/// Default state directory name.
pub const STATE_DIR: &str = ".stratum";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Attempts at creating the lock after evicting an expired one.
const LOCK_ATTEMPTS: usize = 3;

/// How a file is moved into place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    /// Replace whatever is there.
    Replace,
    /// Only create; leave an existing file alone.
    CreateNew,
}

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory holding one subdirectory per deployment.
    base_dir: PathBuf,
    /// Lifetime of a lock between renewals.
    lock_ttl: Duration,
}

impl LocalStateStore {
    /// Creates a store under `.stratum` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| StratumError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            lock_ttl: default_ttl(),
        }
    }

    /// Sets the lifetime of locks taken through this store.
    #[must_use]
    pub const fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    /// Returns the directory of a deployment.
    fn deployment_dir(&self, deployment: &str) -> Result<PathBuf> {
        let valid = !deployment.is_empty()
            && deployment != "."
            && deployment != ".."
            && !deployment.contains(['/', '\\']);
        if !valid {
            return Err(StratumError::State(StateError::write(format!(
                "invalid deployment name for a state path: '{deployment}'"
            ))));
        }
        Ok(self.base_dir.join(deployment))
    }

    fn state_path(&self, deployment: &str) -> Result<PathBuf> {
        Ok(self.deployment_dir(deployment)?.join(STATE_FILE))
    }

    fn lock_path(&self, deployment: &str) -> Result<PathBuf> {
        Ok(self.deployment_dir(deployment)?.join(LOCK_FILE))
    }

    /// Ensures the deployment directory exists.
    async fn ensure_dir(&self, deployment: &str) -> Result<()> {
        let dir = self.deployment_dir(deployment)?;
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(&dir).await.map_err(|e| {
                StratumError::State(StateError::write(format!("Failed to create state directory: {e}")))
            })?;
        }
        Ok(())
    }

    /// Writes `content` to `path` through a synced temporary file.
    ///
    /// Returns false if `placement` is [`Placement::CreateNew`] and the file
    /// already exists.
    async fn write_file(&self, path: &Path, content: String, placement: Placement) -> Result<bool> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || place_file(&path, content.as_bytes(), placement))
            .await
            .map_err(|e| StratumError::internal(format!("State writer task failed: {e}")))?
            .map_err(|e| StratumError::State(StateError::write(format!("Failed to write state file: {e}"))))
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self, deployment: &str) -> Result<Option<LockInfo>> {
        read_lock_at(&self.lock_path(deployment)?).await
    }

    /// Moves an expired lock out of the way.
    ///
    /// The lock file is renamed to a private name before it is inspected, so
    /// two callers cannot both evict it. If what was moved turns out to be a
    /// live lock written after `expired` was read, it is put back.
    async fn evict_expired(&self, deployment: &str, expired: &LockInfo) -> Result<()> {
        let lock_path = self.lock_path(deployment)?;
        let evicted = self
            .deployment_dir(deployment)?
            .join(format!("{LOCK_FILE}.{}.evicted", Uuid::new_v4().simple()));

        match fs::rename(&lock_path, &evicted).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(lock_failed(format!("Failed to evict expired lock: {e}"))),
        }

        if let Ok(Some(moved)) = read_lock_at(&evicted).await
            && moved.lock_id != expired.lock_id
            && !moved.is_expired()
        {
            if let Err(e) = fs::hard_link(&evicted, &lock_path).await {
                warn!("Could not restore lock {} of '{}': {e}", moved.lock_id, moved.holder);
            }
            remove_quietly(&evicted).await;
            return Err(locked_by(&moved));
        }

        debug!("Evicted expired lock {} held by {}", expired.lock_id, expired.holder);
        remove_quietly(&evicted).await;
        Ok(())
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self, deployment: &str) -> Result<()> {
        let lock_path = self.lock_path(deployment)?;
        match fs::remove_file(&lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(lock_failed(format!("Failed to delete lock file: {e}"))),
        }
    }
}

/// Writes a temporary file beside `path`, syncs it and moves it into place.
fn place_file(path: &Path, content: &[u8], placement: Placement) -> std::io::Result<bool> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    match placement {
        Placement::Replace => {
            temp.persist(path).map_err(|e| e.error)?;
            Ok(true)
        }
        Placement::CreateNew => match temp.persist_noclobber(path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        },
    }
}

async fn read_lock_at(path: &Path) -> Result<Option<LockInfo>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StratumError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            }));
        }
    };

    serde_json::from_str(&content).map(Some).map_err(|e| {
        StratumError::State(StateError::Corrupted {
            message: format!("Failed to parse lock file: {e}"),
        })
    })
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        debug!("Could not remove {}: {e}", path.display());
    }
}

fn locked_by(lock: &LockInfo) -> StratumError {
    StratumError::State(StateError::LockedByOther {
        holder: lock.holder.clone(),
        since: lock.acquired_at.to_rfc3339(),
    })
}

fn lock_failed(message: String) -> StratumError {
    StratumError::State(StateError::LockFailed { message })
}

fn lock_json(lock: &LockInfo) -> Result<String> {
    serde_json::to_string_pretty(lock).map_err(|e| {
        StratumError::State(StateError::serialization(format!("Failed to serialize lock: {e}")))
    })
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, deployment: &str) -> Result<DeploymentState> {
        let state_path = self.state_path(deployment)?;
        let content = match fs::read_to_string(&state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", state_path.display());
                return Ok(DeploymentState::new(deployment));
            }
            Err(e) => {
                return Err(StratumError::State(StateError::Corrupted {
                    message: format!("Failed to read state file: {e}"),
                }));
            }
        };

        info!("Loaded state from: {}", state_path.display());

        let state: DeploymentState = serde_json::from_str(&content).map_err(|e| {
            StratumError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;
        state.check_version()?;
        Ok(state)
    }

    async fn save(&self, deployment: &str, state: &DeploymentState) -> Result<()> {
        self.ensure_dir(deployment).await?;
        let state_path = self.state_path(deployment)?;

        debug!("Saving state to: {}", state_path.display());

        let content = serde_json::to_string_pretty(state).map_err(|e| {
            StratumError::State(StateError::serialization(format!("Failed to serialize state: {e}")))
        })?;

        self.write_file(&state_path, content, Placement::Replace).await?;
        Ok(())
    }

    async fn delete(&self, deployment: &str) -> Result<()> {
        let state_path = self.state_path(deployment)?;
        match fs::remove_file(&state_path).await {
            Ok(()) => {
                info!("Deleted state file: {}", state_path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StratumError::State(StateError::write(format!(
                "Failed to delete state file: {e}"
            )))),
        }
    }

    async fn exists(&self, deployment: &str) -> Result<bool> {
        Ok(self.state_path(deployment)?.exists())
    }

    async fn acquire_lock(&self, deployment: &str, holder: &str, operation: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let lock_info = LockInfo::with_ttl(deployment, &holder_id, self.lock_ttl).for_operation(operation);
        let content = lock_json(&lock_info)?;

        self.ensure_dir(deployment).await?;
        let lock_path = self.lock_path(deployment)?;

        for _ in 0..LOCK_ATTEMPTS {
            let created = self
                .write_file(&lock_path, content.clone(), Placement::CreateNew)
                .await
                .map_err(|e| lock_failed(e.to_string()))?;
            if created {
                info!(
                    "Acquired state lock: {} (expires in {}s)",
                    lock_info.lock_id,
                    lock_info.remaining_secs()
                );
                return Ok(lock_info);
            }

            match self.read_lock_file(deployment).await? {
                // Released between the create attempt and the read.
                None => {}
                Some(existing) if !existing.is_expired() => return Err(locked_by(&existing)),
                Some(existing) => {
                    debug!("Expired lock found, taking over");
                    self.evict_expired(deployment, &existing).await?;
                }
            }
        }

        match self.read_lock_file(deployment).await? {
            Some(existing) => Err(locked_by(&existing)),
            None => Err(lock_failed(format!("Lock on '{deployment}' is contended; retry"))),
        }
    }

    async fn refresh_lock(&self, deployment: &str, lock_id: &str) -> Result<LockInfo> {
        let current = self
            .read_lock_file(deployment)
            .await?
            .filter(|lock| lock.lock_id == lock_id)
            .ok_or_else(|| {
                StratumError::State(StateError::LockLost {
                    lock_id: lock_id.to_string(),
                })
            })?;

        let renewed = current.renewed(self.lock_ttl);
        self.write_file(&self.lock_path(deployment)?, lock_json(&renewed)?, Placement::Replace)
            .await
            .map_err(|e| lock_failed(e.to_string()))?;
        debug!("Renewed state lock {lock_id} until {}", renewed.expires_at);
        Ok(renewed)
    }

    async fn release_lock(&self, deployment: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(deployment).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(deployment).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!("Lock ID mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn force_unlock(&self, deployment: &str) -> Result<()> {
        self.delete_lock_file(deployment).await
    }

    async fn get_lock_info(&self, deployment: &str) -> Result<Option<LockInfo>> {
        self.read_lock_file(deployment).await
    }

    fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
