//! Function adapter.
//!
//! The function's code directory is digested so that an unchanged directory
//! produces an identical spec and a changed one is redeployed.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cloud::{ControlPlane, ResourceRequest};
use crate::error::ProvisionError;
use crate::planner::{OutputSet, ResolvedConfig, ResourceType};

use super::{ResourceAdapter, decode, delete, put};

/// Provisions the serverless function.
pub struct FunctionAdapter {
    plane: Arc<dyn ControlPlane>,
}

#[derive(Debug, Deserialize)]
struct FunctionConfig {
    name: String,
    region: String,
    description: String,
    memory: u32,
    timeout: u32,
    runtime: String,
    handler: String,
    code: PathBuf,
    #[serde(default)]
    env: BTreeMap<String, String>,
    role: String,
    bucket: String,
}

impl FunctionAdapter {
    /// Creates the adapter.
    #[must_use]
    pub fn new(plane: Arc<dyn ControlPlane>) -> Self {
        Self { plane }
    }
}

#[async_trait]
impl ResourceAdapter for FunctionAdapter {
    fn resource_type(&self) -> ResourceType {
        ResourceType::Function
    }

    async fn apply(&self, instance: &str, config: &ResolvedConfig) -> Result<OutputSet, ProvisionError> {
        let config: FunctionConfig = decode(ResourceType::Function, instance, config)?;

        let code = config.code.clone();
        let digest = tokio::task::spawn_blocking(move || code_digest(&code))
            .await
            .map_err(|e| ProvisionError::apply(ResourceType::Function, instance, e))?
            .map_err(|e| {
                ProvisionError::apply(
                    ResourceType::Function,
                    instance,
                    format!("cannot read code directory {}: {e}", config.code.display()),
                )
            })?;
        debug!("Code digest for {}: {digest}", config.name);

        let spec = json!({
            "description": config.description,
            "memory_mb": config.memory,
            "timeout_secs": config.timeout,
            "runtime": config.runtime,
            "handler": config.handler,
            "environment": config.env,
            "role": config.role,
            "code": {
                "bucket": config.bucket,
                "key": format!("{}/{digest}.zip", config.name),
                "sha256": digest,
            },
        });
        let request = ResourceRequest::new(ResourceType::Function, &config.name, &config.region, spec);

        let mut outputs = put(self.plane.as_ref(), instance, request).await?;
        outputs.insert(String::from("code_sha256"), digest);
        Ok(outputs)
    }

    async fn remove(&self, instance: &str, outputs: &OutputSet) -> Result<(), ProvisionError> {
        delete(self.plane.as_ref(), ResourceType::Function, instance, outputs).await
    }
}

/// Computes a SHA-256 digest over every file under a directory.
///
/// Files are visited in sorted relative-path order and both the path and the
/// contents feed the digest, so renames change it too.
///
/// # Errors
///
/// Returns an error if the directory or one of its files cannot be read.
pub fn code_digest(dir: &Path) -> std::io::Result<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut hasher = Sha256::new();
    for relative in files {
        let contents = std::fs::read(dir.join(&relative))?;
        hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
        hasher.update([0u8]);
        hasher.update((contents.len() as u64).to_be_bytes());
        hasher.update(&contents);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn collect_files(root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(())
}
