//! Deployment configuration types for the provisioning engine.
//!
//! This module defines the structs that map to `stratum.deploy.yaml`. Every
//! field has a default; user input is deep-merged over [`DeployConfig::default`]
//! before it is deserialized into these types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use crate::policy::PermissionIntent;

/// Default deployment name.
pub const DEFAULT_NAME: &str = "process-service";

/// Default region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default code directory.
pub const DEFAULT_CODE: &str = "./code";

/// Default function memory in MB.
pub const DEFAULT_MEMORY_MB: u32 = 896;

/// Default function timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// Default function runtime.
pub const DEFAULT_RUNTIME: &str = "nodejs20.x";

/// Default function handler (the response-normalising shim).
pub const DEFAULT_HANDLER: &str = "shim.handler";

/// The root configuration structure for a deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
#[serde(default)]
pub struct DeployConfig {
    /// Base name for every provisioned resource.
    #[validate(length(min = 1, max = 40, message = "name must be 1-40 characters"))]
    pub name: String,
    /// Region to deploy into.
    #[validate(length(min = 1, message = "region cannot be empty"))]
    pub region: String,
    /// Path to the function code directory.
    #[validate(length(min = 1, message = "code path cannot be empty"))]
    pub code: String,
    /// Function description.
    pub description: Option<String>,
    /// Function memory in MB.
    #[validate(range(min = 128, max = 10240, message = "memory must be between 128 and 10240 MB"))]
    pub memory: u32,
    /// Function timeout in seconds.
    #[validate(range(min = 1, max = 900, message = "timeout must be between 1 and 900 seconds"))]
    pub timeout: u32,
    /// Function environment variables.
    pub env: BTreeMap<String, String>,
    /// Permission intent for the execution role.
    pub permissions: Option<PermissionIntent>,
    /// Notification topic the function subscribes to.
    pub topic: Option<String>,
    /// Function runtime identifier.
    pub runtime: String,
    /// Function handler entry point.
    pub handler: String,
    /// State backend configuration.
    pub state: StateConfig,
    /// Remote control plane configuration.
    pub control_plane: ControlPlaneConfig,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StateConfig {
    /// Backend type (local or s3).
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    pub region: Option<String>,
    /// Local state directory (for local backend).
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Remote control plane configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// HTTP endpoint; the in-memory control plane is used when absent.
    pub endpoint: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            region: DEFAULT_REGION.to_string(),
            code: DEFAULT_CODE.to_string(),
            description: None,
            memory: DEFAULT_MEMORY_MB,
            timeout: DEFAULT_TIMEOUT_SECS,
            env: BTreeMap::new(),
            permissions: None,
            topic: None,
            runtime: DEFAULT_RUNTIME.to_string(),
            handler: DEFAULT_HANDLER.to_string(),
            state: StateConfig::default(),
            control_plane: ControlPlaneConfig::default(),
        }
    }
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: 30,
        }
    }
}

impl DeployConfig {
    /// Returns the function description, falling back to one derived from the name.
    #[must_use]
    pub fn function_description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("A function for the {} process component", self.name))
    }

    /// Returns the subscription topic, deriving one from the caller account if unset.
    #[must_use]
    pub fn topic_arn(&self, account: Option<&str>) -> Option<String> {
        self.topic.clone().or_else(|| {
            account.map(|account| {
                format!("arn:aws:sns:{}:{account}:{}-topic", self.region, self.name)
            })
        })
    }
}
