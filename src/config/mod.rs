//! Configuration module for the Stratum provisioning engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing `stratum.deploy.yaml` and merging it over the defaults
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod merge;
mod parser;
mod spec;
mod validator;

pub use self::validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
pub use merge::deep_merge;
pub use parser::{
    ConfigParser, DEFAULT_CONFIG_FILES, ENV_API_TOKEN, ENV_CONTROL_PLANE_URL, ENV_NAME, ENV_REGION,
    ENV_STATE_BUCKET, ENV_STATE_PREFIX, find_config_file, resolve,
};
pub use spec::{
    ControlPlaneConfig, DEFAULT_CODE, DEFAULT_HANDLER, DEFAULT_MEMORY_MB, DEFAULT_NAME, DEFAULT_REGION,
    DEFAULT_RUNTIME, DEFAULT_TIMEOUT_SECS, DeployConfig, StateBackend, StateConfig,
};
