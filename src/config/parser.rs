//! Configuration parser for loading and resolving configuration files.
//!
//! User input is parsed as loosely typed YAML, deep-merged over the defaults
//! and only then deserialized, so a partial file always yields a complete
//! configuration.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StratumError};

use super::merge::deep_merge;
use super::spec::DeployConfig;

/// Environment variable overriding the deployment name.
pub const ENV_NAME: &str = "STRATUM_NAME";
/// Environment variable overriding the region.
pub const ENV_REGION: &str = "STRATUM_REGION";
/// Environment variable overriding the S3 state bucket.
pub const ENV_STATE_BUCKET: &str = "STRATUM_STATE_BUCKET";
/// Environment variable overriding the S3 state prefix.
pub const ENV_STATE_PREFIX: &str = "STRATUM_STATE_PREFIX";
/// Environment variable overriding the control plane endpoint.
pub const ENV_CONTROL_PLANE_URL: &str = "STRATUM_CONTROL_PLANE_URL";
/// Environment variable holding the control plane bearer token.
pub const ENV_API_TOKEN: &str = "STRATUM_API_TOKEN";

/// Configuration parser for loading deployment configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(StratumError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        let mut config = self.parse_yaml(&content, Some(path))?;
        self.resolve_code_path(&mut config);
        Ok(config)
    }

    /// Parses configuration from a YAML string and fills in defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or a value has the wrong shape.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<DeployConfig> {
        debug!("Parsing YAML configuration");
        let location = source.map(|p| p.display().to_string());

        let user: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).map_err(|e| {
                StratumError::Config(ConfigError::ParseError {
                    message: format!("YAML parse error: {e}"),
                    location: location.clone(),
                })
            })?
        };

        if !user.is_null() && !user.is_object() {
            return Err(StratumError::Config(ConfigError::ParseError {
                message: String::from("top-level configuration must be a mapping"),
                location,
            }));
        }

        check_permissions(&user).map_err(StratumError::Config)?;

        let config = resolve(user).map_err(|e| {
            StratumError::Config(ConfigError::ParseError {
                message: e.to_string(),
                location,
            })
        })?;

        debug!("Resolved configuration for deployment: {}", config.name);
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables are `STRATUM_NAME`, `STRATUM_REGION`,
    /// `STRATUM_STATE_BUCKET`, `STRATUM_STATE_PREFIX` and
    /// `STRATUM_CONTROL_PLANE_URL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<DeployConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment overrides using the given lookup.
    pub fn apply_env_overrides(config: &mut DeployConfig, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(name) = lookup(ENV_NAME) {
            debug!("Overriding name from environment");
            config.name = name;
        }

        if let Some(region) = lookup(ENV_REGION) {
            debug!("Overriding region from environment");
            config.region = region;
        }

        if let Some(bucket) = lookup(ENV_STATE_BUCKET) {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup(ENV_STATE_PREFIX) {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }

        if let Some(endpoint) = lookup(ENV_CONTROL_PLANE_URL) {
            debug!("Overriding control_plane.endpoint from environment");
            config.control_plane.endpoint = Some(endpoint);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                StratumError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the control plane bearer token from environment (optional).
    #[must_use]
    pub fn api_token() -> Option<String> {
        std::env::var(ENV_API_TOKEN).ok()
    }

    /// Makes a relative code path relative to the base path.
    fn resolve_code_path(&self, config: &mut DeployConfig) {
        let Some(base) = &self.base_path else {
            return;
        };
        let code = Path::new(&config.code);
        if code.is_relative() {
            config.code = base.join(code).display().to_string();
        }
    }
}

/// Deep-merges user input over the defaults and deserializes the result.
///
/// # Errors
///
/// Returns an error if a merged value does not fit its field.
pub fn resolve(user: Value) -> std::result::Result<DeployConfig, serde_json::Error> {
    let mut merged = serde_json::to_value(DeployConfig::default())?;
    deep_merge(&mut merged, user);
    serde_json::from_value(merged)
}

/// Rejects a `permissions` value that is not a name, a list of actions or a
/// policy document.
fn check_permissions(user: &Value) -> std::result::Result<(), ConfigError> {
    let Some(intent) = user.get("permissions") else {
        return Ok(());
    };
    let well_formed = match intent {
        Value::Null | Value::String(_) | Value::Object(_) => true,
        Value::Array(actions) => actions.iter().all(Value::is_string),
        Value::Bool(_) | Value::Number(_) => false,
    };
    if well_formed {
        Ok(())
    } else {
        Err(ConfigError::MalformedPermissions {
            message: format!("expected \"admin\", a list of actions or a policy document, found {intent}"),
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "stratum.deploy.yaml",
    "stratum.deploy.yml",
    "deploy.yaml",
];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(StratumError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::StateBackend;
    use crate::policy::PermissionIntent;
    use std::collections::HashMap;

    #[test]
    fn test_empty_input_yields_defaults() {
        let parser = ConfigParser::new();
        let config = parser.parse_yaml("", None).expect("empty config should parse");
        assert_eq!(config, DeployConfig::default());
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let parser = ConfigParser::new();
        let config = parser
            .parse_yaml("region: eu-west-1\n", None)
            .expect("config should parse");

        let expected = DeployConfig {
            region: String::from("eu-west-1"),
            ..DeployConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn test_nested_sections_merge() {
        let yaml = r"
name: svc
memory: 1024
env:
  STAGE: prod
permissions:
  - s3:GetObject
state:
  backend: s3
  bucket: stratum-state
";
        let config = ConfigParser::new()
            .parse_yaml(yaml, None)
            .expect("config should parse");

        assert_eq!(config.name, "svc");
        assert_eq!(config.memory, 1024);
        assert_eq!(config.timeout, 10);
        assert_eq!(config.env.get("STAGE").map(String::as_str), Some("prod"));
        assert_eq!(
            config.permissions,
            Some(PermissionIntent::Actions(vec![String::from("s3:GetObject")]))
        );
        assert_eq!(config.state.backend, StateBackend::S3);
        assert_eq!(config.state.bucket.as_deref(), Some("stratum-state"));
        assert_eq!(config.control_plane.timeout_secs, 30);
    }

    #[test]
    fn test_explicit_null_keeps_default() {
        let config = ConfigParser::new()
            .parse_yaml("memory: null\nname: svc\n", None)
            .expect("config should parse");
        assert_eq!(config.memory, 896);
        assert_eq!(config.name, "svc");
    }

    #[test]
    fn test_malformed_permissions_rejected() {
        let parser = ConfigParser::new();
        for yaml in ["permissions: 42\n", "permissions: [\"logs:*\", 7]\n", "permissions: true\n"] {
            let err = parser.parse_yaml(yaml, None).unwrap_err();
            assert!(
                matches!(err, StratumError::Config(ConfigError::MalformedPermissions { .. })),
                "{yaml}: {err}"
            );
        }
        assert!(parser.parse_yaml("permissions: admin\n", None).is_ok());
        assert!(parser.parse_yaml("permissions: null\n", None).is_ok());
    }

    #[test]
    fn test_non_mapping_rejected() {
        let err = ConfigParser::new().parse_yaml("- a\n- b\n", None).unwrap_err();
        assert!(matches!(err, StratumError::Config(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (ENV_NAME, "from-env"),
            (ENV_STATE_BUCKET, "bucket-from-env"),
        ]);
        let mut config = DeployConfig::default();
        ConfigParser::apply_env_overrides(&mut config, |key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.name, "from-env");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.state.bucket.as_deref(), Some("bucket-from-env"));
    }

    #[test]
    fn test_load_file_resolves_code_relative_to_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stratum.deploy.yaml");
        std::fs::write(&path, "name: svc\ncode: ./handler\n").expect("write config");

        let config = ConfigParser::new()
            .with_base_path(dir.path())
            .load_file(&path)
            .expect("config should load");
        assert_eq!(config.code, dir.path().join("./handler").display().to_string());
    }

    #[test]
    fn test_find_config_file_walks_up() {
        let dir = tempfile::tempdir().expect("tempdir");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("create dirs");
        std::fs::write(dir.path().join("deploy.yaml"), "name: svc\n").expect("write config");

        let found = find_config_file(&nested).expect("config should be found");
        assert_eq!(found, dir.path().join("deploy.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new().load_file("/nonexistent/stratum.deploy.yaml").unwrap_err();
        assert!(matches!(err, StratumError::Config(ConfigError::FileNotFound { .. })));
    }
}
