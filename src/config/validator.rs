//! Configuration validation for deployment specs.
//!
//! Field ranges are declared on `DeployConfig` with the `validator` derive;
//! this module adds the cross-field and naming rules and collects everything
//! into a single [`ValidationResult`].

use ::validator::Validate;
use std::path::Path;
use tracing::debug;

use crate::error::{ConfigError, Result, StratumError};
use crate::policy::{IntentIssue, check_intent};

use super::spec::{ControlPlaneConfig, DeployConfig, StateBackend, StateConfig};

/// Validator for deployment configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Skip filesystem checks (used when validating a config for another machine).
    skip_fs_checks: bool,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self { skip_fs_checks: false }
    }

    /// Disables checks that touch the filesystem.
    #[must_use]
    pub const fn without_fs_checks(mut self) -> Self {
        self.skip_fs_checks = true;
        self
    }

    /// Validates a deployment configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &DeployConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(StratumError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DeployConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_fields(config, &mut result);
        Self::validate_naming(config, &mut result);
        Self::validate_env(config, &mut result);
        Self::validate_permissions(config, &mut result);
        Self::validate_state(&config.state, &mut result);
        Self::validate_control_plane(&config.control_plane, &mut result);
        if !self.skip_fs_checks {
            Self::validate_code_dir(&config.code, &mut result);
        }

        result
    }

    /// Applies the range and length rules declared on `DeployConfig`.
    fn validate_fields(config: &DeployConfig, result: &mut ValidationResult) {
        let Err(errors) = config.validate() else {
            return;
        };

        let mut fields: Vec<_> = errors.field_errors().into_iter().collect();
        fields.sort_by_key(|(field, _)| field.to_string());
        for (field, errs) in fields {
            for err in errs {
                let message = err
                    .message
                    .as_ref()
                    .map_or_else(|| format!("{field} is invalid ({})", err.code), ToString::to_string);
                result.errors.push(ValidationError {
                    field: field.to_string(),
                    message,
                });
            }
        }
    }

    fn validate_naming(config: &DeployConfig, result: &mut ValidationResult) {
        if !config.name.is_empty() && !is_valid_name(&config.name) {
            result.errors.push(ValidationError {
                field: String::from("name"),
                message: format!(
                    "Name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.name
                ),
            });
        }

        if !config.region.is_empty() && !is_valid_region(&config.region) {
            result.errors.push(ValidationError {
                field: String::from("region"),
                message: format!("Region '{}' is not of the form 'us-east-1'", config.region),
            });
        }
    }

    fn validate_env(config: &DeployConfig, result: &mut ValidationResult) {
        for key in config.env.keys() {
            let valid = key
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                result.errors.push(ValidationError {
                    field: format!("env.{key}"),
                    message: format!("Environment variable name '{key}' is invalid"),
                });
            }
        }
    }

    fn validate_permissions(config: &DeployConfig, result: &mut ValidationResult) {
        let Some(intent) = &config.permissions else {
            return;
        };

        for issue in check_intent(intent) {
            match issue {
                IntentIssue::Error(message) => result.errors.push(ValidationError {
                    field: String::from("permissions"),
                    message,
                }),
                IntentIssue::Warning(message) => result.warnings.push(format!("permissions: {message}")),
            }
        }
    }

    fn validate_state(state: &StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result
                        .warnings
                        .push(String::from("state.bucket is ignored by the local backend"));
                }
            }
        }
    }

    fn validate_control_plane(control_plane: &ControlPlaneConfig, result: &mut ValidationResult) {
        match &control_plane.endpoint {
            Some(endpoint) if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") => {
                result.errors.push(ValidationError {
                    field: String::from("control_plane.endpoint"),
                    message: format!("Endpoint '{endpoint}' must be an http(s) URL"),
                });
            }
            Some(_) => {}
            None => result.warnings.push(String::from(
                "no control_plane.endpoint set; resources are simulated in memory",
            )),
        }

        if control_plane.timeout_secs == 0 {
            result.errors.push(ValidationError {
                field: String::from("control_plane.timeout_secs"),
                message: String::from("Timeout must be greater than zero"),
            });
        }
    }

    fn validate_code_dir(code: &str, result: &mut ValidationResult) {
        let path = Path::new(code);
        if !path.is_dir() {
            result
                .warnings
                .push(format!("code directory '{code}' does not exist yet"));
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    if !chars.next().is_some_and(|first| first.is_ascii_lowercase()) {
        return false;
    }

    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.ends_with('-')
        && !name.contains("--")
}

/// Accepts `<area>-<direction>-<digit>` style regions such as `eu-west-1`.
fn is_valid_region(region: &str) -> bool {
    let parts: Vec<&str> = region.split('-').collect();
    let Some((last, rest)) = parts.split_last() else {
        return false;
    };
    rest.len() >= 2
        && rest.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_lowercase()))
        && !last.is_empty()
        && last.chars().all(|c| c.is_ascii_digit())
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
