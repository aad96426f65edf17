//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of the resolved configuration
//! and of individual deployment instances, so a re-run can tell which
//! instances actually changed.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::adapters::code_digest;
use crate::planner::{DeploymentInstance, DesiredValue, ResourceType};

use super::spec::DeployConfig;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire deployment configuration.
    ///
    /// Every map in the configuration is ordered, so the canonical JSON
    /// encoding is stable across runs.
    #[must_use]
    pub fn hash_config(&self, config: &DeployConfig) -> String {
        let mut hasher = Sha256::new();
        let encoded = serde_json::to_vec(config).unwrap_or_default();
        hasher.update(&encoded);
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single instance's identity and desired configuration.
    ///
    /// A function's hash also covers the digest of its code directory, so
    /// editing the code shows up as a change.
    #[must_use]
    pub fn hash_instance(&self, instance: &DeploymentInstance) -> String {
        let mut hasher = Sha256::new();

        hasher.update(instance.name.as_bytes());
        hasher.update([0u8]);
        hasher.update(instance.resource_name.as_bytes());
        hasher.update([0u8]);
        hasher.update(instance.resource_type.kind().as_bytes());

        for (key, value) in &instance.desired_config {
            hasher.update([0u8]);
            hasher.update(key.as_bytes());
            hasher.update(b"=");
            match value {
                DesiredValue::Literal(literal) => {
                    hasher.update(literal.to_string().as_bytes());
                }
                DesiredValue::Reference { instance, field } => {
                    hasher.update(b"ref:");
                    hasher.update(instance.as_bytes());
                    hasher.update(b".");
                    hasher.update(field.as_bytes());
                }
            }
        }

        if instance.resource_type == ResourceType::Function
            && let Some(DesiredValue::Literal(serde_json::Value::String(code))) = instance.desired_config.get("code")
        {
            hasher.update(b"\0code_sha256=");
            match code_digest(Path::new(code)) {
                Ok(digest) => hasher.update(digest.as_bytes()),
                Err(_) => hasher.update(b"unreadable"),
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        hash1.len() == hash2.len()
            && hash1
                .bytes()
                .zip(hash2.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::ResourceType;

    fn instance(memory: u32) -> DeploymentInstance {
        DeploymentInstance::new("function", "svc-process-function-abc", ResourceType::Function)
            .with_literal("memory", memory)
            .with_reference("role", "role", "arn")
    }

    #[test]
    fn test_instance_hash_deterministic() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_instance(&instance(896)), hasher.hash_instance(&instance(896)));
    }

    #[test]
    fn test_instance_hash_tracks_desired_config() {
        let hasher = ConfigHasher::new();
        assert_ne!(hasher.hash_instance(&instance(896)), hasher.hash_instance(&instance(1024)));

        let rewired = instance(896).with_reference("role", "role", "name");
        assert_ne!(hasher.hash_instance(&instance(896)), hasher.hash_instance(&rewired));
    }

    #[test]
    fn test_function_hash_tracks_code_contents() {
        let code = tempfile::TempDir::new().expect("code dir");
        std::fs::write(code.path().join("index.js"), "v1").expect("write");
        let function = instance(896).with_literal("code", code.path().display().to_string());
        let hasher = ConfigHasher::new();

        let before = hasher.hash_instance(&function);
        assert_eq!(before, hasher.hash_instance(&function));

        std::fs::write(code.path().join("index.js"), "v2").expect("write");
        assert_ne!(before, hasher.hash_instance(&function));
    }

    #[test]
    fn test_config_hash_changes_with_config() {
        let hasher = ConfigHasher::new();
        let base = DeployConfig::default();
        let changed = DeployConfig {
            region: String::from("eu-west-1"),
            ..DeployConfig::default()
        };
        assert_eq!(hasher.hash_config(&base), hasher.hash_config(&DeployConfig::default()));
        assert_ne!(hasher.hash_config(&base), hasher.hash_config(&changed));
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.short_hash("abcdef1234567890"), "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
