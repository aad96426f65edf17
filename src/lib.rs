// ============================================================================
// Lints
// ============================================================================

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(non_camel_case_types)]
#![deny(unused_must_use)]
#![deny(non_snake_case)]
#![deny(non_upper_case_globals)]
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(clippy::print_stdout)]
#![warn(clippy::todo)]
#![warn(clippy::unimplemented)]
#![warn(clippy::unwrap_in_result)]
#![warn(clippy::redundant_clone)]
#![warn(clippy::too_many_arguments)]
#![warn(clippy::cognitive_complexity)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

#![deny(overflowing_literals)]
#![deny(arithmetic_overflow)]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stratum Deploy
//!
//! Declarative, idempotent provisioning of a serverless process stack, with
//! symmetric teardown.
//!
//! ## Overview
//!
//! A deployment is a fixed graph of five resources: a code bucket, an
//! execution role, a function, a key-value table and a subscription of the
//! function to a notification topic. Stratum:
//!
//! - Resolves a partial YAML configuration over defaults
//! - Orders the resources by the references between them
//! - Applies them wave by wave, recording outputs as each one completes
//! - Removes them in reverse order from the recorded outputs alone
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, merging and validation
//! - [`planner`]: Instances, dependency graph, topology and plan diff
//! - [`adapters`]: One adapter per resource type
//! - [`cloud`]: Control plane client (HTTP and in-memory)
//! - [`state`]: State storage backends (local, S3)
//! - [`orchestrator`]: Apply and remove runs
//! - [`policy`]: Permission intent to policy document
//! - [`handler`]: Response normalisation for the function entry point
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! name: orders
//! region: eu-west-1
//! code: ./code
//! memory: 1024
//! env:
//!   STAGE: prod
//! permissions:
//!   - dynamodb:GetItem
//!   - dynamodb:PutItem
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod adapters;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod error;
pub mod handler;
pub mod orchestrator;
pub mod planner;
pub mod policy;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use adapters::{AdapterRegistry, ResourceAdapter};
pub use cli::{Cli, Commands, OutputFormatter};
pub use cloud::{ControlPlane, HttpControlPlane, MemoryControlPlane};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DeployConfig};
pub use error::{Result, StratumError};
pub use orchestrator::{ApplyReport, Orchestrator, RemoveReport};
pub use planner::{DependencyGraph, DeploymentOutputs, DeploymentPlan, DiffEngine};
pub use policy::{PermissionIntent, PolicyDocument, resolve_policy};
pub use state::{DeploymentState, LocalStateStore, S3StateStore, StateStore};
