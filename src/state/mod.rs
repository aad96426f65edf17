//! Deployment state persistence.
//!
//! The state record maps each logical instance to its physical name, its
//! recorded outputs and the hash of the configuration it was applied with.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{
    DeploymentHistoryEntry, DeploymentOperation, DeploymentState, InstanceState, STATE_VERSION,
};
