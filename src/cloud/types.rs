//! Control plane request and response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::planner::ResourceType;

/// A create-or-update request for one remote resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Resource kind.
    pub kind: ResourceType,
    /// Physical resource name.
    pub name: String,
    /// Region to create the resource in.
    pub region: String,
    /// Kind-specific resource settings.
    pub spec: Value,
}

/// A resource as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResource {
    /// Provider-assigned identifier.
    pub id: String,
    /// Resource ARN.
    pub arn: String,
    /// Additional string attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// The account the control plane credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Account id.
    pub account: String,
}

/// Body of a put request on the wire.
#[derive(Debug, Serialize)]
pub(crate) struct PutResourceBody<'a> {
    pub region: &'a str,
    pub spec: &'a Value,
}

impl ResourceRequest {
    /// Creates a request.
    #[must_use]
    pub fn new(kind: ResourceType, name: &str, region: &str, spec: Value) -> Self {
        Self {
            kind,
            name: name.to_string(),
            region: region.to_string(),
            spec,
        }
    }
}
