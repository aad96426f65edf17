//! Permission intent to policy document resolution.
//!
//! A deployment states the permissions its function needs as an intent: the
//! name `admin`, a list of actions, or a complete custom document. Resolution
//! is total; anything that is not a recognised name or a non-empty action list
//! falls back to the default data and logging permissions.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Policy language version used for generated documents.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Managed policy granted for the `admin` intent.
pub const ADMIN_POLICY_ARN: &str = "arn:aws:iam::aws:policy/AdministratorAccess";

/// Named intent that maps to full administrative access.
pub const ADMIN_INTENT: &str = "admin";

/// Actions granted when no usable intent is given.
pub const DEFAULT_ACTIONS: &[&str] = &["dynamodb:*", "logs:*"];

/// How a deployment describes the permissions its function needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PermissionIntent {
    /// A well-known name such as `admin`.
    Named(String),
    /// A list of allowed actions.
    Actions(Vec<String>),
    /// A complete policy document, passed through unchanged.
    Document(Map<String, Value>),
}

/// A resolved policy attached to the execution role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyDocument {
    /// A reference to a managed policy.
    Managed {
        /// Managed policy ARN.
        arn: String,
    },
    /// A generated inline document.
    Inline(InlinePolicy),
    /// A user supplied document.
    Custom(Map<String, Value>),
}

/// A generated inline policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlinePolicy {
    /// Policy language version.
    #[serde(rename = "Version")]
    pub version: String,
    /// Policy statements.
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

/// One allow or deny statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    /// Actions covered by the statement.
    #[serde(rename = "Action")]
    pub actions: Vec<String>,
    /// Statement effect.
    #[serde(rename = "Effect")]
    pub effect: Effect,
    /// Resource pattern.
    #[serde(rename = "Resource")]
    pub resource: String,
}

/// Statement effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the actions.
    Allow,
    /// Deny the actions.
    Deny,
}

/// A problem found while checking an intent ahead of resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntentIssue {
    /// The intent cannot be honoured as written.
    Error(String),
    /// The intent resolves, possibly not the way the user meant.
    Warning(String),
}

impl PolicyDocument {
    /// Builds an allow-all-resources document for the given actions.
    #[must_use]
    pub fn allow<S: AsRef<str>>(actions: &[S]) -> Self {
        Self::Inline(InlinePolicy {
            version: POLICY_VERSION.to_string(),
            statements: vec![PolicyStatement {
                actions: actions.iter().map(|a| a.as_ref().to_string()).collect(),
                effect: Effect::Allow,
                resource: String::from("*"),
            }],
        })
    }

    /// The default document.
    #[must_use]
    pub fn default_policy() -> Self {
        Self::allow(DEFAULT_ACTIONS)
    }

    /// Serializes the document for transport.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Managed { arn } => serde_json::json!({ "arn": arn }),
            Self::Inline(inline) => serde_json::json!({
                "Version": inline.version,
                "Statement": inline.statements.iter().map(|s| serde_json::json!({
                    "Action": s.actions,
                    "Effect": s.effect,
                    "Resource": s.resource,
                })).collect::<Vec<_>>(),
            }),
            Self::Custom(map) => Value::Object(map.clone()),
        }
    }
}

/// Resolves a permission intent to a policy document.
///
/// `None`, an unknown name and an empty action list all resolve to the default
/// document.
#[must_use]
pub fn resolve_policy(intent: Option<&PermissionIntent>) -> PolicyDocument {
    match intent {
        Some(PermissionIntent::Named(name)) if name == ADMIN_INTENT => PolicyDocument::Managed {
            arn: ADMIN_POLICY_ARN.to_string(),
        },
        Some(PermissionIntent::Actions(actions)) if !actions.is_empty() => PolicyDocument::allow(actions),
        Some(PermissionIntent::Document(document)) => PolicyDocument::Custom(document.clone()),
        _ => PolicyDocument::default_policy(),
    }
}

/// Checks an intent for problems worth reporting before anything is deployed.
#[must_use]
pub fn check_intent(intent: &PermissionIntent) -> Vec<IntentIssue> {
    let mut issues = Vec::new();
    match intent {
        PermissionIntent::Named(name) if name == ADMIN_INTENT => {
            issues.push(IntentIssue::Warning(String::from(
                "'admin' grants full administrative access",
            )));
        }
        PermissionIntent::Named(name) => {
            issues.push(IntentIssue::Error(format!(
                "unknown permission name '{name}' (expected '{ADMIN_INTENT}', a list of actions or a policy document)"
            )));
        }
        PermissionIntent::Actions(actions) if actions.is_empty() => {
            issues.push(IntentIssue::Warning(String::from(
                "empty action list falls back to the default permissions",
            )));
        }
        PermissionIntent::Actions(actions) => {
            if actions.iter().any(|a| a.trim().is_empty()) {
                issues.push(IntentIssue::Error(String::from("action names cannot be empty")));
            }
        }
        PermissionIntent::Document(document) => {
            if !document.contains_key("Statement") && !document.contains_key("statements") {
                issues.push(IntentIssue::Warning(String::from(
                    "custom policy document has no Statement; it is passed through unchanged",
                )));
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_admin_maps_to_managed_policy() {
        let policy = resolve_policy(Some(&PermissionIntent::Named(String::from("admin"))));
        assert_eq!(
            policy,
            PolicyDocument::Managed {
                arn: ADMIN_POLICY_ARN.to_string()
            }
        );
    }

    #[test]
    fn test_actions_become_single_allow_statement() {
        let intent = PermissionIntent::Actions(vec![String::from("s3:GetObject"), String::from("sns:Publish")]);
        let policy = resolve_policy(Some(&intent));

        assert_eq!(
            policy.to_value(),
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": ["s3:GetObject", "sns:Publish"],
                    "Effect": "Allow",
                    "Resource": "*"
                }]
            })
        );
    }

    #[test]
    fn test_document_passes_through() {
        let document = json!({"Version": "2012-10-17", "Statement": [{"Effect": "Deny"}]});
        let Value::Object(map) = document.clone() else {
            panic!("expected object");
        };
        let policy = resolve_policy(Some(&PermissionIntent::Document(map)));
        assert_eq!(policy.to_value(), document);
    }

    #[test]
    fn test_fallbacks_use_default_policy() {
        let default = PolicyDocument::default_policy();
        assert_eq!(resolve_policy(None), default);
        assert_eq!(resolve_policy(Some(&PermissionIntent::Actions(Vec::new()))), default);
        assert_eq!(
            resolve_policy(Some(&PermissionIntent::Named(String::from("readonly")))),
            default
        );
        assert_eq!(
            default.to_value()["Statement"][0]["Action"],
            json!(["dynamodb:*", "logs:*"])
        );
    }

    #[test]
    fn test_intent_deserializes_each_shape() {
        let named: PermissionIntent = serde_json::from_value(json!("admin")).expect("named");
        let actions: PermissionIntent = serde_json::from_value(json!(["logs:*"])).expect("actions");
        let document: PermissionIntent = serde_json::from_value(json!({"Statement": []})).expect("document");

        assert!(matches!(named, PermissionIntent::Named(_)));
        assert!(matches!(actions, PermissionIntent::Actions(_)));
        assert!(matches!(document, PermissionIntent::Document(_)));
        assert!(serde_json::from_value::<PermissionIntent>(json!(true)).is_err());
    }

    #[test]
    fn test_check_intent() {
        let unknown = check_intent(&PermissionIntent::Named(String::from("readonly")));
        assert!(matches!(unknown.as_slice(), [IntentIssue::Error(_)]));

        let empty = check_intent(&PermissionIntent::Actions(Vec::new()));
        assert!(matches!(empty.as_slice(), [IntentIssue::Warning(_)]));

        let blank = check_intent(&PermissionIntent::Actions(vec![String::from(" ")]));
        assert!(matches!(blank.as_slice(), [IntentIssue::Error(_)]));

        let fine = check_intent(&PermissionIntent::Actions(vec![String::from("logs:*")]));
        assert!(fine.is_empty());
    }
}
