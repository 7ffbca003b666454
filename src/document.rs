//! Policy and trust document structure
//!
//! Documents follow the provider's JSON layout (PascalCase keys, `Version` "1").
//! Policy statements are compared as an unordered set; trust documents are
//! compared structurally in order.

use serde::{Deserialize, Serialize};

/// Document format version used by the identity service
pub const DOCUMENT_VERSION: &str = "1";

/// Action granted by the default trust document
pub const ASSUME_ROLE_ACTION: &str = "sts:AssumeRole";

/// Effect of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    /// Allow the action
    Allow,
    /// Deny the action (takes precedence over Allow)
    Deny,
}

/// A single value or a list of values, as the provider accepts both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Values {
    One(String),
    Many(Vec<String>),
}

impl Values {
    /// Iterate over the contained values
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            Values::One(value) => std::slice::from_ref(value),
            Values::Many(values) => values.as_slice(),
        };
        slice.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Values::One(value) => value.is_empty(),
            Values::Many(values) => values.is_empty(),
        }
    }
}

impl From<&str> for Values {
    fn from(value: &str) -> Self {
        Values::One(value.to_string())
    }
}

impl From<Vec<String>> for Values {
    fn from(values: Vec<String>) -> Self {
        Values::Many(values)
    }
}

/// A single permission statement of a policy document
///
/// Unknown keys are rejected so a statement never loses part of its meaning
/// on the way to or from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct Statement {
    /// Statement ID (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,

    /// Effect of this statement
    pub effect: Effect,

    /// Actions this statement applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Values>,

    /// Actions this statement applies to by exclusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_action: Option<Values>,

    /// Resources this statement applies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Values>,

    /// Resources this statement applies to by exclusion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_resource: Option<Values>,

    /// Principal block, kept verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<serde_json::Value>,

    /// Optional conditions for when this statement applies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

impl Statement {
    /// Create a new statement
    pub fn new(effect: Effect, action: impl Into<Values>, resource: impl Into<Values>) -> Self {
        Statement {
            sid: None,
            effect,
            action: Some(action.into()),
            not_action: None,
            resource: Some(resource.into()),
            not_resource: None,
            principal: None,
            condition: None,
        }
    }

    /// Key-sorted JSON form, used to compare statements irrespective of field order
    fn canonical(&self) -> String {
        serde_json::to_value(self)
            .map(|value| value.to_string())
            .unwrap_or_default()
    }
}

/// Whether two statement lists hold the same statements, ignoring order
pub fn statements_match(left: &[Statement], right: &[Statement]) -> bool {
    if left.len() != right.len() {
        return false;
    }

    let mut left: Vec<String> = left.iter().map(Statement::canonical).collect();
    let mut right: Vec<String> = right.iter().map(Statement::canonical).collect();
    left.sort();
    right.sort();
    left == right
}

/// Complete permission policy document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct PolicyDocument {
    /// Policy format version
    pub version: String,

    /// List of policy statements
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    /// Create a document holding the given statements
    pub fn new(statement: Vec<Statement>) -> Self {
        PolicyDocument {
            version: DOCUMENT_VERSION.to_string(),
            statement,
        }
    }

    /// Parse policy from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize policy to the compact JSON string the service stores
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether this document's statements match `statement`, ignoring order
    pub fn matches(&self, statement: &[Statement]) -> bool {
        statements_match(&self.statement, statement)
    }

    /// Validate policy structure
    pub fn validate(&self) -> Result<(), String> {
        if self.statement.is_empty() {
            return Err("Policy must have at least one statement".to_string());
        }

        for (i, stmt) in self.statement.iter().enumerate() {
            check_exclusive(i, "Action", &stmt.action, "NotAction", &stmt.not_action)?;
            check_exclusive(i, "Resource", &stmt.resource, "NotResource", &stmt.not_resource)?;
        }

        Ok(())
    }
}

/// Exactly one of a positive/negated pair must be present and non-empty
fn check_exclusive(
    index: usize,
    key: &str,
    value: &Option<Values>,
    negated_key: &str,
    negated: &Option<Values>,
) -> Result<(), String> {
    match (value, negated) {
        (Some(_), Some(_)) => Err(format!(
            "Statement {} has both {} and {}",
            index, key, negated_key
        )),
        (Some(values), None) | (None, Some(values)) if !values.is_empty() => Ok(()),
        _ => Err(format!("Statement {} has no {} or {}", index, key, negated_key)),
    }
}

/// Principal allowed to assume a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Principal {
    /// Cloud services (e.g. `fc.aliyuncs.com`)
    #[serde(rename = "Service", default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Vec<String>>,

    /// Accounts or identities (e.g. `acs:ram::123456:root`)
    #[serde(rename = "RAM", default, skip_serializing_if = "Option::is_none")]
    pub ram: Option<Vec<String>>,

    /// Identity providers
    #[serde(rename = "Federated", default, skip_serializing_if = "Option::is_none")]
    pub federated: Option<Vec<String>>,
}

/// A statement of a role's trust document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct TrustStatement {
    pub action: Values,
    pub effect: Effect,
    pub principal: Principal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<serde_json::Value>,
}

/// Document defining which principals may assume a role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct TrustDocument {
    pub version: String,
    pub statement: Vec<TrustStatement>,
}

impl TrustDocument {
    /// Default document letting `service` assume the role
    pub fn for_service(service: &str) -> Self {
        TrustDocument {
            version: DOCUMENT_VERSION.to_string(),
            statement: vec![TrustStatement {
                action: Values::from(ASSUME_ROLE_ACTION),
                effect: Effect::Allow,
                principal: Principal {
                    service: Some(vec![service.to_string()]),
                    ..Principal::default()
                },
                condition: None,
            }],
        }
    }

    /// Document built from caller-supplied statements
    pub fn explicit(statement: Vec<TrustStatement>) -> Self {
        TrustDocument {
            version: DOCUMENT_VERSION.to_string(),
            statement,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether a live document serialized as `json` differs from this one.
    /// A live document that cannot be parsed is treated as drifted.
    pub fn differs_from_json(&self, json: &str) -> bool {
        match TrustDocument::from_json(json) {
            Ok(live) => live != *self,
            Err(_) => true,
        }
    }
}
