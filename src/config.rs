//! Desired-state and reconciler configuration
//!
//! A configuration file holds a `role` table describing the desired role and
//! its policies, and an optional `settings` table tuning retries:
//!
//! ```toml
//! [role]
//! name = "fc-service-role"
//! service = "fc.aliyuncs.com"
//! description = "Function Compute execution role"
//! policies = [
//!     "AliyunOSSReadOnlyAccess",
//!     { name = "fc-log-writer", description = "Write function logs", statement = [{ Effect = "Allow", Action = ["log:PostLogStoreLogs"], Resource = "*" }] },
//! ]
//!
//! [settings.retry]
//! retries = 2
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::RetryPolicy;
use crate::document::{PolicyDocument, TrustDocument, TrustStatement};
use crate::error::{ReconcileError, Result};
use crate::policy::PolicyReference;
use crate::validation::{validate_policy_name, validate_role_name};

/// Environment variable overriding the per-attempt timeout, in seconds
pub const CLIENT_TIMEOUT_ENV: &str = "ALIYUN_RAM_CLIENT_TIMEOUT";

/// Desired state of one role and its policies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Role name (identity key)
    pub name: String,

    /// Principal service trusted by the default trust document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,

    /// Explicit trust statements; take precedence over `service`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<Vec<TrustStatement>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Policies to attach, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyReference>,
}

impl RoleConfig {
    /// Role trusted by `service`, with no policies
    pub fn for_service(name: impl Into<String>, service: impl Into<String>) -> Self {
        RoleConfig {
            name: name.into(),
            service: Some(service.into()),
            statement: None,
            description: None,
            policies: Vec::new(),
        }
    }

    /// Add a policy reference
    pub fn with_policy(mut self, policy: PolicyReference) -> Self {
        self.policies.push(policy);
        self
    }

    /// Trust document to apply: explicit statements, else the default for `service`
    pub fn trust_document(&self) -> Result<TrustDocument> {
        match (&self.statement, &self.service) {
            (Some(statement), _) => Ok(TrustDocument::explicit(statement.clone())),
            (None, Some(service)) => Ok(TrustDocument::for_service(service)),
            (None, None) => Err(ReconcileError::InvalidConfig(format!(
                "role {} needs either a trust statement or a service",
                self.name
            ))),
        }
    }

    /// Check names and documents before any remote call
    pub fn validate(&self) -> Result<()> {
        validate_role_name(&self.name)?;

        if matches!(&self.statement, Some(statement) if statement.is_empty()) {
            return Err(ReconcileError::InvalidConfig(format!(
                "role {} has an empty trust statement",
                self.name
            )));
        }
        self.trust_document()?;

        let mut seen = HashSet::new();
        for policy in &self.policies {
            validate_policy_name(policy.name())?;
            if !seen.insert(policy.name().to_lowercase()) {
                return Err(ReconcileError::InvalidConfig(format!(
                    "policy {} is declared more than once",
                    policy.name()
                )));
            }
            if let PolicyReference::Defined { name, statement, .. } = policy {
                PolicyDocument::new(statement.clone())
                    .validate()
                    .map_err(|e| ReconcileError::InvalidConfig(format!("policy {}: {}", name, e)))?;
            }
        }

        Ok(())
    }
}

/// Retry tuning as written in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub retries: u32,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub factor: f64,
    pub randomize: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            retries: 2,
            min_timeout_ms: 1_000,
            max_timeout_ms: 10_000,
            factor: 2.0,
            randomize: true,
        }
    }
}

/// Reconciler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub retry: RetrySettings,
    /// Per-attempt timeout in seconds; 0 disables it
    pub attempt_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            retry: RetrySettings::default(),
            attempt_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Apply [`CLIENT_TIMEOUT_ENV`] if it is set
    pub fn apply_env(&mut self) -> Result<()> {
        let value = std::env::var(CLIENT_TIMEOUT_ENV).ok();
        self.apply_timeout_override(value.as_deref())
    }

    /// Override the per-attempt timeout with a seconds value
    pub fn apply_timeout_override(&mut self, value: Option<&str>) -> Result<()> {
        if let Some(value) = value {
            self.attempt_timeout_secs = value.trim().parse().map_err(|_| {
                ReconcileError::InvalidConfig(format!(
                    "{} must be a number of seconds, got '{}'",
                    CLIENT_TIMEOUT_ENV, value
                ))
            })?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retry.retries,
            min_timeout: Duration::from_millis(self.retry.min_timeout_ms),
            max_timeout: Duration::from_millis(self.retry.max_timeout_ms),
            factor: self.retry.factor,
            randomize: self.retry.randomize,
            attempt_timeout: (self.attempt_timeout_secs > 0)
                .then(|| Duration::from_secs(self.attempt_timeout_secs)),
        }
    }
}

/// Contents of a configuration file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub role: RoleConfig,
    #[serde(default)]
    pub settings: Settings,
}

impl ConfigFile {
    /// Load from a `.json` file, or TOML for any other extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            Self::from_json(&text)
        } else {
            Self::from_toml(&text)
        }
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
