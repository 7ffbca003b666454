//! Identity service client boundary
//!
//! The reconciler talks to the remote identity service only through the
//! [`IdentityClient`] trait. Provider error codes are classified into the
//! closed [`ErrorKind`] enum here, so no other module inspects string codes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::document::{PolicyDocument, TrustDocument};

mod memory;
pub use memory::{Call, MemoryIdentityService};

/// Result type of a single remote call
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Classification of a remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Authorization was refused; retrying cannot change the outcome
    PermissionDenied,
    /// The entity does not exist
    NotFound,
    /// Network, throttling, timeout or other service failure
    Transient,
}

/// Error raised by an identity service call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ClientError {
    pub kind: ErrorKind,
    /// Provider error code, kept for diagnostics only
    pub code: String,
    pub message: String,
}

impl ClientError {
    /// Build an error from a provider code, classifying it
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        ClientError {
            kind: classify(&code),
            code,
            message: message.into(),
        }
    }

    /// Error for an attempt that exceeded its per-attempt timeout
    pub fn timed_out(method: Method, limit: std::time::Duration) -> Self {
        ClientError {
            kind: ErrorKind::Transient,
            code: "RequestTimeout".to_string(),
            message: format!("{} did not complete within {:?}", method, limit),
        }
    }
}

/// Map a provider error code onto an [`ErrorKind`]
///
/// # Examples
///
/// ```
/// use ram_reconciler::client::{classify, ErrorKind};
///
/// assert_eq!(classify("NoPermission"), ErrorKind::PermissionDenied);
/// assert_eq!(classify("EntityNotExist.Role"), ErrorKind::NotFound);
/// assert_eq!(classify("Throttling.User"), ErrorKind::Transient);
/// ```
pub fn classify(code: &str) -> ErrorKind {
    if code == "NoPermission"
        || code.ends_with(".NoPermission")
        || code.starts_with("Forbidden")
        || code.starts_with("InvalidAccessKeyId")
        || code == "SignatureDoesNotMatch"
    {
        ErrorKind::PermissionDenied
    } else if code.starts_with("EntityNotExist") {
        ErrorKind::NotFound
    } else {
        ErrorKind::Transient
    }
}

/// Remote operations, used to label errors and recorded calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    GetRole,
    CreateRole,
    UpdateRole,
    DeleteRole,
    GetPolicy,
    CreatePolicy,
    CreatePolicyVersion,
    ListPolicyVersions,
    DeletePolicyVersion,
    DeletePolicy,
    ListPoliciesForRole,
    AttachPolicyToRole,
    DetachPolicyFromRole,
}

impl Method {
    /// Whether the operation changes remote state
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Method::GetRole | Method::GetPolicy | Method::ListPolicyVersions | Method::ListPoliciesForRole
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Policy class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyType {
    /// Provider-managed, read-only
    System,
    /// Caller-owned and versioned
    Custom,
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyType::System => write!(f, "System"),
            PolicyType::Custom => write!(f, "Custom"),
        }
    }
}

/// A role as stored by the identity service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub arn: String,
    /// Trust document as the service stores it (JSON)
    pub trust_document: String,
    #[serde(default)]
    pub description: String,
    pub create_date: DateTime<Utc>,
}

/// A policy and its default version document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub name: String,
    pub policy_type: PolicyType,
    #[serde(default)]
    pub description: String,
    pub default_version: String,
    /// Default version document (JSON)
    pub document: String,
}

/// One stored version of a custom policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyVersion {
    pub version_id: String,
    pub document: String,
    pub is_default: bool,
    pub create_date: DateTime<Utc>,
}

impl PolicyVersion {
    /// Sort key from oldest to newest: creation date, then numeric version id
    pub fn age_key(&self) -> (DateTime<Utc>, u64) {
        let number = self
            .version_id
            .trim_start_matches(|c: char| !c.is_ascii_digit())
            .parse()
            .unwrap_or(u64::MAX);
        (self.create_date, number)
    }
}

/// A policy attached to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedPolicy {
    pub name: String,
    pub policy_type: PolicyType,
}

/// Remote identity service operations consumed by the reconciler
///
/// Every call makes a single attempt; retries are the caller's concern.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn get_role(&self, name: &str) -> ClientResult<RoleRecord>;

    async fn create_role(
        &self,
        name: &str,
        trust: &TrustDocument,
        description: Option<&str>,
    ) -> ClientResult<RoleRecord>;

    async fn update_role(&self, name: &str, trust: &TrustDocument) -> ClientResult<RoleRecord>;

    async fn delete_role(&self, name: &str) -> ClientResult<()>;

    async fn get_policy(&self, name: &str, policy_type: PolicyType) -> ClientResult<PolicyRecord>;

    async fn create_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
        description: Option<&str>,
    ) -> ClientResult<PolicyRecord>;

    async fn create_policy_version(
        &self,
        name: &str,
        document: &PolicyDocument,
        set_default: bool,
    ) -> ClientResult<PolicyVersion>;

    async fn list_policy_versions(
        &self,
        name: &str,
        policy_type: PolicyType,
    ) -> ClientResult<Vec<PolicyVersion>>;

    async fn delete_policy_version(&self, name: &str, version_id: &str) -> ClientResult<()>;

    async fn delete_policy(&self, name: &str) -> ClientResult<()>;

    async fn list_policies_for_role(&self, role: &str) -> ClientResult<Vec<AttachedPolicy>>;

    async fn attach_policy_to_role(
        &self,
        name: &str,
        policy_type: PolicyType,
        role: &str,
    ) -> ClientResult<()>;

    async fn detach_policy_from_role(
        &self,
        name: &str,
        policy_type: PolicyType,
        role: &str,
    ) -> ClientResult<()>;
}
