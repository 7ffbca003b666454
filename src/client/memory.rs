//! In-memory identity service
//!
//! Implements [`IdentityClient`] over process-local state with the same
//! constraints the remote service enforces (version ceiling, delete
//! conflicts on versions and attachments, read-only system policies). Every
//! call is recorded in a journal, and failures can be injected per method,
//! which makes it the backend for tests and for the CLI's local state file.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    AttachedPolicy, ClientError, ClientResult, IdentityClient, Method, PolicyRecord, PolicyType,
    PolicyVersion, RoleRecord,
};
use crate::document::{PolicyDocument, TrustDocument};
use crate::error::Result;
use crate::policy::VERSION_CEILING;

/// A recorded call against the in-memory service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    GetRole { name: String },
    CreateRole { name: String },
    UpdateRole { name: String },
    DeleteRole { name: String },
    GetPolicy { name: String, policy_type: PolicyType },
    CreatePolicy { name: String },
    CreatePolicyVersion { name: String, set_default: bool },
    ListPolicyVersions { name: String, policy_type: PolicyType },
    DeletePolicyVersion { name: String, version_id: String },
    DeletePolicy { name: String },
    ListPoliciesForRole { role: String },
    AttachPolicyToRole { name: String, policy_type: PolicyType, role: String },
    DetachPolicyFromRole { name: String, policy_type: PolicyType, role: String },
}

impl Call {
    pub fn method(&self) -> Method {
        match self {
            Call::GetRole { .. } => Method::GetRole,
            Call::CreateRole { .. } => Method::CreateRole,
            Call::UpdateRole { .. } => Method::UpdateRole,
            Call::DeleteRole { .. } => Method::DeleteRole,
            Call::GetPolicy { .. } => Method::GetPolicy,
            Call::CreatePolicy { .. } => Method::CreatePolicy,
            Call::CreatePolicyVersion { .. } => Method::CreatePolicyVersion,
            Call::ListPolicyVersions { .. } => Method::ListPolicyVersions,
            Call::DeletePolicyVersion { .. } => Method::DeletePolicyVersion,
            Call::DeletePolicy { .. } => Method::DeletePolicy,
            Call::ListPoliciesForRole { .. } => Method::ListPoliciesForRole,
            Call::AttachPolicyToRole { .. } => Method::AttachPolicyToRole,
            Call::DetachPolicyFromRole { .. } => Method::DetachPolicyFromRole,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomPolicy {
    #[serde(default)]
    description: String,
    versions: Vec<PolicyVersion>,
    next_version: u64,
}

impl CustomPolicy {
    fn default_version(&self) -> Option<&PolicyVersion> {
        self.versions.iter().find(|v| v.is_default)
    }

    fn record(&self, name: &str) -> PolicyRecord {
        let default = self.default_version();
        PolicyRecord {
            name: name.to_string(),
            policy_type: PolicyType::Custom,
            description: self.description.clone(),
            default_version: default.map(|v| v.version_id.clone()).unwrap_or_default(),
            document: default.map(|v| v.document.clone()).unwrap_or_default(),
        }
    }
}

/// Persistent part of the service state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Store {
    account_id: String,
    #[serde(default)]
    roles: BTreeMap<String, RoleRecord>,
    #[serde(default)]
    system_policies: BTreeMap<String, PolicyRecord>,
    #[serde(default)]
    custom_policies: BTreeMap<String, CustomPolicy>,
    #[serde(default)]
    attachments: BTreeMap<String, Vec<AttachedPolicy>>,
}

#[derive(Debug, Default)]
struct Inner {
    store: Store,
    journal: Vec<Call>,
    faults: HashMap<Method, VecDeque<ClientError>>,
}

/// Shared in-memory identity service; clones observe the same state
#[derive(Clone)]
pub struct MemoryIdentityService {
    inner: Arc<Mutex<Inner>>,
}

fn not_found(code: &str, name: &str) -> ClientError {
    ClientError::from_code(code, format!("The entity {} does not exist", name))
}

fn read_only(name: &str) -> ClientError {
    ClientError::from_code(
        "NoPermission",
        format!("System policy {} cannot be modified", name),
    )
}

impl MemoryIdentityService {
    /// Create an empty service for the given account
    pub fn new(account_id: impl Into<String>) -> Self {
        let store = Store {
            account_id: account_id.into(),
            ..Store::default()
        };
        Self::from_store(store)
    }

    fn from_store(store: Store) -> Self {
        MemoryIdentityService {
            inner: Arc::new(Mutex::new(Inner {
                store,
                ..Inner::default()
            })),
        }
    }

    /// Load state previously written by [`save`](Self::save)
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let store: Store = serde_json::from_str(&json)?;
        Ok(Self::from_store(store))
    }

    /// Load state from `path` if it exists, else start empty
    pub fn open(path: impl AsRef<Path>, account_id: impl Into<String>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            debug!("Loading identity state from {:?}", path);
            Self::load(path)
        } else {
            debug!("No identity state at {:?}, starting empty", path);
            Ok(Self::new(account_id))
        }
    }

    /// Write the persistent state (not the journal) as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = {
            let inner = self.inner.lock();
            serde_json::to_string_pretty(&inner.store)?
        };
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Register a provider-managed policy
    pub fn add_system_policy(&self, name: &str, document: &PolicyDocument) -> Result<()> {
        let document = document.to_json()?;
        let mut inner = self.inner.lock();
        inner.store.system_policies.insert(
            name.to_string(),
            PolicyRecord {
                name: name.to_string(),
                policy_type: PolicyType::System,
                description: String::new(),
                default_version: "v1".to_string(),
                document,
            },
        );
        Ok(())
    }

    /// Make the next `times` calls of `method` fail with `code`
    pub fn fail_next(&self, method: Method, code: &str, times: usize) {
        let mut inner = self.inner.lock();
        let queue = inner.faults.entry(method).or_default();
        for _ in 0..times {
            queue.push_back(ClientError::from_code(code, "injected failure"));
        }
    }

    /// All calls recorded so far, failed ones included
    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().journal.clone()
    }

    /// Recorded calls that change state
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.method().is_mutation())
            .collect()
    }

    /// Number of recorded calls of `method`
    pub fn count(&self, method: Method) -> usize {
        self.inner
            .lock()
            .journal
            .iter()
            .filter(|call| call.method() == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().journal.clear();
    }

    pub fn role(&self, name: &str) -> Option<RoleRecord> {
        self.inner.lock().store.roles.get(name).cloned()
    }

    pub fn custom_policy_exists(&self, name: &str) -> bool {
        self.inner.lock().store.custom_policies.contains_key(name)
    }

    /// Stored versions of a custom policy (empty if absent)
    pub fn versions(&self, name: &str) -> Vec<PolicyVersion> {
        self.inner
            .lock()
            .store
            .custom_policies
            .get(name)
            .map(|policy| policy.versions.clone())
            .unwrap_or_default()
    }

    /// Policies attached to a role (empty if absent)
    pub fn attached(&self, role: &str) -> Vec<AttachedPolicy> {
        self.inner
            .lock()
            .store
            .attachments
            .get(role)
            .cloned()
            .unwrap_or_default()
    }

    /// Record `call`, then either surface an injected fault or hand out the state
    fn enter(&self, call: Call) -> ClientResult<MutexGuard<'_, Inner>> {
        let mut inner = self.inner.lock();
        let method = call.method();
        inner.journal.push(call);
        if let Some(fault) = inner.faults.get_mut(&method).and_then(VecDeque::pop_front) {
            return Err(fault);
        }
        Ok(inner)
    }
}

#[async_trait]
impl IdentityClient for MemoryIdentityService {
    async fn get_role(&self, name: &str) -> ClientResult<RoleRecord> {
        let inner = self.enter(Call::GetRole { name: name.to_string() })?;
        inner
            .store
            .roles
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("EntityNotExist.Role", name))
    }

    async fn create_role(
        &self,
        name: &str,
        trust: &TrustDocument,
        description: Option<&str>,
    ) -> ClientResult<RoleRecord> {
        let mut inner = self.enter(Call::CreateRole { name: name.to_string() })?;
        if inner.store.roles.contains_key(name) {
            return Err(ClientError::from_code(
                "EntityAlreadyExists.Role",
                format!("The role {} already exists", name),
            ));
        }

        let trust_document = trust
            .to_json()
            .map_err(|e| ClientError::from_code("InvalidParameter.PolicyDocument", e.to_string()))?;
        let role = RoleRecord {
            name: name.to_string(),
            arn: format!(
                "acs:ram::{}:role/{}",
                inner.store.account_id,
                name.to_lowercase()
            ),
            trust_document,
            description: description.unwrap_or_default().to_string(),
            create_date: Utc::now(),
        };
        inner.store.roles.insert(name.to_string(), role.clone());
        Ok(role)
    }

    async fn update_role(&self, name: &str, trust: &TrustDocument) -> ClientResult<RoleRecord> {
        let mut inner = self.enter(Call::UpdateRole { name: name.to_string() })?;
        let trust_document = trust
            .to_json()
            .map_err(|e| ClientError::from_code("InvalidParameter.PolicyDocument", e.to_string()))?;
        let role = inner
            .store
            .roles
            .get_mut(name)
            .ok_or_else(|| not_found("EntityNotExist.Role", name))?;
        role.trust_document = trust_document;
        Ok(role.clone())
    }

    async fn delete_role(&self, name: &str) -> ClientResult<()> {
        let mut inner = self.enter(Call::DeleteRole { name: name.to_string() })?;
        if !inner.store.roles.contains_key(name) {
            return Err(not_found("EntityNotExist.Role", name));
        }
        if inner.store.attachments.get(name).is_some_and(|a| !a.is_empty()) {
            return Err(ClientError::from_code(
                "DeleteConflict.Role.Policy",
                format!("The role {} still has attached policies", name),
            ));
        }
        inner.store.roles.remove(name);
        inner.store.attachments.remove(name);
        Ok(())
    }

    async fn get_policy(&self, name: &str, policy_type: PolicyType) -> ClientResult<PolicyRecord> {
        let inner = self.enter(Call::GetPolicy {
            name: name.to_string(),
            policy_type,
        })?;
        let record = match policy_type {
            PolicyType::System => inner.store.system_policies.get(name).cloned(),
            PolicyType::Custom => inner.store.custom_policies.get(name).map(|p| p.record(name)),
        };
        record.ok_or_else(|| not_found("EntityNotExist.Policy", name))
    }

    async fn create_policy(
        &self,
        name: &str,
        document: &PolicyDocument,
        description: Option<&str>,
    ) -> ClientResult<PolicyRecord> {
        let mut inner = self.enter(Call::CreatePolicy { name: name.to_string() })?;
        if inner.store.custom_policies.contains_key(name)
            || inner.store.system_policies.contains_key(name)
        {
            return Err(ClientError::from_code(
                "EntityAlreadyExists.Policy",
                format!("The policy {} already exists", name),
            ));
        }

        let document = document
            .to_json()
            .map_err(|e| ClientError::from_code("InvalidParameter.PolicyDocument", e.to_string()))?;
        let policy = CustomPolicy {
            description: description.unwrap_or_default().to_string(),
            versions: vec![PolicyVersion {
                version_id: "v1".to_string(),
                document,
                is_default: true,
                create_date: Utc::now(),
            }],
            next_version: 2,
        };
        let record = policy.record(name);
        inner.store.custom_policies.insert(name.to_string(), policy);
        Ok(record)
    }

    async fn create_policy_version(
        &self,
        name: &str,
        document: &PolicyDocument,
        set_default: bool,
    ) -> ClientResult<PolicyVersion> {
        let mut inner = self.enter(Call::CreatePolicyVersion {
            name: name.to_string(),
            set_default,
        })?;
        let is_system = inner.store.system_policies.contains_key(name);
        let document = document
            .to_json()
            .map_err(|e| ClientError::from_code("InvalidParameter.PolicyDocument", e.to_string()))?;
        let policy = match inner.store.custom_policies.get_mut(name) {
            Some(policy) => policy,
            None if is_system => return Err(read_only(name)),
            None => return Err(not_found("EntityNotExist.Policy", name)),
        };

        if policy.versions.len() >= VERSION_CEILING {
            return Err(ClientError::from_code(
                "LimitExceeded.Policy.Version",
                format!("The policy {} already has {} versions", name, VERSION_CEILING),
            ));
        }

        if set_default {
            for version in policy.versions.iter_mut() {
                version.is_default = false;
            }
        }
        let version = PolicyVersion {
            version_id: format!("v{}", policy.next_version),
            document,
            is_default: set_default,
            create_date: Utc::now(),
        };
        policy.next_version += 1;
        policy.versions.push(version.clone());
        Ok(version)
    }

    async fn list_policy_versions(
        &self,
        name: &str,
        policy_type: PolicyType,
    ) -> ClientResult<Vec<PolicyVersion>> {
        let inner = self.enter(Call::ListPolicyVersions {
            name: name.to_string(),
            policy_type,
        })?;
        match policy_type {
            PolicyType::Custom => inner
                .store
                .custom_policies
                .get(name)
                .map(|policy| policy.versions.clone())
                .ok_or_else(|| not_found("EntityNotExist.Policy", name)),
            PolicyType::System => inner
                .store
                .system_policies
                .get(name)
                .map(|policy| {
                    vec![PolicyVersion {
                        version_id: policy.default_version.clone(),
                        document: policy.document.clone(),
                        is_default: true,
                        create_date: Utc::now(),
                    }]
                })
                .ok_or_else(|| not_found("EntityNotExist.Policy", name)),
        }
    }

    async fn delete_policy_version(&self, name: &str, version_id: &str) -> ClientResult<()> {
        let mut inner = self.enter(Call::DeletePolicyVersion {
            name: name.to_string(),
            version_id: version_id.to_string(),
        })?;
        let is_system = inner.store.system_policies.contains_key(name);
        let policy = match inner.store.custom_policies.get_mut(name) {
            Some(policy) => policy,
            None if is_system => return Err(read_only(name)),
            None => return Err(not_found("EntityNotExist.Policy", name)),
        };

        let index = policy
            .versions
            .iter()
            .position(|v| v.version_id == version_id)
            .ok_or_else(|| not_found("EntityNotExist.Policy.Version", version_id))?;
        if policy.versions[index].is_default {
            return Err(ClientError::from_code(
                "DeleteConflict.Policy.Version.Default",
                format!("Version {} of {} is the default version", version_id, name),
            ));
        }
        policy.versions.remove(index);
        Ok(())
    }

    async fn delete_policy(&self, name: &str) -> ClientResult<()> {
        let mut inner = self.enter(Call::DeletePolicy { name: name.to_string() })?;
        let is_system = inner.store.system_policies.contains_key(name);
        let policy = match inner.store.custom_policies.get(name) {
            Some(policy) => policy,
            None if is_system => return Err(read_only(name)),
            None => return Err(not_found("EntityNotExist.Policy", name)),
        };
        if policy.versions.len() > 1 {
            return Err(ClientError::from_code(
                "DeleteConflict.Policy.Version",
                format!("The policy {} still has non-default versions", name),
            ));
        }
        let holder = inner.store.attachments.iter().find_map(|(role, attached)| {
            attached
                .iter()
                .any(|p| p.policy_type == PolicyType::Custom && p.name == name)
                .then(|| role.clone())
        });
        if let Some(role) = holder {
            return Err(ClientError::from_code(
                "DeleteConflict.Policy.Role",
                format!("The policy {} is still attached to role {}", name, role),
            ));
        }

        inner.store.custom_policies.remove(name);
        Ok(())
    }

    async fn list_policies_for_role(&self, role: &str) -> ClientResult<Vec<AttachedPolicy>> {
        let inner = self.enter(Call::ListPoliciesForRole { role: role.to_string() })?;
        if !inner.store.roles.contains_key(role) {
            return Err(not_found("EntityNotExist.Role", role));
        }
        Ok(inner.store.attachments.get(role).cloned().unwrap_or_default())
    }

    async fn attach_policy_to_role(
        &self,
        name: &str,
        policy_type: PolicyType,
        role: &str,
    ) -> ClientResult<()> {
        let mut inner = self.enter(Call::AttachPolicyToRole {
            name: name.to_string(),
            policy_type,
            role: role.to_string(),
        })?;
        if !inner.store.roles.contains_key(role) {
            return Err(not_found("EntityNotExist.Role", role));
        }
        let policy_exists = match policy_type {
            PolicyType::System => inner.store.system_policies.contains_key(name),
            PolicyType::Custom => inner.store.custom_policies.contains_key(name),
        };
        if !policy_exists {
            return Err(not_found("EntityNotExist.Policy", name));
        }

        let attached = inner.store.attachments.entry(role.to_string()).or_default();
        if attached
            .iter()
            .any(|p| p.policy_type == policy_type && p.name.eq_ignore_ascii_case(name))
        {
            return Err(ClientError::from_code(
                "EntityAlreadyExists.Role.Policy",
                format!("The policy {} is already attached to {}", name, role),
            ));
        }
        attached.push(AttachedPolicy {
            name: name.to_string(),
            policy_type,
        });
        Ok(())
    }

    async fn detach_policy_from_role(
        &self,
        name: &str,
        policy_type: PolicyType,
        role: &str,
    ) -> ClientResult<()> {
        let mut inner = self.enter(Call::DetachPolicyFromRole {
            name: name.to_string(),
            policy_type,
            role: role.to_string(),
        })?;
        if !inner.store.roles.contains_key(role) {
            return Err(not_found("EntityNotExist.Role", role));
        }
        let attached = inner.store.attachments.entry(role.to_string()).or_default();
        let index = attached
            .iter()
            .position(|p| p.policy_type == policy_type && p.name == name)
            .ok_or_else(|| not_found("EntityNotExist.Role.Policy", name))?;
        attached.remove(index);
        Ok(())
    }
}
