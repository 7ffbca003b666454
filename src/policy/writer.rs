//! Custom policy creation, update and deletion

use tracing::{debug, info};

use super::{select_versions_to_delete, PolicyType, Resolution, VERSION_CEILING};
use crate::backoff::Backoff;
use crate::client::{IdentityClient, Method};
use crate::document::{PolicyDocument, Statement};
use crate::error::Result;

/// Outcome of [`PolicyWriter::create_or_update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChange {
    Created,
    /// A new default version was written
    Updated,
    Unchanged,
}

/// Writes custom policies owned by the caller
pub struct PolicyWriter<'a, C: IdentityClient + ?Sized> {
    client: &'a C,
    backoff: &'a Backoff,
}

impl<'a, C: IdentityClient + ?Sized> PolicyWriter<'a, C> {
    pub fn new(client: &'a C, backoff: &'a Backoff) -> Self {
        PolicyWriter { client, backoff }
    }

    /// Bring a custom policy in line with `statement`, given its resolution
    pub async fn create_or_update(
        &self,
        name: &str,
        statement: &[Statement],
        description: Option<&str>,
        resolution: Resolution,
    ) -> Result<PolicyChange> {
        match resolution {
            Resolution::Absent => {
                info!("Check policy {} does not exist.", name);
                self.create(name, statement, description).await?;
                Ok(PolicyChange::Created)
            }
            Resolution::Present { matches: false, .. } => {
                self.update(name, statement).await?;
                Ok(PolicyChange::Updated)
            }
            Resolution::Present { matches: true, .. } => {
                debug!("Policy {} is up to date", name);
                Ok(PolicyChange::Unchanged)
            }
        }
    }

    /// Create a custom policy whose only version holds `statement`
    pub async fn create(&self, name: &str, statement: &[Statement], description: Option<&str>) -> Result<()> {
        info!("Create policy {} start...", name);

        let document = PolicyDocument::new(statement.to_vec());
        let (client, document) = (self.client, &document);
        self.backoff
            .run(Method::CreatePolicy, name, move || {
                client.create_policy(name, document, description)
            })
            .await?;

        info!("Create policy {} success.", name);
        Ok(())
    }

    /// Write `statement` as the new default version
    ///
    /// The version list is fetched right before pruning so the ceiling check
    /// sees the current count.
    pub async fn update(&self, name: &str, statement: &[Statement]) -> Result<()> {
        info!("Update policy {} start...", name);

        let client = self.client;
        let versions = self
            .backoff
            .run(Method::ListPolicyVersions, name, move || {
                client.list_policy_versions(name, PolicyType::Custom)
            })
            .await?;
        debug!("Policy {} has {} version(s)", name, versions.len());

        for version in select_versions_to_delete(&versions, VERSION_CEILING, false) {
            self.delete_version(name, &version.version_id).await?;
        }

        let document = PolicyDocument::new(statement.to_vec());
        let document = &document;
        let version = self
            .backoff
            .run(Method::CreatePolicyVersion, name, move || {
                client.create_policy_version(name, document, true)
            })
            .await?;

        info!("Update policy {} success, default version is {}.", name, version.version_id);
        Ok(())
    }

    /// Delete every version of a custom policy, then the policy itself
    ///
    /// Returns `false` when the policy was already absent.
    pub async fn delete_all(&self, name: &str) -> Result<bool> {
        let client = self.client;
        let versions = match self
            .backoff
            .run(Method::ListPolicyVersions, name, move || {
                client.list_policy_versions(name, PolicyType::Custom)
            })
            .await
        {
            Ok(versions) => versions,
            Err(e) if e.is_not_found() => {
                debug!("The policy does not exist: {}", name);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        debug!("Delete policy {} all version start...", name);
        for version in select_versions_to_delete(&versions, VERSION_CEILING, true) {
            match self.delete_version(name, &version.version_id).await {
                Err(e) if e.is_not_found() => {
                    debug!("Version {} of {} is already gone", version.version_id, name);
                }
                other => other?,
            }
        }

        info!("Delete policy {} start...", name);
        match self
            .backoff
            .run(Method::DeletePolicy, name, move || client.delete_policy(name))
            .await
        {
            Ok(()) => {
                info!("Delete policy {} success.", name);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                debug!("The policy does not exist: {}", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_version(&self, name: &str, version_id: &str) -> Result<()> {
        debug!("Delete policy {} version {}", name, version_id);
        let client = self.client;
        self.backoff
            .run(Method::DeletePolicyVersion, name, move || {
                client.delete_policy_version(name, version_id)
            })
            .await
    }
}
