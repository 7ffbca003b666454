//! Deploy and destroy orchestration
//!
//! `deploy` ensures the role, resolves or writes each declared policy, and
//! attaches them all. `destroy` deletes the owned policies, then detaches
//! everything from the role and deletes it. Neither keeps state between
//! invocations; every run re-reads the remote service.

use tracing::{debug, info, warn};

use crate::attachment::AttachmentManager;
use crate::backoff::{Backoff, RetryPolicy};
use crate::client::{AttachedPolicy, IdentityClient};
use crate::config::RoleConfig;
use crate::error::{ReconcileError, Result};
use crate::policy::{PolicyReference, PolicyResolver, PolicyType, PolicyWriter, Resolution};
use crate::role::RoleManager;
use crate::validation::validate_role_name;

/// Reconciles a [`RoleConfig`] against an identity service
pub struct Reconciler<C: IdentityClient> {
    client: C,
    backoff: Backoff,
}

impl<C: IdentityClient> Reconciler<C> {
    pub fn new(client: C, policy: RetryPolicy) -> Self {
        Reconciler {
            client,
            backoff: Backoff::new(policy),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Make the remote role and policies match `config`; returns the role ARN
    ///
    /// A failed step aborts the run without rolling back earlier steps;
    /// running `deploy` again resumes from the remote state.
    pub async fn deploy(&self, config: &RoleConfig) -> Result<String> {
        config.validate()?;
        let trust = config.trust_document()?;

        let roles = RoleManager::new(&self.client, &self.backoff);
        let arn = roles
            .ensure(&config.name, &trust, config.description.as_deref())
            .await?;

        debug!("Ram component policies config: {:?}", config.policies);
        let policies = self.resolve_policies(&config.policies).await?;
        debug!("Ram component policies names: {:?}", policies);

        let attachments = AttachmentManager::new(&self.client, &self.backoff);
        attachments.attach(&policies, &config.name).await?;

        info!("Role {} deployed: {}", config.name, arn);
        Ok(arn)
    }

    /// Resolve each reference, writing owned policies as needed, one at a time
    pub async fn resolve_policies(&self, references: &[PolicyReference]) -> Result<Vec<AttachedPolicy>> {
        let resolver = PolicyResolver::new(&self.client, &self.backoff);
        let writer = PolicyWriter::new(&self.client, &self.backoff);
        let mut resolved = Vec::with_capacity(references.len());

        for reference in references {
            let resolution = resolver.resolve_reference(reference).await?;

            let policy_type = match reference {
                PolicyReference::ByName(name) => match resolution {
                    Resolution::Present { policy_type, .. } => policy_type,
                    Resolution::Absent => {
                        return Err(ReconcileError::UnresolvedPolicy { name: name.clone() });
                    }
                },
                PolicyReference::Defined {
                    name,
                    statement,
                    description,
                } => {
                    writer
                        .create_or_update(name, statement, description.as_deref(), resolution)
                        .await?;
                    PolicyType::Custom
                }
            };

            resolved.push(AttachedPolicy {
                name: reference.name().to_string(),
                policy_type,
            });
        }

        Ok(resolved)
    }

    /// Remove the owned policies and the role described by `config`
    ///
    /// Entities that are already gone count as removed. Bare-name policies
    /// belong to someone else and are left in place. An owned policy still
    /// attached to the role is detached first, since the service refuses to
    /// delete attached policies.
    pub async fn destroy(&self, config: &RoleConfig) -> Result<()> {
        validate_role_name(&config.name)?;

        let attachments = AttachmentManager::new(&self.client, &self.backoff);
        let attached = attachments.attached(&config.name).await?;

        let writer = PolicyWriter::new(&self.client, &self.backoff);
        for reference in &config.policies {
            match reference {
                PolicyReference::ByName(name) => {
                    warn!("{} is a reference resource, skip delete.", name);
                }
                PolicyReference::Defined { name, .. } => {
                    let bound = attached.iter().flatten().find(|policy| {
                        policy.policy_type == PolicyType::Custom
                            && policy.name.eq_ignore_ascii_case(name)
                    });
                    if let Some(policy) = bound {
                        attachments.detach(policy, &config.name).await?;
                    }
                    writer.delete_all(name).await?;
                }
            }
        }

        if attached.is_none() {
            info!("The role not exists: {}.", config.name);
            return Ok(());
        }

        if let Some(detached) = attachments.detach_all(&config.name).await? {
            debug!("Detached {} policies from {}", detached, config.name);
            let roles = RoleManager::new(&self.client, &self.backoff);
            roles.delete(&config.name).await?;
        }

        Ok(())
    }
}
