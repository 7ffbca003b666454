//! Binding policies to roles

use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::client::{AttachedPolicy, IdentityClient, Method};
use crate::error::Result;

/// Attaches and detaches policies on a role
pub struct AttachmentManager<'a, C: IdentityClient + ?Sized> {
    client: &'a C,
    backoff: &'a Backoff,
}

impl<'a, C: IdentityClient + ?Sized> AttachmentManager<'a, C> {
    pub fn new(client: &'a C, backoff: &'a Backoff) -> Self {
        AttachmentManager { client, backoff }
    }

    async fn list(&self, role: &str) -> Result<Vec<AttachedPolicy>> {
        debug!("Get list policies for {} start...", role);
        let client = self.client;
        let attached = self
            .backoff
            .run(Method::ListPoliciesForRole, role, move || {
                client.list_policies_for_role(role)
            })
            .await?;
        debug!("Get list policies for {} response: {:?}", role, attached);
        Ok(attached)
    }

    /// Attach each of `policies` to `role` unless already attached
    ///
    /// The attached set is read once; names compare case-insensitively.
    /// Returns the number of policies newly attached.
    pub async fn attach(&self, policies: &[AttachedPolicy], role: &str) -> Result<usize> {
        let attached = self.list(role).await?;
        let mut count = 0;

        for policy in policies {
            if attached
                .iter()
                .any(|item| item.name.eq_ignore_ascii_case(&policy.name))
            {
                info!("Policy({}) already exists in {}, skip attach.", policy.name, role);
                continue;
            }

            info!("Attach policy({}) to {} start...", policy.name, role);
            let (client, name, policy_type) = (self.client, policy.name.as_str(), policy.policy_type);
            self.backoff
                .run(Method::AttachPolicyToRole, name, move || {
                    client.attach_policy_to_role(name, policy_type, role)
                })
                .await?;
            info!("Attach policy({}) to {} success.", policy.name, role);
            count += 1;
        }

        Ok(count)
    }

    /// Policies attached to `role`, or `None` when the role does not exist
    pub async fn attached(&self, role: &str) -> Result<Option<Vec<AttachedPolicy>>> {
        match self.list(role).await {
            Ok(attached) => Ok(Some(attached)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Detach one policy; returns `false` if it was no longer attached
    pub async fn detach(&self, policy: &AttachedPolicy, role: &str) -> Result<bool> {
        info!("Detach policy({}) from {} start...", policy.name, role);
        let (client, name, policy_type) = (self.client, policy.name.as_str(), policy.policy_type);
        match self
            .backoff
            .run(Method::DetachPolicyFromRole, name, move || {
                client.detach_policy_from_role(name, policy_type, role)
            })
            .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => {
                debug!("Policy({}) is no longer attached to {}", policy.name, role);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Detach every policy from `role`
    ///
    /// Returns `None` when the role does not exist, else the number of
    /// policies detached. Must complete before the role is deleted.
    pub async fn detach_all(&self, role: &str) -> Result<Option<usize>> {
        let attached = match self.attached(role).await? {
            Some(attached) => attached,
            None => return Ok(None),
        };

        for policy in &attached {
            self.detach(policy, role).await?;
        }

        Ok(Some(attached.len()))
    }
}
