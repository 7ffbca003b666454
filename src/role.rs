//! Role resolution and writing

use tracing::{debug, info};

use crate::backoff::Backoff;
use crate::client::{IdentityClient, Method};
use crate::document::TrustDocument;
use crate::error::Result;

/// Creates, updates and deletes roles
pub struct RoleManager<'a, C: IdentityClient + ?Sized> {
    client: &'a C,
    backoff: &'a Backoff,
}

impl<'a, C: IdentityClient + ?Sized> RoleManager<'a, C> {
    pub fn new(client: &'a C, backoff: &'a Backoff) -> Self {
        RoleManager { client, backoff }
    }

    /// Make sure role `name` exists with `trust`, returning its ARN
    ///
    /// An existing role keeps its ARN; only its trust document is replaced
    /// when it differs.
    pub async fn ensure(
        &self,
        name: &str,
        trust: &TrustDocument,
        description: Option<&str>,
    ) -> Result<String> {
        let client = self.client;
        let role = match self
            .backoff
            .run(Method::GetRole, name, move || client.get_role(name))
            .await
        {
            Ok(role) => role,
            Err(e) if e.is_not_found() => {
                info!("No {} is found, create a new role.", name);
                return self.create(name, trust, description).await;
            }
            Err(e) => return Err(e),
        };

        info!("{} already exists.", name);
        debug!("Get role {} response: {:?}", name, role);

        if trust.differs_from_json(&role.trust_document) {
            info!("{} authorization policy is inconsistent with online.", name);
            self.update(name, trust).await?;
        }

        debug!("{} arn is {}.", name, role.arn);
        Ok(role.arn)
    }

    async fn create(&self, name: &str, trust: &TrustDocument, description: Option<&str>) -> Result<String> {
        info!("Create role {} start...", name);
        let client = self.client;
        let role = self
            .backoff
            .run(Method::CreateRole, name, move || {
                client.create_role(name, trust, description)
            })
            .await?;

        info!("Create role {} success, arn is {}", name, role.arn);
        Ok(role.arn)
    }

    async fn update(&self, name: &str, trust: &TrustDocument) -> Result<String> {
        info!("Update role {} start...", name);
        let client = self.client;
        let role = self
            .backoff
            .run(Method::UpdateRole, name, move || client.update_role(name, trust))
            .await?;

        info!("Update role {} success, arn is {}", name, role.arn);
        Ok(role.arn)
    }

    /// Delete role `name`; returns `false` if it was already absent
    ///
    /// The role must have no attached policies.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        info!("Delete role {} start...", name);
        let client = self.client;
        match self
            .backoff
            .run(Method::DeleteRole, name, move || client.delete_role(name))
            .await
        {
            Ok(()) => {
                info!("Delete role {} success.", name);
                Ok(true)
            }
            Err(e) if e.is_not_found() => {
                info!("The role not exists: {}.", name);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
