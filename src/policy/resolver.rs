//! Policy existence and drift detection

use tracing::{debug, info};

use super::{PolicyReference, PolicyType};
use crate::backoff::Backoff;
use crate::client::{IdentityClient, Method, PolicyRecord};
use crate::document::{PolicyDocument, Statement};
use crate::error::Result;

/// Remote state of a declared policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Found in neither class that was searched
    Absent,
    /// Found; `matches` is always true for System policies and bare names
    Present { policy_type: PolicyType, matches: bool },
}

impl Resolution {
    pub fn exists(&self) -> bool {
        matches!(self, Resolution::Present { .. })
    }

    pub fn matches(&self) -> bool {
        matches!(self, Resolution::Present { matches: true, .. })
    }

    pub fn policy_type(&self) -> Option<PolicyType> {
        match self {
            Resolution::Absent => None,
            Resolution::Present { policy_type, .. } => Some(*policy_type),
        }
    }
}

/// Looks up declared policies in the remote service
pub struct PolicyResolver<'a, C: IdentityClient + ?Sized> {
    client: &'a C,
    backoff: &'a Backoff,
}

impl<'a, C: IdentityClient + ?Sized> PolicyResolver<'a, C> {
    pub fn new(client: &'a C, backoff: &'a Backoff) -> Self {
        PolicyResolver { client, backoff }
    }

    /// Resolve a declared reference
    ///
    /// Bare names are searched as System, then Custom. Definitions are owned
    /// custom policies and are only searched as Custom.
    pub async fn resolve_reference(&self, reference: &PolicyReference) -> Result<Resolution> {
        match reference {
            PolicyReference::ByName(name) => self.resolve(name, None).await,
            PolicyReference::Defined { name, statement, .. } => {
                self.resolve_in(name, PolicyType::Custom, Some(statement.as_slice()))
                    .await
            }
        }
    }

    /// Resolve `name` as System, then Custom
    ///
    /// A System policy always matches. A Custom policy matches when its
    /// default version holds the same statements as `statement` (in any
    /// order), or when no statement is given.
    pub async fn resolve(&self, name: &str, statement: Option<&[Statement]>) -> Result<Resolution> {
        let resolution = self.resolve_in(name, PolicyType::System, None).await?;
        if resolution.exists() {
            return Ok(resolution);
        }
        self.resolve_in(name, PolicyType::Custom, statement).await
    }

    async fn resolve_in(
        &self,
        name: &str,
        policy_type: PolicyType,
        statement: Option<&[Statement]>,
    ) -> Result<Resolution> {
        info!("Check policy {} ({}) exist start...", name, policy_type);

        let client = self.client;
        let record = match self
            .backoff
            .run(Method::GetPolicy, name, move || client.get_policy(name, policy_type))
            .await
        {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                debug!("Policy {} is not a {} policy", name, policy_type);
                return Ok(Resolution::Absent);
            }
            Err(e) => return Err(e),
        };

        debug!("On-line policy config: {:?}", record);
        info!("Check policy {} ({}) exist.", name, policy_type);

        let matches = match (policy_type, statement) {
            (PolicyType::System, _) | (_, None) => true,
            (PolicyType::Custom, Some(statement)) => default_version_matches(&record, statement),
        };

        Ok(Resolution::Present {
            policy_type,
            matches,
        })
    }
}

/// Compare the live default version against the desired statement.
/// A document that cannot be parsed never matches.
fn default_version_matches(record: &PolicyRecord, statement: &[Statement]) -> bool {
    match PolicyDocument::from_json(&record.document) {
        Ok(live) => live.matches(statement),
        Err(e) => {
            debug!("Policy {} default version is not parsable: {}", record.name, e);
            false
        }
    }
}
