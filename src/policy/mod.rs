//! Policy resolution and writing
//!
//! A declared policy is either a bare name, owned elsewhere and only
//! resolved, or a full definition owned by this crate and kept in sync
//! with its declared statement.

mod resolver;
mod versions;
mod writer;

use serde::{Deserialize, Serialize};

pub use crate::client::PolicyType;
use crate::document::Statement;
pub use resolver::{PolicyResolver, Resolution};
pub use versions::select_versions_to_delete;
pub use writer::{PolicyChange, PolicyWriter};

/// Maximum number of stored versions per custom policy
pub const VERSION_CEILING: usize = 5;

/// A policy as declared in the desired state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PolicyReference {
    /// Existing policy looked up as System, then Custom; never created or deleted
    ByName(String),
    /// Custom policy that must exist with exactly this statement
    Defined {
        name: String,
        statement: Vec<Statement>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl PolicyReference {
    pub fn by_name(name: impl Into<String>) -> Self {
        PolicyReference::ByName(name.into())
    }

    pub fn defined(
        name: impl Into<String>,
        statement: Vec<Statement>,
        description: Option<String>,
    ) -> Self {
        PolicyReference::Defined {
            name: name.into(),
            statement,
            description,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PolicyReference::ByName(name) => name,
            PolicyReference::Defined { name, .. } => name,
        }
    }

    /// Whether this crate owns the policy (and may delete it)
    pub fn is_owned(&self) -> bool {
        matches!(self, PolicyReference::Defined { .. })
    }
}
