//! # RAM Reconciler - Idempotent Role & Policy Provisioning
//!
//! `ram-reconciler` makes a cloud identity service hold exactly the role and
//! access policies a deployment declares:
//!
//! - **Roles** are created on first deploy and their trust document is
//!   updated in place on drift (the ARN never changes)
//! - **Policies** are either referenced by name (System or Custom, never
//!   modified) or fully defined (Custom, created or re-versioned on drift,
//!   with old versions pruned under the provider's ceiling of 5)
//! - **Attachments** are added only when missing
//! - **Teardown** deletes owned policies and the role, treating anything
//!   already gone as done
//!
//! Transient failures are retried with exponential backoff; permission
//! failures are surfaced on the first attempt.
//!
//! ## Quick Start
//!
//! ```rust
//! use ram_reconciler::{
//!     Effect, MemoryIdentityService, PolicyReference, Reconciler, RetryPolicy, RoleConfig,
//!     Statement,
//! };
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let service = MemoryIdentityService::new("1234567890");
//! let reconciler = Reconciler::new(service, RetryPolicy::default());
//!
//! let config = RoleConfig::for_service("fc-service-role", "fc.aliyuncs.com").with_policy(
//!     PolicyReference::defined(
//!         "fc-log-writer",
//!         vec![Statement::new(Effect::Allow, "log:PostLogStoreLogs", "*")],
//!         None,
//!     ),
//! );
//!
//! let arn = reconciler.deploy(&config).await?;
//! assert_eq!(arn, "acs:ram::1234567890:role/fc-service-role");
//!
//! reconciler.destroy(&config).await?;
//! # Ok::<(), ram_reconciler::ReconcileError>(())
//! # }).unwrap();
//! ```

pub mod attachment;
pub mod backoff;
pub mod client;
pub mod config;
pub mod document;
pub mod error;
pub mod policy;
pub mod reconciler;
pub mod role;
pub mod validation;

pub use crate::{
    backoff::{Backoff, RetryPolicy},
    client::{
        AttachedPolicy, ClientError, ErrorKind, IdentityClient, MemoryIdentityService, Method,
        PolicyType,
    },
    config::{ConfigFile, RoleConfig, Settings},
    document::{Effect, PolicyDocument, Statement, TrustDocument, TrustStatement},
    error::{FailureKind, ReconcileError, Result},
    policy::{PolicyReference, VERSION_CEILING},
    reconciler::Reconciler,
};
