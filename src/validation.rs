//! Validation for role and policy names
//!
//! The identity service rejects malformed names with a generic error that the
//! reconciler would otherwise retry, so names are checked before any remote call.
//!
//! # Rules
//! - Role names: 1-64 characters, letters, digits, `.` and `-`
//! - Policy names: 1-128 characters, letters, digits and `-`

use crate::error::{ReconcileError, Result};
use regex::Regex;

/// Pattern for valid role names
const ROLE_NAME_PATTERN: &str = r"^[A-Za-z0-9.\-]+$";

/// Pattern for valid custom policy names
const POLICY_NAME_PATTERN: &str = r"^[A-Za-z0-9\-]+$";

/// Maximum role name length
pub const MAX_ROLE_NAME_LENGTH: usize = 64;

/// Maximum policy name length
pub const MAX_POLICY_NAME_LENGTH: usize = 128;

/// Validate a role name
///
/// # Examples
///
/// ```
/// use ram_reconciler::validation::validate_role_name;
///
/// assert!(validate_role_name("fc-default-role").is_ok());
/// assert!(validate_role_name("fc_default_role").is_err()); // underscore
/// ```
pub fn validate_role_name(name: &str) -> Result<()> {
    validate_name("role", name, ROLE_NAME_PATTERN, MAX_ROLE_NAME_LENGTH)
}

/// Validate a policy name
///
/// System policy names (e.g. `AliyunOSSFullAccess`) satisfy the same rules,
/// so bare-name references are checked with this function too.
pub fn validate_policy_name(name: &str) -> Result<()> {
    validate_name("policy", name, POLICY_NAME_PATTERN, MAX_POLICY_NAME_LENGTH)
}

fn validate_name(entity: &str, name: &str, pattern: &str, max_length: usize) -> Result<()> {
    if name.is_empty() {
        return Err(ReconcileError::InvalidConfig(format!(
            "{} name cannot be empty",
            entity
        )));
    }

    if name.len() > max_length {
        return Err(ReconcileError::InvalidConfig(format!(
            "{} name '{}' too long (max {} characters)",
            entity, name, max_length
        )));
    }

    let re = Regex::new(pattern).map_err(|e| ReconcileError::InvalidConfig(e.to_string()))?;
    if !re.is_match(name) {
        return Err(ReconcileError::InvalidConfig(format!(
            "{} name '{}' contains invalid characters",
            entity, name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_role_names() {
        assert!(validate_role_name("a").is_ok());
        assert!(validate_role_name("AliyunFCDefaultRole").is_ok());
        assert!(validate_role_name("fc.service-role-2").is_ok());
        assert!(validate_role_name(&"r".repeat(MAX_ROLE_NAME_LENGTH)).is_ok());
    }

    #[test]
    fn test_invalid_role_names() {
        assert!(validate_role_name("").is_err()); // empty
        assert!(validate_role_name("my role").is_err()); // space
        assert!(validate_role_name("my_role").is_err()); // underscore
        assert!(validate_role_name("role/path").is_err()); // slash
        assert!(validate_role_name(&"r".repeat(MAX_ROLE_NAME_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_policy_names() {
        assert!(validate_policy_name("AliyunOSSFullAccess").is_ok());
        assert!(validate_policy_name("fc-log-writer").is_ok());
        assert!(validate_policy_name("fc.log").is_err()); // dot
        assert!(validate_policy_name("").is_err());
        assert!(validate_policy_name(&"p".repeat(MAX_POLICY_NAME_LENGTH + 1)).is_err());
    }
}
