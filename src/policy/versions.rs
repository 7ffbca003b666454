//! Version pruning decisions

use crate::client::PolicyVersion;

/// Choose which stored versions to delete
///
/// With `delete_all`, every non-default version is returned (teardown).
/// Otherwise only enough of the oldest non-default versions are returned to
/// leave room for one new version under `ceiling`. The default version is
/// never selected.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use ram_reconciler::client::PolicyVersion;
/// use ram_reconciler::policy::select_versions_to_delete;
///
/// let versions: Vec<PolicyVersion> = (1..=5)
///     .map(|i| PolicyVersion {
///         version_id: format!("v{}", i),
///         document: String::new(),
///         is_default: i == 5,
///         create_date: Utc::now(),
///     })
///     .collect();
///
/// let doomed = select_versions_to_delete(&versions, 5, false);
/// assert_eq!(doomed.len(), 1);
/// assert_eq!(doomed[0].version_id, "v1");
/// ```
pub fn select_versions_to_delete(
    versions: &[PolicyVersion],
    ceiling: usize,
    delete_all: bool,
) -> Vec<PolicyVersion> {
    let mut candidates: Vec<&PolicyVersion> = versions.iter().filter(|v| !v.is_default).collect();
    candidates.sort_by_key(|v| v.age_key());

    let count = if delete_all {
        candidates.len()
    } else {
        (versions.len() + 1).saturating_sub(ceiling)
    };

    candidates.into_iter().take(count).cloned().collect()
}
