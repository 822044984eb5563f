//! Retention sweep: logical deletion of old versions.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

use crate::config::RetentionPolicy;
use crate::models::VersionRecord;
use crate::persistence::{run_blocking, SharedStore};
use crate::utils::errors::PersistenceError;

/// Ids of versions that fall out of retention at `now`.
///
/// For each `(path_id, file_path)` the newest `min_versions` live versions are
/// kept regardless of age. Older ones created before the window are expired.
pub fn expired_versions<F>(versions: &[VersionRecord], now: DateTime<Utc>, policy_for: F) -> Vec<String>
where
    F: Fn(&str) -> RetentionPolicy,
{
    let mut groups: HashMap<(&str, &PathBuf), Vec<&VersionRecord>> = HashMap::new();
    for v in versions.iter().filter(|v| !v.is_deleted) {
        groups.entry((v.path_id.as_str(), &v.file_path)).or_default().push(v);
    }

    let mut expired = Vec::new();
    for ((path_id, _), mut group) in groups {
        let policy = policy_for(path_id);
        let cutoff = now - Duration::days(i64::from(policy.retention_days));
        group.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        expired.extend(
            group
                .into_iter()
                .skip(policy.min_versions)
                .filter(|v| v.created_at < cutoff)
                .map(|v| v.id.clone()),
        );
    }
    expired.sort();
    expired
}

/// Run one sweep against `store`. Returns how many versions were marked.
pub async fn sweep(
    store: &SharedStore,
    default_policy: RetentionPolicy,
    overrides: HashMap<String, RetentionPolicy>,
) -> Result<usize, PersistenceError> {
    let versions = run_blocking(store, |s| s.list_versions(None)).await?;
    let expired = expired_versions(&versions, Utc::now(), |path_id| {
        overrides.get(path_id).copied().unwrap_or(default_policy)
    });
    if expired.is_empty() {
        info!("Retention sweep: nothing to expire ({} versions)", versions.len());
        return Ok(0);
    }

    let marked = run_blocking(store, move |s| s.mark_versions_deleted(&expired)).await?;
    info!("Retention sweep: marked {} version(s) deleted", marked);
    Ok(marked)
}
