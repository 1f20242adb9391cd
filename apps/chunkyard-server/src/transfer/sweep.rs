//! Staging sweep
//!
//! Reclaims residue left in the staging area by failed or interrupted
//! uploads: per-upload directories with partial chunk sets or partial merge
//! output. Only entries older than the TTL are touched so in-flight uploads
//! survive a periodic sweep.

use std::time::{Duration, SystemTime};

use super::staging::StagingArea;
use super::TransferError;
use crate::storage::LocalStore;

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    pub kept: usize,
}

/// Remove staging entries whose last modification is at least `ttl` old
pub async fn sweep_staging(
    staging: &StagingArea,
    store: &LocalStore,
    ttl: Duration,
) -> Result<SweepReport, TransferError> {
    let root = staging.root();
    if !store.is_dir(root).await {
        return Ok(SweepReport::default());
    }

    let now = SystemTime::now();
    let mut report = SweepReport::default();

    for name in store.list_names(root).await? {
        let path = root.join(&name);

        let modified = match store.modified(&path).await {
            Ok(modified) => modified,
            // Removed concurrently
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

        if age < ttl {
            report.kept += 1;
            continue;
        }

        let removed = if store.is_dir(&path).await {
            store.remove_dir_all(&path).await
        } else {
            store.remove_file(&path).await
        };

        match removed {
            Ok(()) => {
                tracing::info!(entry = %name, age_secs = age.as_secs(), "Removed stale staging entry");
                report.removed += 1;
            }
            Err(e) => {
                tracing::warn!(entry = %name, error = %e, "Failed to remove stale staging entry");
                report.kept += 1;
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_respects_ttl() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::default();
        let staging = StagingArea::new(temp_dir.path().join(".staging"), store.clone());

        let stale = staging.dir_for(Uuid::new_v4());
        tokio::fs::create_dir_all(&stale).await.unwrap();
        tokio::fs::write(stale.join("a-chunk-1.bin"), b"partial").await.unwrap();

        let kept = sweep_staging(&staging, &store, Duration::from_secs(3600)).await.unwrap();
        assert_eq!(kept, SweepReport { removed: 0, kept: 1 });
        assert!(stale.exists());

        let swept = sweep_staging(&staging, &store, Duration::ZERO).await.unwrap();
        assert_eq!(swept, SweepReport { removed: 1, kept: 0 });
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_sweep_without_staging_dir() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::default();
        let staging = StagingArea::new(temp_dir.path().join("absent"), store.clone());

        let report = sweep_staging(&staging, &store, Duration::ZERO).await.unwrap();
        assert_eq!(report, SweepReport::default());
    }
}
