//! Transfer coordinator
//!
//! Drives one upload through `Received → Chunking → (Merging) → Publishing
//! → Done`, and serves downloads from whatever the catalog resolves.
//!
//! Publishing and opening a download both run under the per-name publish
//! lock, so a download streams exactly one upload's content.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use chrono::Utc;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

use super::catalog::{Resolved, StoreCatalog};
use super::merger::{check_complete, ChunkSet, Merger};
use super::naming::{split_filename, ChunkKey};
use super::splitter::{ChunkPlan, Splitter};
use super::staging::{PublishLocks, StagingArea, UploadManifest};
use super::sweep::{self, SweepReport};
use super::{validate_file_name, TransferError};
use crate::config::{Config, TransferConfig, TransferMode};
use crate::progress::ProgressSink;
use crate::storage::{LocalStore, RetryPolicy};

/// One received file
#[derive(Debug, Clone)]
pub struct UploadRequest {
    /// Progress topic; staging uses its own generated id
    pub upload_id: Uuid,
    pub file_name: String,
    pub data: Bytes,
}

impl UploadRequest {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            upload_id: Uuid::new_v4(),
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    pub fn with_upload_id(mut self, upload_id: Uuid) -> Self {
        self.upload_id = upload_id;
        self
    }

    pub fn total_size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub upload_id: Uuid,
    pub file_name: String,
    pub size: u64,
    pub chunks: u64,
    pub mode: TransferMode,
}

/// Upload lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Received,
    Chunking,
    Merging,
    Publishing,
    Done,
    Failed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Received => "received",
            UploadPhase::Chunking => "chunking",
            UploadPhase::Merging => "merging",
            UploadPhase::Publishing => "publishing",
            UploadPhase::Done => "done",
            UploadPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A download ready to be streamed
pub struct Download {
    pub file_name: String,
    pub content_length: Option<u64>,
    pub body: BoxStream<'static, io::Result<Bytes>>,
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("file_name", &self.file_name)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Stored artifact behind a download
enum Artifact {
    File(PathBuf),
    Chunks(ChunkSet),
}

impl From<Resolved> for Artifact {
    fn from(resolved: Resolved) -> Self {
        match resolved {
            Resolved::File { path, .. } => Artifact::File(path),
            Resolved::Chunks(set) => Artifact::Chunks(set),
        }
    }
}

/// A download-once artifact moved out of the public namespace.
///
/// Completing the claim deletes it. Dropping it unsettled puts it back
/// under its name in a background task.
struct DownloadClaim {
    coordinator: TransferCoordinator,
    file_name: String,
    dir: PathBuf,
    artifact: Option<Artifact>,
}

impl DownloadClaim {
    async fn complete(mut self) {
        self.artifact = None;
        match self.coordinator.inner.store.remove_dir_all(&self.dir).await {
            Ok(()) => tracing::info!(file_name = %self.file_name, "Deleted after download"),
            Err(e) => tracing::warn!(
                file_name = %self.file_name,
                error = %e,
                "Failed to delete after download"
            ),
        }
    }
}

impl Drop for DownloadClaim {
    fn drop(&mut self) {
        let Some(artifact) = self.artifact.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                file_name = %self.file_name,
                dir = %self.dir.display(),
                "No runtime to restore download, leaving it in staging"
            );
            return;
        };

        let coordinator = self.coordinator.clone();
        let file_name = std::mem::take(&mut self.file_name);
        let dir = std::mem::take(&mut self.dir);
        runtime.spawn(async move {
            let _guard = coordinator.inner.locks.lock(&file_name).await;
            coordinator.restore_locked(&file_name, &dir, artifact).await;
        });
    }
}

#[derive(Clone)]
pub struct TransferCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    config: TransferConfig,
    storage_dir: PathBuf,
    staging_dir_name: String,
    staging_ttl: Duration,
    store: LocalStore,
    splitter: Splitter,
    merger: Merger,
    staging: StagingArea,
    catalog: StoreCatalog,
    locks: PublishLocks,
    progress: Arc<dyn ProgressSink>,
}

impl TransferCoordinator {
    pub fn new(config: &Config, progress: Arc<dyn ProgressSink>) -> Self {
        let store = LocalStore::new(RetryPolicy::new(
            config.retry.max_attempts,
            config.retry.base_delay,
        ));
        let transfer = config.transfer.clone();

        Self {
            inner: Arc::new(CoordinatorInner {
                splitter: Splitter::new(store.clone(), transfer.chunk_size),
                merger: Merger::new(store.clone()),
                staging: StagingArea::new(config.storage.staging_dir(), store.clone()),
                catalog: StoreCatalog::new(
                    &config.storage.dir,
                    &config.storage.staging_dir_name,
                    transfer.mode,
                    store.clone(),
                ),
                storage_dir: config.storage.dir.clone(),
                staging_dir_name: config.storage.staging_dir_name.clone(),
                staging_ttl: config.sweep.staging_ttl,
                locks: PublishLocks::new(),
                config: transfer,
                store,
                progress,
            }),
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    pub fn mode(&self) -> TransferMode {
        self.inner.config.mode
    }

    pub fn storage_dir(&self) -> &Path {
        &self.inner.storage_dir
    }

    /// Whether the storage and staging directories are in place
    pub async fn is_ready(&self) -> bool {
        self.inner.store.is_dir(&self.inner.storage_dir).await
            && self.inner.store.is_dir(self.inner.staging.root()).await
    }

    /// Create the storage and staging directories
    pub async fn prepare(&self) -> Result<(), TransferError> {
        self.inner.store.create_dir_all(&self.inner.storage_dir).await?;
        self.inner.store.create_dir_all(self.inner.staging.root()).await?;
        Ok(())
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Chunk, optionally merge, and publish one file
    pub async fn upload(&self, request: UploadRequest) -> Result<UploadReceipt, TransferError> {
        let mut phase = UploadPhase::Received;
        let result = self.run_upload(&request, &mut phase).await;

        match &result {
            Ok(receipt) => {
                tracing::info!(
                    upload_id = %receipt.upload_id,
                    file_name = %receipt.file_name,
                    size = receipt.size,
                    chunks = receipt.chunks,
                    mode = ?receipt.mode,
                    "Upload complete"
                );
            }
            Err(e) if e.is_validation() => {
                tracing::warn!(
                    upload_id = %request.upload_id,
                    file_name = %request.file_name,
                    error = %e,
                    "Upload rejected"
                );
            }
            Err(e) => {
                tracing::error!(
                    upload_id = %request.upload_id,
                    file_name = %request.file_name,
                    phase = %phase,
                    error = %e,
                    "Upload failed"
                );
                self.enter(request.upload_id, &mut phase, UploadPhase::Failed);
            }
        }

        result
    }

    async fn run_upload(
        &self,
        request: &UploadRequest,
        phase: &mut UploadPhase,
    ) -> Result<UploadReceipt, TransferError> {
        let inner = &self.inner;
        let upload_id = request.upload_id;
        let staging_id = Uuid::new_v4();

        self.validate(request)?;
        let (base_name, extension) = split_filename(&request.file_name);
        let plan = ChunkPlan::new(request.data.len(), inner.config.chunk_size)?;

        self.enter(upload_id, phase, UploadPhase::Chunking);
        let manifest = UploadManifest {
            staging_id,
            upload_id,
            file_name: request.file_name.clone(),
            total_size: request.total_size(),
            chunk_size: inner.config.chunk_size,
            total_chunks: plan.total_chunks(),
            mode: inner.config.mode,
            created_at: Utc::now(),
        };
        let dir = inner.staging.open(&manifest).await?;
        tracing::debug!(upload_id = %upload_id, staging_id = %staging_id, "Staging opened");
        let keys = inner
            .splitter
            .split(
                upload_id,
                &request.data,
                &dir,
                base_name,
                extension,
                inner.progress.as_ref(),
            )
            .await?;

        match inner.config.mode {
            TransferMode::Merged => {
                self.enter(upload_id, phase, UploadPhase::Merging);
                let merged = dir.join(format!("{staging_id}.merged"));
                inner
                    .merger
                    .merge(&dir, base_name, extension, &merged)
                    .await?;

                self.enter(upload_id, phase, UploadPhase::Publishing);
                let _guard = inner.locks.lock(&request.file_name).await;
                inner
                    .store
                    .rename(&merged, &inner.storage_dir.join(&request.file_name))
                    .await?;
            }
            TransferMode::Chunked => {
                self.enter(upload_id, phase, UploadPhase::Publishing);
                let _guard = inner.locks.lock(&request.file_name).await;
                self.publish_chunks(&dir, base_name, extension, &keys).await?;
            }
        }

        if let Err(e) = inner.staging.discard(staging_id).await {
            tracing::warn!(staging_id = %staging_id, error = %e, "Failed to remove staging directory");
        }
        self.enter(upload_id, phase, UploadPhase::Done);

        Ok(UploadReceipt {
            upload_id,
            file_name: request.file_name.clone(),
            size: request.total_size(),
            chunks: keys.len() as u64,
            mode: inner.config.mode,
        })
    }

    fn validate(&self, request: &UploadRequest) -> Result<(), TransferError> {
        validate_file_name(&request.file_name, &self.inner.staging_dir_name)?;

        let size = request.total_size();
        let max = self.inner.config.max_upload_size;
        if size == 0 {
            return Err(TransferError::EmptyFile);
        }
        if size > max {
            return Err(TransferError::FileTooLarge { size, max });
        }
        Ok(())
    }

    /// Move staged chunks into the public namespace, replacing any
    /// previously published chunk set of the same file.
    ///
    /// If a rename fails partway the whole public set of the file is
    /// withdrawn, since it would otherwise mix two uploads.
    async fn publish_chunks(
        &self,
        staged_dir: &Path,
        base_name: &str,
        extension: &str,
        keys: &[ChunkKey],
    ) -> Result<(), TransferError> {
        let inner = &self.inner;
        let previous = inner
            .merger
            .collect(&inner.storage_dir, base_name, extension)
            .await?;

        for key in keys {
            let name = key.to_string();
            let renamed = inner
                .store
                .rename(&staged_dir.join(&name), &inner.storage_dir.join(&name))
                .await;
            if let Err(e) = renamed {
                self.withdraw_chunks(base_name, extension).await;
                return Err(e.into());
            }
        }

        let published = keys.len() as u64;
        for stale in previous.keys().filter(|k| k.index > published) {
            inner
                .store
                .remove_file(&inner.storage_dir.join(stale.to_string()))
                .await?;
        }

        Ok(())
    }

    async fn withdraw_chunks(&self, base_name: &str, extension: &str) {
        let inner = &self.inner;
        let set = match inner
            .merger
            .collect(&inner.storage_dir, base_name, extension)
            .await
        {
            Ok(set) => set,
            Err(e) => {
                tracing::error!(base_name, error = %e, "Failed to list chunks to withdraw");
                return;
            }
        };

        tracing::warn!(base_name, chunks = set.len(), "Withdrawing partially published chunk set");
        for path in set.paths() {
            if let Err(e) = inner.store.remove_file(&path).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to withdraw chunk");
            }
        }
    }

    /// Rename every chunk of `set` into `dir`. A failed rename moves the
    /// chunks already renamed back where they were.
    async fn move_chunks(&self, set: &ChunkSet, dir: &Path) -> Result<ChunkSet, TransferError> {
        let moved = ChunkSet::new(
            dir,
            set.base_name.clone(),
            set.extension.clone(),
            set.indices().to_vec(),
        );
        let from = set.paths();
        let to = moved.paths();

        for (done, (src, dst)) in from.iter().zip(&to).enumerate() {
            if let Err(e) = self.inner.store.rename(src, dst).await {
                for (src, dst) in from.iter().zip(&to).take(done) {
                    if let Err(e) = self.inner.store.rename(dst, src).await {
                        tracing::warn!(path = %dst.display(), error = %e, "Failed to move chunk back");
                    }
                }
                return Err(e.into());
            }
        }

        Ok(moved)
    }

    fn enter(&self, upload_id: Uuid, phase: &mut UploadPhase, next: UploadPhase) {
        tracing::debug!(upload_id = %upload_id, from = %phase, to = %next, "Upload phase");
        *phase = next;
    }

    // ========================================================================
    // Download / listing
    // ========================================================================

    pub async fn list(&self) -> Result<Vec<String>, TransferError> {
        self.inner.catalog.list().await
    }

    /// Open `file_name` for streaming.
    ///
    /// Every file behind the name is opened before the publish lock is
    /// released, so a concurrent re-upload cannot change what the body
    /// yields. With download-once enabled the artifact is first moved into a
    /// private staging directory. It is deleted once the body has been
    /// streamed to the end without error, and otherwise put back if the name
    /// is still free.
    pub async fn download(&self, file_name: &str) -> Result<Download, TransferError> {
        let inner = &self.inner;
        let guard = inner.locks.lock(file_name).await;
        let artifact = Artifact::from(inner.catalog.resolve(file_name).await?);
        let from_chunks = matches!(artifact, Artifact::Chunks(_));

        let (len, body) = if inner.config.download_once {
            let (dir, claimed) = self.claim(file_name, artifact).await?;
            let (len, body) = match self.open_artifact(&claimed).await {
                Ok(opened) => opened,
                Err(e) => {
                    self.restore_locked(file_name, &dir, claimed).await;
                    return Err(e);
                }
            };
            let claim = DownloadClaim {
                coordinator: self.clone(),
                file_name: file_name.to_string(),
                dir,
                artifact: Some(claimed),
            };
            (len, settle_after(body, claim))
        } else {
            self.open_artifact(&artifact).await?
        };
        drop(guard);

        tracing::info!(
            file_name = %file_name,
            bytes = len,
            from_chunks,
            download_once = inner.config.download_once,
            "Serving download"
        );

        Ok(Download {
            file_name: file_name.to_string(),
            content_length: Some(len),
            body,
        })
    }

    async fn open_artifact(
        &self,
        artifact: &Artifact,
    ) -> Result<(u64, BoxStream<'static, io::Result<Bytes>>), TransferError> {
        match artifact {
            Artifact::File(path) => {
                let file = self.inner.store.open(path).await?;
                let len = file
                    .metadata()
                    .await
                    .map_err(|e| TransferError::io("stat", path, e))?
                    .len();
                Ok((len, ReaderStream::new(file).boxed()))
            }
            Artifact::Chunks(set) => {
                let opened = self.inner.merger.open_chunks(set).await?;
                Ok((opened.total_len(), opened.into_stream().boxed()))
            }
        }
    }

    /// Move the artifact of `file_name` into a fresh staging directory.
    /// Caller holds the publish lock.
    async fn claim(
        &self,
        file_name: &str,
        artifact: Artifact,
    ) -> Result<(PathBuf, Artifact), TransferError> {
        if let Artifact::Chunks(set) = &artifact {
            check_complete(set)?;
        }

        let dir = self.inner.staging.reserve().await?;
        let moved = match &artifact {
            Artifact::File(path) => {
                let private = dir.join(file_name);
                self.inner
                    .store
                    .rename(path, &private)
                    .await
                    .map(|()| Artifact::File(private))
                    .map_err(TransferError::from)
            }
            Artifact::Chunks(set) => self.move_chunks(set, &dir).await.map(Artifact::Chunks),
        };

        match moved {
            Ok(claimed) => Ok((dir, claimed)),
            Err(e) => {
                if let Err(e) = self.inner.store.remove_dir_all(&dir).await {
                    tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove claim directory");
                }
                Err(e)
            }
        }
    }

    /// Put a claimed artifact back under `file_name` unless a newer upload
    /// took the name meanwhile, then drop the claim directory. Caller holds
    /// the publish lock.
    async fn restore_locked(&self, file_name: &str, dir: &Path, artifact: Artifact) {
        let inner = &self.inner;

        match inner.catalog.resolve(file_name).await {
            Err(TransferError::NotFound(_)) => {
                let restored = match &artifact {
                    Artifact::File(path) => inner
                        .store
                        .rename(path, &inner.storage_dir.join(file_name))
                        .await
                        .map_err(TransferError::from),
                    Artifact::Chunks(set) => {
                        self.move_chunks(set, &inner.storage_dir).await.map(drop)
                    }
                };
                if let Err(e) = restored {
                    tracing::warn!(
                        file_name = %file_name,
                        dir = %dir.display(),
                        error = %e,
                        "Failed to restore after failed download"
                    );
                    return;
                }
                tracing::info!(file_name = %file_name, "Restored after failed download");
            }
            Ok(_) => {
                tracing::info!(
                    file_name = %file_name,
                    "Name republished during download, discarding old copy"
                );
            }
            Err(e) => {
                tracing::warn!(file_name = %file_name, error = %e, "Cannot check name for restore");
                return;
            }
        }

        if let Err(e) = inner.store.remove_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %e, "Failed to remove claim directory");
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Reclaim staging residue older than the configured TTL
    pub async fn sweep(&self) -> Result<SweepReport, TransferError> {
        self.sweep_older_than(self.inner.staging_ttl).await
    }

    pub async fn sweep_older_than(&self, ttl: Duration) -> Result<SweepReport, TransferError> {
        let report = sweep::sweep_staging(&self.inner.staging, &self.inner.store, ttl).await?;
        if report.removed > 0 {
            tracing::info!(removed = report.removed, kept = report.kept, "Staging sweep complete");
        }
        Ok(report)
    }

    /// Start the periodic staging sweep; `None` when `interval` is zero
    pub fn start_sweep_task(self, interval: Duration) -> Option<tokio::task::JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; startup already swept
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep().await {
                    tracing::warn!(error = %e, "Staging sweep failed");
                }
            }
        }))
    }
}

/// Append a tail to `body` that settles `claim`: complete after every byte
/// was produced, restore after an error. A body dropped early drops the
/// unpolled tail and with it the claim.
fn settle_after(
    body: BoxStream<'static, io::Result<Bytes>>,
    claim: DownloadClaim,
) -> BoxStream<'static, io::Result<Bytes>> {
    let failed = Arc::new(AtomicBool::new(false));
    let flag = failed.clone();

    let tail = stream::once(async move {
        if failed.load(Ordering::SeqCst) {
            tracing::warn!(file_name = %claim.file_name, "Download failed, restoring stored data");
            drop(claim);
            return;
        }
        claim.complete().await;
    })
    .filter_map(|()| future::ready(None::<io::Result<Bytes>>));

    body.inspect_err(move |_| flag.store(true, Ordering::SeqCst))
        .chain(tail)
        .boxed()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{NoProgress, ProgressBroadcaster, Topic};
    use tempfile::TempDir;

    const MIB: usize = 1024 * 1024;

    fn test_config(dir: &Path, mode: TransferMode, chunk_size: usize) -> Config {
        let mut config = Config::default();
        config.storage.dir = dir.to_path_buf();
        config.transfer.mode = mode;
        config.transfer.chunk_size = chunk_size;
        config.transfer.download_once = mode.default_download_once();
        config.retry.base_delay = Duration::from_millis(1);
        config
    }

    async fn coordinator(config: &Config) -> TransferCoordinator {
        let coordinator = TransferCoordinator::new(config, Arc::new(NoProgress));
        coordinator.prepare().await.unwrap();
        coordinator
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 253) as u8).collect()
    }

    async fn read_download(download: Download) -> io::Result<Vec<u8>> {
        let parts: Vec<Bytes> = download.body.try_collect().await?;
        Ok(parts.concat())
    }

    #[tokio::test]
    async fn test_chunked_upload_publishes_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, MIB);
        let coordinator = coordinator(&config).await;
        let data = pattern(3 * MIB);

        let receipt = coordinator
            .upload(UploadRequest::new("report.pdf", data.clone()))
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 3);
        assert_eq!(receipt.size, 3 * MIB as u64);

        assert_eq!(
            coordinator.list().await.unwrap(),
            vec!["report-chunk-1.pdf", "report-chunk-2.pdf", "report-chunk-3.pdf"]
        );
        for i in 1..=3 {
            let len = tokio::fs::metadata(temp_dir.path().join(format!("report-chunk-{i}.pdf")))
                .await
                .unwrap()
                .len();
            assert_eq!(len, MIB as u64);
        }

        // Merging the published set reproduces the upload and consumes the chunks
        let dest = temp_dir.path().join("report.pdf");
        Merger::default()
            .merge(temp_dir.path(), "report", ".pdf", &dest)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), data);
        assert_eq!(coordinator.list().await.unwrap(), vec!["report.pdf"]);
    }

    #[tokio::test]
    async fn test_merged_upload_publishes_single_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Merged, 1000);
        let coordinator = coordinator(&config).await;
        let data = pattern(4321);

        let receipt = coordinator
            .upload(UploadRequest::new("archive.tar.gz", data.clone()))
            .await
            .unwrap();
        assert_eq!(receipt.chunks, 5);

        assert_eq!(coordinator.list().await.unwrap(), vec!["archive.tar.gz"]);
        assert_eq!(
            tokio::fs::read(temp_dir.path().join("archive.tar.gz")).await.unwrap(),
            data
        );

        // Staging is left empty
        let staged = LocalStore::default()
            .list_names(&config.storage.staging_dir())
            .await
            .unwrap();
        assert!(staged.is_empty());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_100() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 10);
        let broadcaster = ProgressBroadcaster::new();
        let coordinator = TransferCoordinator::new(&config, Arc::new(broadcaster.clone()));
        coordinator.prepare().await.unwrap();

        let request = UploadRequest::new("data.bin", pattern(95));
        let mut sub = broadcaster.subscribe(Topic::Upload(request.upload_id));
        coordinator.upload(request).await.unwrap();

        let mut percents = Vec::new();
        while let Some(event) = sub.try_recv() {
            percents.push(event.percent);
        }
        assert_eq!(percents.len(), 10);
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(percents.last(), Some(&100));
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path(), TransferMode::Chunked, 4);
        config.transfer.max_upload_size = 8;
        let coordinator = coordinator(&config).await;

        let empty = coordinator.upload(UploadRequest::new("a.txt", Vec::<u8>::new())).await;
        assert!(matches!(empty, Err(TransferError::EmptyFile)));

        let too_large = coordinator.upload(UploadRequest::new("a.txt", vec![0u8; 9])).await;
        assert!(matches!(too_large, Err(TransferError::FileTooLarge { size: 9, max: 8 })));

        let bad_name = coordinator.upload(UploadRequest::new("../a.txt", vec![1u8; 4])).await;
        assert!(matches!(bad_name, Err(TransferError::InvalidFileName(_))));

        assert!(coordinator.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reupload_replaces_chunk_set() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 4);
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("notes.txt", pattern(40)))
            .await
            .unwrap();
        coordinator
            .upload(UploadRequest::new("notes.txt", b"short".to_vec()))
            .await
            .unwrap();

        assert_eq!(
            coordinator.list().await.unwrap(),
            vec!["notes-chunk-1.txt", "notes-chunk-2.txt"]
        );
        let body = read_download(coordinator.download("notes.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, b"short");
    }

    #[tokio::test]
    async fn test_concurrent_same_name_uploads_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 3);
        let coordinator = coordinator(&config).await;

        let long = vec![b'a'; 30];
        let short = vec![b'b'; 7];
        let (first, second) = tokio::join!(
            coordinator.upload(UploadRequest::new("same.bin", long.clone())),
            coordinator.upload(UploadRequest::new("same.bin", short.clone())),
        );
        first.unwrap();
        second.unwrap();

        let body = read_download(coordinator.download("same.bin").await.unwrap())
            .await
            .unwrap();
        assert!(body == long || body == short, "chunks from both uploads were mixed");
    }

    #[tokio::test]
    async fn test_chunked_download_streams_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 7);
        let coordinator = coordinator(&config).await;
        let data = pattern(100);

        coordinator
            .upload(UploadRequest::new("data.bin", data.clone()))
            .await
            .unwrap();

        let download = coordinator.download("data.bin").await.unwrap();
        assert_eq!(download.content_length, Some(100));
        assert_eq!(read_download(download).await.unwrap(), data);

        // Download-once is off in chunked mode by default
        assert_eq!(coordinator.list().await.unwrap().len(), 15);
    }

    #[tokio::test]
    async fn test_merged_download_once_deletes_after_full_transfer() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Merged, 16);
        let coordinator = coordinator(&config).await;
        let data = pattern(50);

        coordinator
            .upload(UploadRequest::new("once.bin", data.clone()))
            .await
            .unwrap();

        let download = coordinator.download("once.bin").await.unwrap();
        assert!(!temp_dir.path().join("once.bin").exists());
        assert_eq!(read_download(download).await.unwrap(), data);

        let staged = LocalStore::default()
            .list_names(&config.storage.staging_dir())
            .await
            .unwrap();
        assert!(staged.is_empty());

        assert!(matches!(
            coordinator.download("once.bin").await,
            Err(TransferError::NotFound(_))
        ));
    }

    /// Wait until `check` holds, for up to a second
    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    fn once_config(dir: &Path) -> Config {
        let mut config = test_config(dir, TransferMode::Chunked, 4);
        config.transfer.download_once = true;
        config
    }

    #[tokio::test]
    async fn test_same_upload_id_uploads_stay_isolated() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 1);
        let coordinator = coordinator(&config).await;

        let upload_id = Uuid::new_v4();
        let a = vec![b'a'; 50];
        let b = vec![b'b'; 50];
        let (first, second) = tokio::join!(
            coordinator.upload(UploadRequest::new("a.bin", a.clone()).with_upload_id(upload_id)),
            coordinator.upload(UploadRequest::new("b.bin", b.clone()).with_upload_id(upload_id)),
        );
        assert_eq!(first.unwrap().upload_id, upload_id);
        assert_eq!(second.unwrap().upload_id, upload_id);

        let body = read_download(coordinator.download("a.bin").await.unwrap()).await.unwrap();
        assert_eq!(body, a);
        let body = read_download(coordinator.download("b.bin").await.unwrap()).await.unwrap();
        assert_eq!(body, b);
    }

    #[tokio::test]
    async fn test_download_keeps_snapshot_across_reupload() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 4);
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("abc.txt", b"aaaabbbbcccc".to_vec()))
            .await
            .unwrap();

        let mut download = coordinator.download("abc.txt").await.unwrap();
        let first = download.body.next().await.unwrap().unwrap();
        assert_eq!(first.as_ref(), b"aaaa");

        coordinator
            .upload(UploadRequest::new("abc.txt", b"XXXXYYYYZZZZ".to_vec()))
            .await
            .unwrap();

        let rest = read_download(download).await.unwrap();
        assert_eq!([first.to_vec(), rest].concat(), b"aaaabbbbcccc");

        let fresh = read_download(coordinator.download("abc.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(fresh, b"XXXXYYYYZZZZ");
    }

    #[tokio::test]
    async fn test_download_once_does_not_delete_newer_upload() {
        let temp_dir = TempDir::new().unwrap();
        let config = once_config(temp_dir.path());
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("n.txt", b"OLD-OLD-OLD-".to_vec()))
            .await
            .unwrap();
        let download = coordinator.download("n.txt").await.unwrap();

        // The old copy left the public namespace when the download opened
        assert!(coordinator.list().await.unwrap().is_empty());

        coordinator
            .upload(UploadRequest::new("n.txt", b"NEW-NEW-NEW-".to_vec()))
            .await
            .unwrap();
        assert_eq!(read_download(download).await.unwrap(), b"OLD-OLD-OLD-");

        assert_eq!(
            coordinator.list().await.unwrap(),
            vec!["n-chunk-1.txt", "n-chunk-2.txt", "n-chunk-3.txt"]
        );
        let body = read_download(coordinator.download("n.txt").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, b"NEW-NEW-NEW-");
    }

    #[tokio::test]
    async fn test_download_once_restores_after_abort() {
        let temp_dir = TempDir::new().unwrap();
        let config = once_config(temp_dir.path());
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("frag.bin", pattern(12)))
            .await
            .unwrap();

        let mut download = coordinator.download("frag.bin").await.unwrap();
        download.body.next().await.unwrap().unwrap();
        drop(download);

        // The claim directory goes away once the chunks are back
        let staging = config.storage.staging_dir();
        eventually(|| std::fs::read_dir(&staging).unwrap().next().is_none()).await;
        assert_eq!(coordinator.list().await.unwrap().len(), 3);

        let body = read_download(coordinator.download("frag.bin").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, pattern(12));
    }

    #[tokio::test]
    async fn test_aborted_download_once_yields_to_newer_upload() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path(), TransferMode::Merged, 4);
        config.transfer.download_once = true;
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("doc.txt", b"first".to_vec()))
            .await
            .unwrap();
        let download = coordinator.download("doc.txt").await.unwrap();
        coordinator
            .upload(UploadRequest::new("doc.txt", b"second".to_vec()))
            .await
            .unwrap();
        drop(download);

        let staging = config.storage.staging_dir();
        eventually(|| std::fs::read_dir(&staging).unwrap().next().is_none()).await;

        assert_eq!(
            tokio::fs::read(temp_dir.path().join("doc.txt")).await.unwrap(),
            b"second"
        );
    }

    #[tokio::test]
    async fn test_download_once_incomplete_set_is_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let config = once_config(temp_dir.path());
        let coordinator = coordinator(&config).await;

        coordinator
            .upload(UploadRequest::new("gap.bin", pattern(12)))
            .await
            .unwrap();
        tokio::fs::remove_file(temp_dir.path().join("gap-chunk-2.bin"))
            .await
            .unwrap();

        assert!(matches!(
            coordinator.download("gap.bin").await,
            Err(TransferError::MissingChunk { index: 2, .. })
        ));
        assert!(temp_dir.path().join("gap-chunk-1.bin").exists());
        assert!(temp_dir.path().join("gap-chunk-3.bin").exists());
    }

    #[tokio::test]
    async fn test_failed_chunk_publish_withdraws_partial_set() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = test_config(temp_dir.path(), TransferMode::Chunked, 4);
        config.retry.max_attempts = 1;
        let coordinator = coordinator(&config).await;

        // A non-empty directory where chunk 2 should land makes its rename fail
        let blocker = temp_dir.path().join("x-chunk-2.bin");
        tokio::fs::create_dir_all(blocker.join("inner")).await.unwrap();

        let result = coordinator.upload(UploadRequest::new("x.bin", pattern(12))).await;
        assert!(result.is_err());
        assert!(!temp_dir.path().join("x-chunk-1.bin").exists());
        assert!(!temp_dir.path().join("x-chunk-3.bin").exists());
    }

    #[tokio::test]
    async fn test_download_missing_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Chunked, 4);
        let coordinator = coordinator(&config).await;

        let result = coordinator.download("missing.txt").await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_startup_sweep_reclaims_crash_residue() {
        let temp_dir = TempDir::new().unwrap();
        let config = test_config(temp_dir.path(), TransferMode::Merged, 4);
        let coordinator = coordinator(&config).await;

        let residue = config.storage.staging_dir().join(Uuid::new_v4().to_string());
        tokio::fs::create_dir_all(&residue).await.unwrap();
        tokio::fs::write(residue.join("x-chunk-1.bin"), b"half").await.unwrap();

        // Fresh residue survives the TTL-based sweep
        assert_eq!(coordinator.sweep().await.unwrap().removed, 0);
        assert_eq!(coordinator.sweep_older_than(Duration::ZERO).await.unwrap().removed, 1);
        assert!(!residue.exists());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(UploadPhase::Chunking.to_string(), "chunking");
        assert_eq!(UploadPhase::Failed.to_string(), "failed");
    }
}
