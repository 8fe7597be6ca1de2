//! Remote artifact manager.
//!
//! Documents that the reasoning service reads directly are uploaded before
//! the call and must be deleted afterwards whatever the outcome. Staged
//! handles live in a [`StagedArtifacts`] guard:
//!
//! - [`StagedArtifacts::release`] deletes every handle exactly once and logs
//!   each failed deletion as a cleanup warning.
//! - If the guard is dropped without being released (the request future was
//!   cancelled, or a panic unwound through it), the deletions are spawned on
//!   the current tokio runtime.
//!
//! Staging is per-file and non-fatal: a document without a storage reference
//! or one that fails to fetch or upload is skipped with a warning.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;

use crate::error::StagingError;
use crate::models::{RemoteArtifactHandle, SourceFile};
use crate::reasoning::FileStaging;
use crate::storage::ObjectStore;

pub struct ArtifactManager {
    store: Arc<dyn ObjectStore>,
    staging: Arc<dyn FileStaging>,
    max_concurrency: usize,
}

impl ArtifactManager {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        staging: Arc<dyn FileStaging>,
        max_concurrency: usize,
    ) -> Self {
        Self {
            store,
            staging,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Upload each document to the reasoning service.
    ///
    /// Handles are collected into the guard as they complete, so artifacts
    /// uploaded before a cancellation are still cleaned up.
    pub async fn stage(&self, documents: &[SourceFile]) -> StagedArtifacts {
        let mut staged = StagedArtifacts::new(self.staging.clone());

        let jobs: Vec<BoxFuture<'_, (&SourceFile, Result<RemoteArtifactHandle, StagingError>)>> =
            documents
                .iter()
                .map(|doc| async move { (doc, self.stage_one(doc).await) }.boxed())
                .collect();
        let mut uploads = stream::iter(jobs).buffer_unordered(self.max_concurrency);

        while let Some((doc, result)) = uploads.next().await {
            match result {
                Ok(handle) => {
                    tracing::debug!(document = %doc.name, artifact = %handle.id, "document staged");
                    staged.handles.push(handle);
                }
                Err(e) => {
                    tracing::warn!(document = %doc.name, error = %e, "staging skipped");
                }
            }
        }

        tracing::info!(
            staged = staged.handles.len(),
            requested = documents.len(),
            "remote artifacts staged"
        );
        staged
    }

    async fn stage_one(&self, doc: &SourceFile) -> Result<RemoteArtifactHandle, StagingError> {
        if !doc.has_location() {
            return Err(StagingError::MissingLocation(doc.name.clone()));
        }
        let bytes = self.store.get_object(&doc.location_ref).await?;
        self.staging.upload(bytes, &doc.name).await
    }
}

/// Handles staged for one request. Deleted on [`release`](Self::release) or
/// on drop.
pub struct StagedArtifacts {
    staging: Arc<dyn FileStaging>,
    handles: Vec<RemoteArtifactHandle>,
}

impl StagedArtifacts {
    fn new(staging: Arc<dyn FileStaging>) -> Self {
        Self {
            staging,
            handles: Vec::new(),
        }
    }

    pub fn handles(&self) -> &[RemoteArtifactHandle] {
        &self.handles
    }

    /// Delete every staged handle. Returns the number of failed deletions.
    pub async fn release(mut self) -> usize {
        let handles = std::mem::take(&mut self.handles);
        delete_all(self.staging.clone(), handles).await
    }
}

impl Drop for StagedArtifacts {
    fn drop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        let handles = std::mem::take(&mut self.handles);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(count = handles.len(), "artifacts dropped unreleased, cleaning up in background");
                runtime.spawn(delete_all(self.staging.clone(), handles));
            }
            Err(_) => {
                for handle in &handles {
                    tracing::warn!(artifact = %handle.id, "no runtime available, remote artifact leaked");
                }
            }
        }
    }
}

async fn delete_all(staging: Arc<dyn FileStaging>, handles: Vec<RemoteArtifactHandle>) -> usize {
    let mut failed = 0;
    for handle in &handles {
        if let Err(e) = staging.delete(handle).await {
            tracing::warn!(
                artifact = %handle.id,
                document = %handle.original_name,
                error = %e,
                "cleanup warning: remote artifact not deleted"
            );
            failed += 1;
        }
    }
    if !handles.is_empty() {
        tracing::info!(released = handles.len() - failed, failed, "remote artifacts released");
    }
    failed
}
