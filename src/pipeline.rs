//! RCA orchestrator.
//!
//! [`RcaGenerator::generate`] is the single operation exposed by the core:
//!
//! ```text
//! extract documents ─┐
//! (deep mode only)   ├─► stage artifacts ─► sign images ─► build prompt
//!                    │   (if the invoker needs them)
//!                    └─► invoke (bounded by timeout) ─► release artifacts ─► validate
//! ```
//!
//! Per-file extraction, staging and signing failures are absorbed into the
//! per-file results. Only the invocation, its timeout, and validation can
//! fail the request. Artifacts are released after the invocation resolves on
//! every path, and by the [`StagedArtifacts`] guard if the request is
//! cancelled.
//!
//! All collaborators are injected, so every request is isolated and tests can
//! substitute doubles for storage, the reasoner and the staging service.

use futures_util::future::{BoxFuture, FutureExt};
use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::artifacts::{ArtifactManager, StagedArtifacts};
use crate::config::Config;
use crate::error::GenerationError;
use crate::extract;
use crate::models::{
    AnalysisMode, AnalysisRequest, ExtractedContent, ImageReference, PromptBundle, RcaReport,
    SourceFile,
};
use crate::prompt;
use crate::reasoning::{self, FileStaging, ReasoningInvoker};
use crate::storage::{self, ObjectStore};
use crate::validate;

const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(300);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Composes extraction, prompt synthesis, invocation, validation and
/// cleanup. Cheap to share behind an `Arc`; holds no per-request state.
pub struct RcaGenerator {
    store: Arc<dyn ObjectStore>,
    invoker: Arc<dyn ReasoningInvoker>,
    staging: Option<Arc<dyn FileStaging>>,
    max_concurrency: usize,
    signed_url_ttl: Duration,
    timeout: Duration,
}

impl RcaGenerator {
    pub fn new(store: Arc<dyn ObjectStore>, invoker: Arc<dyn ReasoningInvoker>) -> Self {
        Self {
            store,
            invoker,
            staging: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            signed_url_ttl: DEFAULT_SIGNED_URL_TTL,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Build the storage backend, invoker and staging service from config.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = storage::create_store(&config.storage)?;
        Self::from_config_with_store(config, store)
    }

    /// Like [`from_config`](Self::from_config), reading from `store` instead
    /// of the configured storage backend.
    pub fn from_config_with_store(
        config: &Config,
        store: Arc<dyn ObjectStore>,
    ) -> anyhow::Result<Self> {
        let (invoker, staging) = reasoning::create_invoker(&config.reasoning)?;
        let mut generator = Self::new(store, invoker)
            .with_max_concurrency(config.pipeline.max_concurrency)
            .with_signed_url_ttl(Duration::from_secs(config.storage.signed_url_ttl_secs))
            .with_timeout(config.reasoning.timeout());
        if let Some(staging) = staging {
            generator = generator.with_staging(staging);
        }
        Ok(generator)
    }

    pub fn with_staging(mut self, staging: Arc<dyn FileStaging>) -> Self {
        self.staging = Some(staging);
        self
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n.max(1);
        self
    }

    pub fn with_signed_url_ttl(mut self, ttl: Duration) -> Self {
        self.signed_url_ttl = ttl;
        self
    }

    /// Upper bound on the reasoning call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn invoker_name(&self) -> &str {
        self.invoker.name()
    }

    /// Run one analysis end to end.
    ///
    /// # Errors
    ///
    /// [`GenerationError::Invocation`] if the reasoning call fails,
    /// [`GenerationError::Timeout`] if it exceeds the configured bound, and
    /// [`GenerationError::Schema`] if its output is not a valid report.
    pub async fn generate(&self, request: AnalysisRequest) -> Result<RcaReport, GenerationError> {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "generate",
            request_id = %request_id,
            mode = ?request.mode,
            strategy = self.invoker.name()
        );
        self.run(request).instrument(span).await
    }

    async fn run(&self, request: AnalysisRequest) -> Result<RcaReport, GenerationError> {
        tracing::info!(
            documents = request.documents.len(),
            images = request.images.len(),
            "analysis started"
        );

        let store = self.store.as_ref();
        let documents =
            extract_documents(store, &request.documents, request.mode, self.max_concurrency).await;
        let staged = self.stage_documents(&request.documents, request.mode).await;
        let images =
            sign_images(store, &request.images, self.signed_url_ttl, self.max_concurrency).await;
        let bundle = prompt::build(&request.description, &documents, &images, request.mode);

        let handles = staged.as_ref().map(|s| s.handles().to_vec()).unwrap_or_default();
        let outcome = tokio::time::timeout(self.timeout, self.invoker.invoke(bundle, &handles)).await;

        if let Some(staged) = staged {
            staged.release().await;
        }

        let raw = match outcome {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "reasoning invocation failed");
                return Err(e.into());
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "reasoning invocation timed out");
                return Err(GenerationError::Timeout(self.timeout));
            }
        };

        let report = validate::validate(&raw).map_err(|e| {
            tracing::warn!(error = %e, "reasoner output rejected");
            tracing::debug!(raw = %raw, "rejected reasoner output");
            GenerationError::from(e)
        })?;

        tracing::info!(root_causes = report.root_causes.len(), "analysis complete");
        Ok(report)
    }

    async fn stage_documents(
        &self,
        documents: &[SourceFile],
        mode: AnalysisMode,
    ) -> Option<StagedArtifacts> {
        if mode != AnalysisMode::Deep || !self.invoker.requires_staging() || documents.is_empty() {
            return None;
        }
        let Some(staging) = &self.staging else {
            tracing::warn!(
                strategy = self.invoker.name(),
                "no staging service configured, documents are not staged"
            );
            return None;
        };
        let manager = ArtifactManager::new(self.store.clone(), staging.clone(), self.max_concurrency);
        Some(manager.stage(documents).await)
    }
}

/// Assemble the prompt a request would send, without staging or invoking
/// the reasoner.
pub async fn prepare_prompt(
    store: &dyn ObjectStore,
    request: &AnalysisRequest,
    max_concurrency: usize,
    signed_url_ttl: Duration,
) -> PromptBundle {
    let n = max_concurrency.max(1);
    let documents = extract_documents(store, &request.documents, request.mode, n).await;
    let images = sign_images(store, &request.images, signed_url_ttl, n).await;
    prompt::build(&request.description, &documents, &images, request.mode)
}

/// Deep mode fetches and extracts every document concurrently, keeping
/// upload order. Quick mode touches no storage.
async fn extract_documents(
    store: &dyn ObjectStore,
    documents: &[SourceFile],
    mode: AnalysisMode,
    max_concurrency: usize,
) -> Vec<ExtractedContent> {
    match mode {
        AnalysisMode::Quick => documents
            .iter()
            .map(|d| ExtractedContent::name_only(&d.name))
            .collect(),
        AnalysisMode::Deep => {
            let jobs: Vec<BoxFuture<'_, ExtractedContent>> = documents
                .iter()
                .map(|doc| extract::extract(store, doc).boxed())
                .collect();
            stream::iter(jobs).buffered(max_concurrency).collect().await
        }
    }
}

async fn sign_images(
    store: &dyn ObjectStore,
    images: &[SourceFile],
    ttl: Duration,
    max_concurrency: usize,
) -> Vec<ImageReference> {
    let jobs: Vec<BoxFuture<'_, ImageReference>> = images
        .iter()
        .map(|image| sign_image(store, image, ttl).boxed())
        .collect();
    stream::iter(jobs).buffered(max_concurrency).collect().await
}

async fn sign_image(store: &dyn ObjectStore, image: &SourceFile, ttl: Duration) -> ImageReference {
    if !image.has_location() {
        tracing::warn!(image = %image.name, "image has no storage reference");
        return ImageReference {
            source_name: image.name.clone(),
            access_url: None,
            error: Some("no storage reference".to_string()),
        };
    }
    match store.sign_url(&image.location_ref, ttl).await {
        Ok(url) => ImageReference {
            source_name: image.name.clone(),
            access_url: Some(url),
            error: None,
        },
        Err(e) => {
            tracing::warn!(image = %image.name, error = %e, "image signing failed");
            ImageReference {
                source_name: image.name.clone(),
                access_url: None,
                error: Some(e.to_string()),
            }
        }
    }
}
