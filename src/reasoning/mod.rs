//! Reasoning service abstraction and generation strategies.
//!
//! Defines the [`ReasoningInvoker`] trait, the single seam through which the
//! pipeline talks to the LLM, and the [`FileStaging`] trait for documents
//! uploaded to the service. Three interchangeable invokers are provided:
//!
//! - **[`ChatInvoker`]** with images attached: one multimodal chat
//!   completion (`strategy = "inline"`).
//! - **[`ChatInvoker`]** without attachments: image locators only appear in
//!   the user text (`strategy = "url_only"`).
//! - **[`AssistantInvoker`]**: an assistant thread run that reads staged
//!   documents directly and is polled to completion (`strategy = "assistant"`).
//!
//! Use [`create_invoker`] to build the configured one. Every invoker issues a
//! single request and returns the raw text untouched; failures are never
//! retried.

pub mod openai;
pub mod poll;

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ReasoningConfig, Strategy};
use crate::error::{InvocationError, StagingError};
use crate::models::{PromptBundle, RemoteArtifactHandle};

pub use openai::OpenAiClient;
pub use poll::{poll_until_terminal, PollPolicy, RunState};

/// Issues the one reasoning call of a request.
#[async_trait]
pub trait ReasoningInvoker: Send + Sync {
    /// Strategy identifier (e.g. `"inline"`).
    fn name(&self) -> &str;

    /// Whether documents must be staged with a [`FileStaging`] service
    /// before [`invoke`](ReasoningInvoker::invoke).
    fn requires_staging(&self) -> bool {
        false
    }

    /// Send the prompt (and references to staged documents) and return the
    /// reasoner's raw text.
    async fn invoke(
        &self,
        bundle: PromptBundle,
        artifacts: &[RemoteArtifactHandle],
    ) -> Result<String, InvocationError>;
}

/// Upload and delete documents on the reasoning service.
#[async_trait]
pub trait FileStaging: Send + Sync {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<RemoteArtifactHandle, StagingError>;

    async fn delete(&self, handle: &RemoteArtifactHandle) -> Result<(), StagingError>;
}

/// Build the invoker (and, for the assistant strategy, the staging service)
/// selected in configuration.
pub fn create_invoker(
    config: &ReasoningConfig,
) -> Result<(Arc<dyn ReasoningInvoker>, Option<Arc<dyn FileStaging>>), InvocationError> {
    let client = Arc::new(OpenAiClient::from_env(config)?);
    match config.strategy {
        Strategy::Inline => Ok((Arc::new(ChatInvoker::new(client, config, true)), None)),
        Strategy::UrlOnly => Ok((Arc::new(ChatInvoker::new(client, config, false)), None)),
        Strategy::Assistant => {
            let assistant_id = config.assistant_id.clone().ok_or_else(|| {
                InvocationError::Credentials("reasoning.assistant_id not configured".into())
            })?;
            let invoker = AssistantInvoker::new(client.clone(), assistant_id, config);
            Ok((Arc::new(invoker), Some(client)))
        }
    }
}

// ============ Chat ============

/// Single chat completion with JSON output mode.
pub struct ChatInvoker {
    client: Arc<OpenAiClient>,
    model: String,
    temperature: f32,
    attach_images: bool,
}

impl ChatInvoker {
    pub fn new(client: Arc<OpenAiClient>, config: &ReasoningConfig, attach_images: bool) -> Self {
        Self {
            client,
            model: config.model.clone(),
            temperature: config.temperature,
            attach_images,
        }
    }
}

#[async_trait]
impl ReasoningInvoker for ChatInvoker {
    fn name(&self) -> &str {
        if self.attach_images {
            "inline"
        } else {
            "url_only"
        }
    }

    async fn invoke(
        &self,
        bundle: PromptBundle,
        artifacts: &[RemoteArtifactHandle],
    ) -> Result<String, InvocationError> {
        if !artifacts.is_empty() {
            tracing::debug!(count = artifacts.len(), "chat strategy ignores staged artifacts");
        }
        let body = chat_request_body(&bundle, &self.model, self.temperature, self.attach_images);
        self.client.chat_completion(&body).await
    }
}

/// User message content: plain text, or text followed by an `image_url`
/// part for every locator that `attach` accepts.
fn user_content(bundle: &PromptBundle, attach: impl Fn(&str) -> bool) -> Value {
    let images: Vec<Value> = bundle
        .image_attachments
        .iter()
        .filter_map(|img| img.access_url.as_deref())
        .filter(|url| attach(url))
        .map(|url| json!({ "type": "image_url", "image_url": { "url": url } }))
        .collect();
    if images.is_empty() {
        return Value::String(bundle.user_content.clone());
    }
    let mut parts = vec![json!({ "type": "text", "text": bundle.user_content })];
    parts.extend(images);
    Value::Array(parts)
}

pub(crate) fn chat_request_body(
    bundle: &PromptBundle,
    model: &str,
    temperature: f32,
    attach_images: bool,
) -> Value {
    let content = user_content(bundle, |_| attach_images);
    json!({
        "model": model,
        "temperature": temperature,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": bundle.system_instructions },
            { "role": "user", "content": content },
        ],
    })
}

// ============ Assistant ============

/// Assistant thread run over staged documents, polled to completion.
pub struct AssistantInvoker {
    client: Arc<OpenAiClient>,
    assistant_id: String,
    model: String,
    temperature: f32,
    poll: PollPolicy,
}

impl AssistantInvoker {
    pub fn new(client: Arc<OpenAiClient>, assistant_id: String, config: &ReasoningConfig) -> Self {
        Self {
            client,
            assistant_id,
            model: config.model.clone(),
            temperature: config.temperature,
            poll: PollPolicy {
                interval: Duration::from_millis(config.poll_interval_ms),
                max_interval: Duration::from_millis(config.max_poll_interval_ms),
                max_wait: config.timeout(),
            },
        }
    }
}

#[async_trait]
impl ReasoningInvoker for AssistantInvoker {
    fn name(&self) -> &str {
        "assistant"
    }

    fn requires_staging(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        bundle: PromptBundle,
        artifacts: &[RemoteArtifactHandle],
    ) -> Result<String, InvocationError> {
        let body = assistant_run_body(
            &bundle,
            artifacts,
            &self.assistant_id,
            &self.model,
            self.temperature,
        );
        let (thread_id, run_id) = self.client.create_thread_and_run(&body).await?;
        tracing::info!(thread = %thread_id, run = %run_id, "assistant run created");

        let client = self.client.as_ref();
        let (thread, run) = (thread_id.as_str(), run_id.as_str());
        let state = poll_until_terminal(&self.poll, || client.get_run(thread, run)).await?;

        let label = state.label().to_string();
        match state {
            RunState::Completed => self.client.latest_assistant_message(&thread_id).await,
            RunState::Failed(message) | RunState::Incomplete(message) => {
                Err(InvocationError::RunFailed { state: label, message })
            }
            _ => Err(InvocationError::RunFailed {
                state: label,
                message: format!("run {} did not complete", run_id),
            }),
        }
    }
}

/// Thread messages only accept remote image URLs, so inline `data:` images
/// are left out; the prompt text still names them.
pub(crate) fn assistant_run_body(
    bundle: &PromptBundle,
    artifacts: &[RemoteArtifactHandle],
    assistant_id: &str,
    model: &str,
    temperature: f32,
) -> Value {
    let attachments: Vec<Value> = artifacts
        .iter()
        .map(|a| json!({ "file_id": a.id, "tools": [{ "type": "file_search" }] }))
        .collect();
    let content = user_content(bundle, |url| !url.starts_with("data:"));

    json!({
        "assistant_id": assistant_id,
        "model": model,
        "temperature": temperature,
        "instructions": bundle.system_instructions,
        "response_format": { "type": "json_object" },
        "thread": {
            "messages": [{
                "role": "user",
                "content": content,
                "attachments": attachments,
            }]
        }
    })
}
