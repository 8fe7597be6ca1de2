//! OpenAI HTTP client.
//!
//! Covers the calls the invokers and the artifact manager need: chat
//! completions, file upload/delete, and assistant thread runs. Requires the
//! `OPENAI_API_KEY` environment variable.
//!
//! No call is retried; the first failure is returned to the caller.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use super::poll::RunState;
use super::FileStaging;
use crate::config::ReasoningConfig;
use crate::error::{InvocationError, StagingError};
use crate::models::RemoteArtifactHandle;

/// Header required by the assistants endpoints.
const ASSISTANTS_BETA: (&str, &str) = ("OpenAI-Beta", "assistants=v2");

pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, InvocationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InvocationError::Request(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    /// Build a client from configuration and `OPENAI_API_KEY`.
    pub fn from_env(config: &ReasoningConfig) -> Result<Self, InvocationError> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            InvocationError::Credentials("OPENAI_API_KEY environment variable not set".into())
        })?;
        Self::new(&config.base_url, &api_key, config.timeout())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        assistants: bool,
    ) -> Result<Value, InvocationError> {
        let mut request = request.header("Authorization", format!("Bearer {}", self.api_key));
        if assistants {
            request = request.header(ASSISTANTS_BETA.0, ASSISTANTS_BETA.1);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InvocationError::Request(format!("request timed out: {}", e))
            } else {
                InvocationError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InvocationError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| InvocationError::MalformedResponse(e.to_string()))
    }

    /// `POST /chat/completions`, returning the first choice's content verbatim.
    pub async fn chat_completion(&self, body: &Value) -> Result<String, InvocationError> {
        let request = self.client.post(self.url("chat/completions")).json(body);
        let json = self.send(request, false).await?;
        parse_chat_content(&json)
    }

    /// `POST /files` with purpose `assistants`. Returns the file id.
    pub async fn upload_file(&self, bytes: Vec<u8>, filename: &str) -> Result<String, InvocationError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .text("purpose", "assistants")
            .part("file", part);
        let request = self.client.post(self.url("files")).multipart(form);
        let json = self.send(request, false).await?;
        json.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| InvocationError::MalformedResponse("file upload response has no id".into()))
    }

    /// `DELETE /files/{id}`.
    pub async fn delete_file(&self, file_id: &str) -> Result<(), InvocationError> {
        let request = self.client.delete(self.url(&format!("files/{}", file_id)));
        let json = self.send(request, false).await?;
        match json.get("deleted").and_then(|v| v.as_bool()) {
            Some(false) => Err(InvocationError::MalformedResponse(format!(
                "file {} was not deleted",
                file_id
            ))),
            _ => Ok(()),
        }
    }

    /// `POST /threads/runs`. Returns `(thread_id, run_id)`.
    pub async fn create_thread_and_run(&self, body: &Value) -> Result<(String, String), InvocationError> {
        let request = self.client.post(self.url("threads/runs")).json(body);
        let json = self.send(request, true).await?;
        let (thread_id, run_id, _) = parse_run(&json)?;
        Ok((thread_id, run_id))
    }

    /// `GET /threads/{thread_id}/runs/{run_id}`.
    pub async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<RunState, InvocationError> {
        let request = self
            .client
            .get(self.url(&format!("threads/{}/runs/{}", thread_id, run_id)));
        let json = self.send(request, true).await?;
        let (_, _, state) = parse_run(&json)?;
        Ok(state)
    }

    /// Text of the newest assistant message on a thread.
    pub async fn latest_assistant_message(&self, thread_id: &str) -> Result<String, InvocationError> {
        let request = self
            .client
            .get(self.url(&format!("threads/{}/messages?order=desc&limit=10", thread_id)));
        let json = self.send(request, true).await?;
        parse_latest_assistant_message(&json)
    }
}

#[async_trait]
impl FileStaging for OpenAiClient {
    async fn upload(&self, bytes: Vec<u8>, filename: &str) -> Result<RemoteArtifactHandle, StagingError> {
        let id = self
            .upload_file(bytes, filename)
            .await
            .map_err(|e| StagingError::Upload(e.to_string()))?;
        Ok(RemoteArtifactHandle {
            id,
            original_name: filename.to_string(),
        })
    }

    async fn delete(&self, handle: &RemoteArtifactHandle) -> Result<(), StagingError> {
        self.delete_file(&handle.id)
            .await
            .map_err(|e| StagingError::Delete(e.to_string()))
    }
}

// ============ Response parsing ============

/// Extract `choices[0].message.content` from a chat completion.
pub(crate) fn parse_chat_content(json: &Value) -> Result<String, InvocationError> {
    let choice = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| InvocationError::MalformedResponse("missing choices array".into()))?;

    if let Some(refusal) = choice
        .pointer("/message/refusal")
        .and_then(|r| r.as_str())
    {
        return Err(InvocationError::RunFailed {
            state: "refused".into(),
            message: refusal.to_string(),
        });
    }

    choice
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| InvocationError::MalformedResponse("missing message content".into()))
}

/// Extract `(thread_id, run_id, state)` from a run object.
pub(crate) fn parse_run(json: &Value) -> Result<(String, String, RunState), InvocationError> {
    let field = |name: &str| {
        json.get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| InvocationError::MalformedResponse(format!("run object has no {}", name)))
    };
    let run_id = field("id")?;
    let thread_id = field("thread_id")?;
    let status = field("status")?;
    let message = json
        .pointer("/last_error/message")
        .and_then(|m| m.as_str())
        .or_else(|| json.pointer("/incomplete_details/reason").and_then(|m| m.as_str()));
    Ok((thread_id, run_id, RunState::parse(&status, message)))
}

/// Concatenate the text parts of the first assistant message in a
/// newest-first message list.
pub(crate) fn parse_latest_assistant_message(json: &Value) -> Result<String, InvocationError> {
    let messages = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| InvocationError::MalformedResponse("missing messages data array".into()))?;

    let message = messages
        .iter()
        .find(|m| m.get("role").and_then(|r| r.as_str()) == Some("assistant"))
        .ok_or_else(|| InvocationError::MalformedResponse("thread has no assistant message".into()))?;

    let parts: Vec<&str> = message
        .get("content")
        .and_then(|c| c.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|p| p.pointer("/text/value").and_then(|v| v.as_str()))
                .collect()
        })
        .unwrap_or_default();

    if parts.is_empty() {
        return Err(InvocationError::MalformedResponse(
            "assistant message has no text content".into(),
        ));
    }
    Ok(parts.join("\n"))
}
