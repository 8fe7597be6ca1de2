//! HTTP server.
//!
//! Thin JSON surface over [`RcaGenerator`] and the email sink.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/analyze` | Run one analysis, returns the report |
//! | `POST` | `/send-email` | Email a rendered report to one or more recipients |
//! | `GET`  | `/health` | Health check (returns version and strategy) |
//!
//! # Response Contract
//!
//! ```json
//! { "success": true, "data": { "rootCauses": [...], ... } }
//! { "success": false, "error": { "code": "schema_error", "message": "..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `invocation_error` (502),
//! `schema_error` (502), `timeout` (504), `email_disabled` (503),
//! `email_error` (502).
//!
//! Uploads are already in object storage; requests carry their storage keys.
//! At most [`MAX_FILES_PER_KIND`] documents and images are accepted, each
//! declared no larger than [`MAX_FILE_BYTES`].
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted for browser front ends.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::email::{self, Mailer, SendGridMailer};
use crate::error::GenerationError;
use crate::models::{AnalysisMode, AnalysisRequest, RcaReport, SourceFile};
use crate::pipeline::RcaGenerator;

pub const MAX_FILES_PER_KIND: usize = 5;
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<RcaGenerator>,
    /// `None` when email delivery is not configured.
    pub mailer: Option<Arc<dyn Mailer>>,
    pub default_mode: AnalysisMode,
}

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let generator = Arc::new(RcaGenerator::from_config(config)?);

    let mailer: Option<Arc<dyn Mailer>> = match SendGridMailer::from_env(&config.email) {
        Ok(m) => Some(Arc::new(m)),
        Err(e) => {
            tracing::warn!(error = %e, "email delivery disabled");
            None
        }
    };

    let state = AppState {
        generator,
        mailer,
        default_mode: config.pipeline.default_mode,
    };

    let bind_addr = config.server.bind.clone();
    tracing::info!(
        bind = %bind_addr,
        strategy = state.generator.invoker_name(),
        "RCA server listening"
    );

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, router(state)).await?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/analyze", post(handle_analyze))
        .route("/send-email", post(handle_send_email))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Responses ============

#[derive(Debug, Serialize)]
struct SuccessBody<T: Serialize> {
    success: bool,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<SuccessBody<T>> {
    Json(SuccessBody {
        success: true,
        data,
    })
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        let status = match err {
            GenerationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GenerationError::Invocation(_) | GenerationError::Schema(_) => StatusCode::BAD_GATEWAY,
        };
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

// ============ POST /analyze ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeBody {
    #[serde(default)]
    description: String,
    #[serde(default)]
    documents: Vec<SourceFile>,
    #[serde(default)]
    images: Vec<SourceFile>,
    #[serde(default)]
    mode: Option<AnalysisMode>,
}

fn check_upload_bounds(kind: &str, files: &[SourceFile]) -> Result<(), AppError> {
    if files.len() > MAX_FILES_PER_KIND {
        return Err(bad_request(format!(
            "at most {} {} per request, got {}",
            MAX_FILES_PER_KIND,
            kind,
            files.len()
        )));
    }
    if let Some(file) = files.iter().find(|f| f.size_bytes > MAX_FILE_BYTES) {
        return Err(bad_request(format!(
            "{} exceeds the {} byte limit",
            file.name, MAX_FILE_BYTES
        )));
    }
    Ok(())
}

async fn handle_analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<SuccessBody<RcaReport>>, AppError> {
    check_upload_bounds("documents", &body.documents)?;
    check_upload_bounds("images", &body.images)?;

    let request = AnalysisRequest {
        description: body.description,
        documents: body.documents,
        images: body.images,
        mode: body.mode.unwrap_or(state.default_mode),
    };

    let report = state.generator.generate(request).await?;
    Ok(success(report))
}

// ============ POST /send-email ============

#[derive(Deserialize)]
#[serde(untagged)]
enum Recipients {
    One(String),
    Many(Vec<String>),
}

/// The report, either as an object or as its JSON serialization.
#[derive(Deserialize)]
#[serde(untagged)]
enum ReportPayload {
    Report(RcaReport),
    Serialized(String),
}

#[derive(Deserialize)]
struct SendEmailBody {
    email: Option<Recipients>,
    data: Option<ReportPayload>,
}

#[derive(Debug, Serialize)]
struct SendEmailResponse {
    recipients: usize,
}

async fn handle_send_email(
    State(state): State<AppState>,
    Json(body): Json<SendEmailBody>,
) -> Result<Json<SuccessBody<SendEmailResponse>>, AppError> {
    let (Some(to), Some(data)) = (body.email, body.data) else {
        return Err(bad_request("email and data required"));
    };

    let recipients = match to {
        Recipients::One(s) => email::normalize_recipients(&[s]),
        Recipients::Many(v) => email::normalize_recipients(&v),
    };
    if recipients.is_empty() {
        return Err(bad_request("no valid recipients"));
    }

    let report = match data {
        ReportPayload::Report(r) => r,
        ReportPayload::Serialized(s) => serde_json::from_str::<RcaReport>(&s)
            .map_err(|e| bad_request(format!("data is not a valid report: {}", e)))?,
    };

    let Some(mailer) = state.mailer.as_ref() else {
        return Err(AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "email_disabled".to_string(),
            message: "email delivery is not configured".to_string(),
        });
    };

    let html = email::render(&report);
    mailer
        .send(&recipients, email::REPORT_SUBJECT, &html)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "email send failed");
            AppError {
                status: StatusCode::BAD_GATEWAY,
                code: "email_error".to_string(),
                message: format!("failed to send email: {}", e),
            }
        })?;

    Ok(success(SendEmailResponse {
        recipients: recipients.len(),
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    strategy: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        strategy: state.generator.invoker_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvocationError, SchemaError, StorageError};
    use crate::models::{MediaType, PromptBundle, RemoteArtifactHandle};
    use crate::reasoning::ReasoningInvoker;
    use crate::storage::ObjectStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct EmptyStore;

    #[async_trait]
    impl ObjectStore for EmptyStore {
        async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound { key: key.to_string() })
        }
        async fn sign_url(&self, key: &str, _ttl: Duration) -> Result<String, StorageError> {
            Ok(format!("mem://{}", key))
        }
    }

    struct CannedInvoker(String);

    #[async_trait]
    impl ReasoningInvoker for CannedInvoker {
        fn name(&self) -> &str {
            "canned"
        }
        async fn invoke(
            &self,
            _bundle: PromptBundle,
            _artifacts: &[RemoteArtifactHandle],
        ) -> Result<String, InvocationError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Default)]
    struct RecordingMailer {
        sent: Mutex<Vec<(Vec<String>, String)>>,
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(&self, recipients: &[String], _subject: &str, html: &str) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((recipients.to_vec(), html.to_string()));
            Ok(())
        }
    }

    const REPORT: &str = r#"{"rootCauses":[{"rank":1,"cause":"Over-torque","probability":"High","factors":"torque","explanation":"e","keyInsightForRCA":"k"}],"recommendations":{"shortTerm":"s","longTerm":"l"},"references":[]}"#;

    fn state(raw: &str, mailer: Option<Arc<dyn Mailer>>) -> AppState {
        let generator = RcaGenerator::new(Arc::new(EmptyStore), Arc::new(CannedInvoker(raw.into())));
        AppState {
            generator: Arc::new(generator),
            mailer,
            default_mode: AnalysisMode::Quick,
        }
    }

    fn analyze_body(documents: usize) -> AnalyzeBody {
        AnalyzeBody {
            description: "weld crack".into(),
            documents: (0..documents)
                .map(|i| SourceFile::new(format!("d{}.pdf", i), format!("k{}", i), MediaType::Pdf))
                .collect(),
            images: vec![],
            mode: None,
        }
    }

    #[tokio::test]
    async fn analyze_returns_report() {
        let Json(body) = handle_analyze(State(state(REPORT, None)), Json(analyze_body(1)))
            .await
            .unwrap();
        assert!(body.success);
        assert_eq!(body.data.root_causes[0].cause, "Over-torque");
    }

    #[tokio::test]
    async fn too_many_documents_is_bad_request() {
        let err = handle_analyze(State(state(REPORT, None)), Json(analyze_body(6)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, "bad_request");
    }

    #[test]
    fn oversized_file_is_bad_request() {
        let mut file = SourceFile::new("big.pdf", "k", MediaType::Pdf);
        file.size_bytes = MAX_FILE_BYTES + 1;
        let err = check_upload_bounds("documents", &[file]).unwrap_err();
        assert!(err.message.contains("big.pdf"));
    }

    #[tokio::test]
    async fn schema_failure_maps_to_bad_gateway() {
        let err = handle_analyze(State(state("not json", None)), Json(analyze_body(0)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.code, "schema_error");
    }

    #[test]
    fn timeout_maps_to_gateway_timeout() {
        let err = AppError::from(GenerationError::Timeout(Duration::from_secs(1)));
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code, "timeout");
        let err = AppError::from(GenerationError::Schema(SchemaError::Empty));
        assert_eq!(err.code, "schema_error");
    }

    #[tokio::test]
    async fn send_email_accepts_serialized_report_and_recipient_string() {
        let mailer = Arc::new(RecordingMailer::default());
        let body: SendEmailBody = serde_json::from_value(serde_json::json!({
            "email": "a@x.com, b@y.com",
            "data": REPORT,
        }))
        .unwrap();

        let Json(resp) = handle_send_email(State(state(REPORT, Some(mailer.clone()))), Json(body))
            .await
            .unwrap();
        assert_eq!(resp.data.recipients, 2);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent[0].0, vec!["a@x.com", "b@y.com"]);
        assert!(sent[0].1.contains("Over-torque"));
    }

    #[tokio::test]
    async fn send_email_requires_both_fields() {
        let body: SendEmailBody = serde_json::from_value(serde_json::json!({ "email": "a@x.com" })).unwrap();
        let err = handle_send_email(State(state(REPORT, None)), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_email_without_mailer_is_unavailable() {
        let body: SendEmailBody = serde_json::from_value(serde_json::json!({
            "email": ["a@x.com"],
            "data": serde_json::from_str::<serde_json::Value>(REPORT).unwrap(),
        }))
        .unwrap();
        let err = handle_send_email(State(state(REPORT, None)), Json(body))
            .await
            .unwrap_err();
        assert_eq!(err.code, "email_disabled");
    }
}
