//! Core data models used throughout the RCA pipeline.
//!
//! These types describe the uploaded inputs, the intermediate per-file
//! results, the prompt handed to the reasoner, and the report returned to
//! the caller. Everything that crosses the HTTP boundary serializes in
//! camelCase.

use serde::{Deserialize, Serialize};

/// Declared media type of an uploaded file. Extraction dispatches on this
/// value alone; file contents are never sniffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Docx,
    Xlsx,
    Plaintext,
    Image,
    Unknown,
}

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const MIME_TEXT: &str = "text/plain";

impl MediaType {
    /// Map an upload's MIME type to a [`MediaType`].
    pub fn from_mime(mime: &str) -> Self {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            MIME_PDF => MediaType::Pdf,
            MIME_DOCX => MediaType::Docx,
            MIME_XLSX => MediaType::Xlsx,
            MIME_TEXT => MediaType::Plaintext,
            m if m.starts_with("image/") => MediaType::Image,
            _ => MediaType::Unknown,
        }
    }

    /// Map a file name's extension to a [`MediaType`] (used for local files).
    pub fn from_extension(name: &str) -> Self {
        let ext = match name.rsplit_once('.') {
            Some((_, ext)) => ext.to_ascii_lowercase(),
            None => return MediaType::Unknown,
        };
        match ext.as_str() {
            "pdf" => MediaType::Pdf,
            "docx" => MediaType::Docx,
            "xlsx" => MediaType::Xlsx,
            "txt" | "log" | "csv" | "md" => MediaType::Plaintext,
            "png" | "jpg" | "jpeg" | "gif" | "webp" => MediaType::Image,
            _ => MediaType::Unknown,
        }
    }

    /// MIME string used when a locator or upload needs one.
    pub fn mime(&self, name: &str) -> &'static str {
        match self {
            MediaType::Pdf => MIME_PDF,
            MediaType::Docx => MIME_DOCX,
            MediaType::Xlsx => MIME_XLSX,
            MediaType::Plaintext => MIME_TEXT,
            MediaType::Image => match name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()) {
                Some(e) if e == "png" => "image/png",
                Some(e) if e == "gif" => "image/gif",
                Some(e) if e == "webp" => "image/webp",
                _ => "image/jpeg",
            },
            MediaType::Unknown => "application/octet-stream",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MediaType::Pdf => "pdf",
            MediaType::Docx => "docx",
            MediaType::Xlsx => "xlsx",
            MediaType::Plaintext => "plaintext",
            MediaType::Image => "image",
            MediaType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An uploaded file as seen by the pipeline. Owned by the caller and only
/// read by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFile {
    /// Original file name as uploaded.
    pub name: String,
    /// Storage key of the object. An empty key means the upload never
    /// reached storage.
    pub location_ref: String,
    pub media_type: MediaType,
    #[serde(default)]
    pub size_bytes: u64,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, location_ref: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            name: name.into(),
            location_ref: location_ref.into(),
            media_type,
            size_bytes: 0,
        }
    }

    pub fn has_location(&self) -> bool {
        !self.location_ref.trim().is_empty()
    }
}

/// Text extracted from one document. Exactly one of `text` and `error` is
/// set for deep-mode extraction; quick mode produces entries with neither.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedContent {
    pub source_name: String,
    pub text: Option<String>,
    pub error: Option<String>,
}

impl ExtractedContent {
    pub fn ok(source_name: impl Into<String>, text: String) -> Self {
        Self {
            source_name: source_name.into(),
            text: Some(text),
            error: None,
        }
    }

    pub fn failed(source_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            text: None,
            error: Some(error.into()),
        }
    }

    /// Entry carrying only the document name (quick mode).
    pub fn name_only(source_name: impl Into<String>) -> Self {
        Self {
            source_name: source_name.into(),
            text: None,
            error: None,
        }
    }
}

/// A signed, short-lived locator for an image. `access_url` is `None` when
/// signing failed; the failure reason is kept in `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub source_name: String,
    pub access_url: Option<String>,
    pub error: Option<String>,
}

/// Analysis depth requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Full document contents are extracted and handed to the reasoner.
    #[default]
    Deep,
    /// Only file names are given to the reasoner.
    Quick,
}

impl std::str::FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deep" => Ok(AnalysisMode::Deep),
            "quick" => Ok(AnalysisMode::Quick),
            other => Err(format!("unknown analysis mode '{}': expected deep or quick", other)),
        }
    }
}

/// The fully assembled instructions for one reasoning call. Built once by
/// [`crate::prompt::build`] and consumed by value by the invoker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBundle {
    pub system_instructions: String,
    pub user_content: String,
    /// Images with a usable locator, in upload order.
    pub image_attachments: Vec<ImageReference>,
    pub mode: AnalysisMode,
}

/// Likelihood bucket of a root cause. Ordered so that `High > Medium > Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Probability {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootCause {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "crate::validate::deserialize_rank"
    )]
    pub rank: Option<u32>,
    pub cause: String,
    pub probability: Probability,
    pub factors: String,
    pub explanation: String,
    #[serde(rename = "keyInsightForRCA")]
    pub key_insight_for_rca: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendations {
    pub short_term: String,
    pub long_term: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub title: String,
    pub description: String,
}

/// The report returned to the caller.
///
/// `root_causes` is never empty, and when ranks are present it is ordered by
/// rank with non-increasing probability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RcaReport {
    pub root_causes: Vec<RootCause>,
    pub recommendations: Recommendations,
    #[serde(default)]
    pub references: Vec<Reference>,
}

/// A document staged on the reasoning service for direct interpretation.
/// Must be deleted remotely once the reasoning call has resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteArtifactHandle {
    pub id: String,
    pub original_name: String,
}

/// Public request of the pipeline.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub documents: Vec<SourceFile>,
    #[serde(default)]
    pub images: Vec<SourceFile>,
    #[serde(default)]
    pub mode: AnalysisMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_types_map_to_media_types() {
        assert_eq!(MediaType::from_mime("application/pdf"), MediaType::Pdf);
        assert_eq!(MediaType::from_mime(MIME_DOCX), MediaType::Docx);
        assert_eq!(MediaType::from_mime(MIME_XLSX), MediaType::Xlsx);
        assert_eq!(MediaType::from_mime("text/plain; charset=utf-8"), MediaType::Plaintext);
        assert_eq!(MediaType::from_mime("image/png"), MediaType::Image);
        assert_eq!(MediaType::from_mime("application/zip"), MediaType::Unknown);
    }

    #[test]
    fn extensions_map_to_media_types() {
        assert_eq!(MediaType::from_extension("Report.PDF"), MediaType::Pdf);
        assert_eq!(MediaType::from_extension("spc.xlsx"), MediaType::Xlsx);
        assert_eq!(MediaType::from_extension("photo.jpeg"), MediaType::Image);
        assert_eq!(MediaType::from_extension("README"), MediaType::Unknown);
    }

    #[test]
    fn probability_orders_high_above_low() {
        assert!(Probability::High > Probability::Medium);
        assert!(Probability::Medium > Probability::Low);
    }

    #[test]
    fn analysis_request_defaults_to_deep() {
        let req: AnalysisRequest = serde_json::from_str(r#"{"description":"x"}"#).unwrap();
        assert_eq!(req.mode, AnalysisMode::Deep);
        assert!(req.documents.is_empty());
    }
}
