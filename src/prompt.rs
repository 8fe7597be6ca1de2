//! Prompt synthesis.
//!
//! Turns the defect description, extracted document text and image locators
//! into a [`PromptBundle`]. Construction is deterministic; the only source of
//! non-determinism in the pipeline is the reasoner itself.
//!
//! The system instructions embed the exact report schema parsed by
//! [`crate::validate`]. Bump [`PROMPT_VERSION`] whenever the schema text
//! changes.

use crate::models::{AnalysisMode, ExtractedContent, ImageReference, PromptBundle};

/// Version tag of [`SYSTEM_INSTRUCTIONS`].
pub const PROMPT_VERSION: &str = "rca-system/3";

/// Maximum characters of extracted text included per document.
pub const MAX_DOCUMENT_CHARS: usize = 40_000;
/// Maximum characters of extracted text included across all documents.
pub const MAX_TOTAL_DOCUMENT_CHARS: usize = 120_000;

pub const NONE_PROVIDED: &str = "(none provided)";
pub const NONE: &str = "(none)";

pub const SYSTEM_INSTRUCTIONS: &str = r#"You are an expert in manufacturing Root Cause Analysis (RCA),
following DFMEA, PFMEA, and IATF 16949 standards.

Your mission:
Analyze the provided defect description and the reference documents
(PDF, Word, Excel, or plain text), along with optional images.
Identify the top 3 most probable root causes, ranked by likelihood.

Classify each cause within the failure-mode taxonomy (Man, Machine, Method,
Material, Measurement, Environment). Where the data allows, quantify process
variation using SPC vocabulary (Cp, Cpk, control limits, out-of-control runs)
and reference process-audit findings.

Return strictly valid JSON, with no prose before or after it, in exactly this structure:
{
  "rootCauses": [
    { "rank": 1, "cause": "string", "probability": "High", "factors": "string", "explanation": "string", "keyInsightForRCA": "string" },
    { "rank": 2, "cause": "string", "probability": "Medium", "factors": "string", "explanation": "string", "keyInsightForRCA": "string" },
    { "rank": 3, "cause": "string", "probability": "Low", "factors": "string", "explanation": "string", "keyInsightForRCA": "string" }
  ],
  "recommendations": { "shortTerm": "string", "longTerm": "string" },
  "references": [{ "title": "string", "description": "string" }]
}

Rules:
- "probability" is one of "High", "Medium", "Low".
- Order rootCauses by rank; a higher rank never has a higher probability than a lower one.
- Mention which document or data supports each cause, using the document names given.
- Keep output concise, technical, and factual."#;

const DEEP_BANNER: &str = "Deep Analysis Mode: interpret document contents in detail.";
const QUICK_BANNER: &str =
    "Quick Analysis Mode: document contents are not provided; reason from the description and file names.";

/// Assemble the prompt for one analysis.
///
/// In [`AnalysisMode::Quick`] only document names are rendered; any text in
/// `documents` is ignored. Images without a locator are left out.
pub fn build(
    description: &str,
    documents: &[ExtractedContent],
    images: &[ImageReference],
    mode: AnalysisMode,
) -> PromptBundle {
    let description = description.trim();
    let description = if description.is_empty() {
        NONE_PROVIDED
    } else {
        description
    };

    let banner = match mode {
        AnalysisMode::Deep => DEEP_BANNER,
        AnalysisMode::Quick => QUICK_BANNER,
    };

    let documents_section = match mode {
        AnalysisMode::Deep => render_documents_deep(documents),
        AnalysisMode::Quick => render_document_names(documents),
    };

    let attachments: Vec<ImageReference> = images
        .iter()
        .filter(|img| img.access_url.is_some())
        .cloned()
        .collect();

    let images_section = if attachments.is_empty() {
        NONE.to_string()
    } else {
        attachments
            .iter()
            .filter_map(|img| {
                img.access_url.as_ref().map(|url| {
                    // Inline data is sent as an attachment, never as text
                    if url.starts_with("data:") {
                        format!("{}: (embedded image)", img.source_name)
                    } else {
                        format!("{}: {}", img.source_name, url)
                    }
                })
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user_content = format!(
        "{}\n\nDefect Description:\n{}\n\nDocuments:\n{}\n\nImage References:\n{}\n",
        banner, description, documents_section, images_section
    );

    PromptBundle {
        system_instructions: SYSTEM_INSTRUCTIONS.to_string(),
        user_content,
        image_attachments: attachments,
        mode,
    }
}

fn document_header(name: &str) -> String {
    format!("===== {} =====", name)
}

fn render_documents_deep(documents: &[ExtractedContent]) -> String {
    if documents.is_empty() {
        return NONE.to_string();
    }

    let mut budget = MAX_TOTAL_DOCUMENT_CHARS;
    let mut sections = Vec::with_capacity(documents.len());
    for doc in documents {
        let body = match (&doc.text, &doc.error) {
            (Some(text), _) if !text.trim().is_empty() => {
                let limit = MAX_DOCUMENT_CHARS.min(budget);
                let (clipped, used) = clip(text.trim(), limit);
                budget -= used;
                clipped
            }
            (Some(_), _) => "(no text extracted)".to_string(),
            (None, Some(_)) => "(extraction failed)".to_string(),
            (None, None) => "(not extracted)".to_string(),
        };
        sections.push(format!("{}\n{}", document_header(&doc.source_name), body));
    }
    sections.join("\n\n")
}

fn render_document_names(documents: &[ExtractedContent]) -> String {
    if documents.is_empty() {
        return NONE.to_string();
    }
    documents
        .iter()
        .map(|doc| format!("- {}", doc.source_name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Clip `text` to at most `limit` characters, appending a truncation note.
/// Returns the rendered text and the number of characters consumed.
fn clip(text: &str, limit: usize) -> (String, usize) {
    let total = text.chars().count();
    if total <= limit {
        return (text.to_string(), total);
    }
    let kept: String = text.chars().take(limit).collect();
    (
        format!("{}\n[... truncated {} characters]", kept, total - limit),
        limit,
    )
}
