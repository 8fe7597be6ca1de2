//! Response validation.
//!
//! The reasoner's raw text must be one serialized report object. Prose
//! around the object is rejected; the only tolerated wrapping is a response
//! that consists of a single fenced code block. A response that fails here
//! fails the whole request (no degraded raw-text report is produced).

use serde::{de, Deserialize, Deserializer};

use crate::error::SchemaError;
use crate::models::RcaReport;

/// Parse and check the reasoner's raw output.
///
/// When every root cause carries a rank the causes are sorted by rank; a
/// ranking that then lists a less probable cause before a more probable one
/// is rejected.
pub fn validate(raw: &str) -> Result<RcaReport, SchemaError> {
    let body = strip_code_fence(raw.trim());
    if body.is_empty() {
        return Err(SchemaError::Empty);
    }

    let mut report: RcaReport =
        serde_json::from_str(body).map_err(|e| SchemaError::Malformed(e.to_string()))?;

    if report.root_causes.is_empty() {
        return Err(SchemaError::NoRootCauses);
    }

    let ranked = report.root_causes.iter().filter(|c| c.rank.is_some()).count();
    if ranked == report.root_causes.len() {
        report.root_causes.sort_by_key(|c| c.rank);
        if let Some(pair) = report
            .root_causes
            .windows(2)
            .find(|pair| pair[0].probability < pair[1].probability)
        {
            return Err(SchemaError::RankOrder(format!(
                "rank {} ({:?}) is listed before rank {} ({:?})",
                pair[0].rank.unwrap_or_default(),
                pair[0].probability,
                pair[1].rank.unwrap_or_default(),
                pair[1].probability
            )));
        }
    } else if ranked > 0 {
        return Err(SchemaError::Malformed(format!(
            "{} of {} root causes carry a rank",
            ranked,
            report.root_causes.len()
        )));
    }

    Ok(report)
}

/// Unwrap a response that is exactly one fenced block (```json ... ```).
fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return text;
    };
    // Drop the info string (`json`), on its own line or before the object
    inner
        .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        .trim()
}

/// Ranks arrive as integers or as numeric strings (`"1"`).
pub(crate) fn deserialize_rank<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawRank {
        Number(u32),
        Text(String),
    }

    match Option::<RawRank>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawRank::Number(n)) => Ok(Some(n)),
        Some(RawRank::Text(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid rank '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Probability, Recommendations, Reference, RootCause};

    fn sample_report() -> RcaReport {
        let cause = |rank, probability, cause: &str| RootCause {
            rank: Some(rank),
            cause: cause.to_string(),
            probability,
            factors: "torque 52Nm vs spec 45Nm".to_string(),
            explanation: "Over-torque induces stress at the weld toe".to_string(),
            key_insight_for_rca: "Check torque tool calibration".to_string(),
        };
        RcaReport {
            root_causes: vec![
                cause(1, Probability::High, "Over-torque during assembly"),
                cause(2, Probability::Medium, "Weld porosity"),
                cause(3, Probability::Low, "Material hardness out of spec"),
            ],
            recommendations: Recommendations {
                short_term: "Quarantine lot 37".to_string(),
                long_term: "Add torque audit to PFMEA".to_string(),
            },
            references: vec![Reference {
                title: "torque_log.pdf".to_string(),
                description: "Torque readings".to_string(),
            }],
        }
    }

    #[test]
    fn valid_report_round_trips() {
        let report = sample_report();
        let json = serde_json::to_string_pretty(&report).unwrap();
        assert!(json.contains("keyInsightForRCA"));
        assert_eq!(validate(&json).unwrap(), report);
    }

    #[test]
    fn string_ranks_are_accepted() {
        let raw = r#"{
          "rootCauses": [
            { "rank": "2", "cause": "b", "probability": "Medium", "factors": "f", "explanation": "e", "keyInsightForRCA": "k" },
            { "rank": "1", "cause": "a", "probability": "High", "factors": "f", "explanation": "e", "keyInsightForRCA": "k" }
          ],
          "recommendations": { "shortTerm": "s", "longTerm": "l" },
          "references": []
        }"#;
        let report = validate(raw).unwrap();
        assert_eq!(report.root_causes[0].cause, "a");
        assert_eq!(report.root_causes[0].rank, Some(1));
    }

    #[test]
    fn single_fenced_block_is_unwrapped() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        let fenced = format!("```json\n{}\n```", json);
        assert_eq!(validate(&fenced).unwrap(), sample_report());
    }

    #[test]
    fn fence_info_string_on_the_same_line_is_dropped() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        let pretty = serde_json::to_string_pretty(&sample_report()).unwrap();
        for fenced in [
            format!("```json {}```", json),
            format!("```json{}```", json),
            format!("```json {}\n```", pretty),
            format!("```\n{}\n```", json),
        ] {
            assert_eq!(validate(&fenced).unwrap(), sample_report(), "fence: {}", fenced);
        }
    }

    #[test]
    fn prose_around_json_is_rejected() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        let raw = format!("Here is the analysis:\n{}", json);
        assert!(matches!(validate(&raw), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn truncated_json_is_schema_error() {
        let json = serde_json::to_string(&sample_report()).unwrap();
        let truncated = &json[..json.len() / 2];
        assert!(matches!(validate(truncated), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn empty_response_is_schema_error() {
        assert_eq!(validate("  \n "), Err(SchemaError::Empty));
    }

    #[test]
    fn missing_fields_are_schema_error() {
        let raw = r#"{"rootCauses":[{"cause":"a","probability":"High"}],"recommendations":{"shortTerm":"s","longTerm":"l"}}"#;
        assert!(matches!(validate(raw), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn unknown_probability_is_schema_error() {
        let raw = r#"{"rootCauses":[{"cause":"a","probability":"Certain","factors":"f","explanation":"e","keyInsightForRCA":"k"}],"recommendations":{"shortTerm":"s","longTerm":"l"}}"#;
        assert!(matches!(validate(raw), Err(SchemaError::Malformed(_))));
    }

    #[test]
    fn empty_root_causes_is_schema_error() {
        let raw = r#"{"rootCauses":[],"recommendations":{"shortTerm":"s","longTerm":"l"},"references":[]}"#;
        assert_eq!(validate(raw), Err(SchemaError::NoRootCauses));
    }

    #[test]
    fn rank_contradicting_probability_is_rejected() {
        let mut report = sample_report();
        report.root_causes[0].probability = Probability::Low;
        let json = serde_json::to_string(&report).unwrap();
        assert!(matches!(validate(&json), Err(SchemaError::RankOrder(_))));
    }

    #[test]
    fn unranked_causes_keep_their_order() {
        let mut report = sample_report();
        for cause in &mut report.root_causes {
            cause.rank = None;
        }
        report.root_causes.reverse();
        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(validate(&json).unwrap(), report);
    }

    #[test]
    fn missing_references_default_to_empty() {
        let raw = r#"{"rootCauses":[{"rank":1,"cause":"a","probability":"High","factors":"f","explanation":"e","keyInsightForRCA":"k"}],"recommendations":{"shortTerm":"s","longTerm":"l"}}"#;
        assert!(validate(raw).unwrap().references.is_empty());
    }
}
