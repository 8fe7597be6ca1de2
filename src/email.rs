//! Email delivery of finished reports.
//!
//! Kept outside the generation pipeline: [`render`] is a pure function of a
//! report, and a [`Mailer`] only ever receives rendered HTML plus a
//! recipient list.
//!
//! # Delivery
//!
//! [`SendGridMailer`] posts to the SendGrid v3 `mail/send` endpoint with one
//! personalization per recipient, so recipients do not see each other. Every
//! message carries a plain-text alternative derived with [`html_to_text`].
//! Click tracking is disabled and open tracking enabled.
//!
//! Requires the `SENDGRID_API_KEY` environment variable.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::EmailConfig;
use crate::models::RcaReport;

pub const REPORT_SUBJECT: &str = "Root Cause Analysis Report";
const MAILER_HEADER: &str = "RCA-System-Mailer";

/// Outbound email sink.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<()>;
}

// ============ Rendering ============

/// Render a report as a self-contained HTML fragment. All report text is
/// escaped.
pub fn render(report: &RcaReport) -> String {
    let mut html = String::with_capacity(2048);
    html.push_str("<h2>Root Cause Analysis Report</h2>\n");

    html.push_str("<h3>Root Causes</h3>\n<ol>\n");
    for cause in &report.root_causes {
        html.push_str("<li>\n");
        html.push_str(&format!(
            "<p><strong>{}</strong> ({} probability)</p>\n",
            escape(&cause.cause),
            escape(&format!("{:?}", cause.probability))
        ));
        html.push_str(&format!("<p><em>Factors:</em> {}</p>\n", escape(&cause.factors)));
        html.push_str(&format!(
            "<p><em>Explanation:</em> {}</p>\n",
            escape(&cause.explanation)
        ));
        html.push_str(&format!(
            "<p><em>Key insight:</em> {}</p>\n",
            escape(&cause.key_insight_for_rca)
        ));
        html.push_str("</li>\n");
    }
    html.push_str("</ol>\n");

    html.push_str("<h3>Recommendations</h3>\n");
    html.push_str(&format!(
        "<p><strong>Short term:</strong> {}</p>\n",
        escape(&report.recommendations.short_term)
    ));
    html.push_str(&format!(
        "<p><strong>Long term:</strong> {}</p>\n",
        escape(&report.recommendations.long_term)
    ));

    if !report.references.is_empty() {
        html.push_str("<h3>References</h3>\n<ul>\n");
        for reference in &report.references {
            html.push_str(&format!(
                "<li><strong>{}</strong>: {}</li>\n",
                escape(&reference.title),
                escape(&reference.description)
            ));
        }
        html.push_str("</ul>\n");
    }

    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Plain-text alternative of an HTML body: tags removed, runs of whitespace
/// collapsed, common entities decoded.
pub fn html_to_text(html: &str) -> String {
    let mut stripped = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                stripped.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if !in_tag => stripped.push(c),
            _ => {}
        }
    }

    let decoded = stripped
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");

    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a comma-separated recipient string (or several of them) into
/// trimmed, non-empty addresses.
pub fn normalize_recipients<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    raw.iter()
        .flat_map(|s| s.as_ref().split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============ SendGrid ============

pub struct SendGridMailer {
    config: EmailConfig,
    api_key: String,
    client: reqwest::Client,
}

impl SendGridMailer {
    pub fn new(config: EmailConfig, api_key: String) -> Self {
        Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    pub fn from_env(config: &EmailConfig) -> Result<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .context("SENDGRID_API_KEY environment variable not set")?;
        if config.from_email.trim().is_empty() {
            anyhow::bail!("email.from_email must be set to send email");
        }
        Ok(Self::new(config.clone(), api_key))
    }
}

pub(crate) fn sendgrid_payload(
    config: &EmailConfig,
    recipients: &[String],
    subject: &str,
    html: &str,
) -> Value {
    let personalizations: Vec<Value> = recipients
        .iter()
        .map(|r| json!({ "to": [{ "email": r }] }))
        .collect();

    json!({
        "personalizations": personalizations,
        "from": { "email": config.from_email, "name": config.from_name },
        "subject": subject.trim(),
        "content": [
            { "type": "text/plain", "value": html_to_text(html) },
            { "type": "text/html", "value": html },
        ],
        "tracking_settings": {
            "click_tracking": { "enable": false },
            "open_tracking": { "enable": true },
        },
        "mail_settings": {
            "bypass_spam_management": { "enable": false },
            "sandbox_mode": { "enable": config.sandbox },
        },
        "headers": { "X-Mailer": MAILER_HEADER },
    })
}

#[async_trait]
impl Mailer for SendGridMailer {
    async fn send(&self, recipients: &[String], subject: &str, html: &str) -> Result<()> {
        if recipients.is_empty() {
            anyhow::bail!("no recipients given");
        }
        let payload = sendgrid_payload(&self.config, recipients, subject, html);

        let resp = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .context("SendGrid request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("SendGrid returned {}: {}", status, body);
        }

        tracing::info!(recipients = recipients.len(), "report email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Probability, Recommendations, Reference, RootCause};

    fn report() -> RcaReport {
        RcaReport {
            root_causes: vec![RootCause {
                rank: Some(1),
                cause: "Over-torque <52Nm> on bracket A37".into(),
                probability: Probability::High,
                factors: "torque spec 45Nm exceeded".into(),
                explanation: "Stress & fatigue at weld toe".into(),
                key_insight_for_rca: "Audit torque tools".into(),
            }],
            recommendations: Recommendations {
                short_term: "Quarantine lot".into(),
                long_term: "Update PFMEA".into(),
            },
            references: vec![Reference {
                title: "torque.pdf".into(),
                description: "Torque log".into(),
            }],
        }
    }

    #[test]
    fn render_escapes_report_text() {
        let html = render(&report());
        assert!(html.contains("Over-torque &lt;52Nm&gt; on bracket A37"));
        assert!(html.contains("Stress &amp; fatigue"));
        assert!(html.contains("(High probability)"));
        assert!(html.contains("<h3>References</h3>"));
        assert!(!html.contains("<52Nm>"));
    }

    #[test]
    fn plain_text_strips_tags_and_collapses_space() {
        let text = html_to_text("<h2>Report</h2>\n<p>a  &amp;\n b</p>");
        assert_eq!(text, "Report a & b");
        assert!(html_to_text(&render(&report())).contains("Over-torque <52Nm> on bracket A37"));
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        assert_eq!(
            normalize_recipients(&["a@x.com, b@y.com,, ", " c@z.com"]),
            vec!["a@x.com", "b@y.com", "c@z.com"]
        );
        assert!(normalize_recipients(&[" , "]).is_empty());
    }

    #[test]
    fn payload_sets_tracking_and_headers() {
        let config = EmailConfig {
            from_email: "rca@example.com".into(),
            sandbox: true,
            ..Default::default()
        };
        let payload = sendgrid_payload(&config, &["a@x.com".into(), "b@y.com".into()], " Subject ", "<p>hi</p>");
        assert_eq!(payload["personalizations"].as_array().unwrap().len(), 2);
        assert_eq!(payload["from"]["name"], "Root Cause Analysis System");
        assert_eq!(payload["subject"], "Subject");
        assert_eq!(payload["content"][0]["value"], "hi");
        assert_eq!(payload["tracking_settings"]["click_tracking"]["enable"], false);
        assert_eq!(payload["mail_settings"]["sandbox_mode"]["enable"], true);
        assert_eq!(payload["headers"]["X-Mailer"], "RCA-System-Mailer");
    }
}
