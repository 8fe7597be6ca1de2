//! # RCA Harness CLI (`rca`)
//!
//! Runs root cause analyses from the command line, serves the HTTP API, and
//! renders or emails finished reports.
//!
//! ## Usage
//!
//! ```bash
//! rca --config ./config/rca.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rca analyze` | Analyze a defect against local documents and images |
//! | `rca prompt` | Print the assembled prompt without calling the reasoner |
//! | `rca serve` | Start the HTTP server |
//! | `rca render-email <report.json>` | Render a report as email HTML |
//! | `rca send-email <report.json> --to ...` | Email a report |
//!
//! ## Examples
//!
//! ```bash
//! # Deep analysis of a PDF torque log and a photo
//! rca analyze --description "weld crack on bracket A37" \
//!     --document ./torque_log.pdf --image ./crack.jpg
//!
//! # Quick analysis (file names only), JSON output
//! rca analyze --description "burr on housing" --document ./spc.xlsx --mode quick --json
//!
//! # Inspect what would be sent
//! rca prompt --description "weld crack" --document ./torque_log.pdf
//! ```
//!
//! Local files are read through the filesystem store regardless of the
//! configured storage backend.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rca_harness::config::{self, Config};
use rca_harness::email::{self, Mailer, SendGridMailer};
use rca_harness::models::{AnalysisMode, AnalysisRequest, MediaType, RcaReport, SourceFile};
use rca_harness::pipeline::{self, RcaGenerator};
use rca_harness::prompt;
use rca_harness::server;
use rca_harness::storage::{FsStore, ObjectStore};

/// RCA Harness: structured root cause analysis of manufacturing defects.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/rca.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "rca",
    about = "RCA Harness: structured root cause analysis of manufacturing defects",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/rca.toml`. Built-in defaults are used when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/rca.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a defect and print the report.
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// Print the report as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Print the prompt an analysis would send, without calling the reasoner.
    Prompt {
        #[command(flatten)]
        input: InputArgs,

        /// Also print the system instructions.
        #[arg(long)]
        system: bool,
    },

    /// Start the HTTP server.
    Serve,

    /// Render a report JSON file as email HTML.
    RenderEmail {
        /// Path to a report JSON file.
        report: PathBuf,
    },

    /// Email a report JSON file.
    SendEmail {
        /// Path to a report JSON file.
        report: PathBuf,

        /// Recipients, comma-separated or repeated.
        #[arg(long, required = true)]
        to: Vec<String>,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Free-text defect description.
    #[arg(long, default_value = "")]
    description: String,

    /// Document to include (PDF, DOCX, XLSX, text). Repeatable.
    #[arg(long = "document")]
    documents: Vec<PathBuf>,

    /// Image to include. Repeatable.
    #[arg(long = "image")]
    images: Vec<PathBuf>,

    /// Analysis mode: `deep` or `quick`. Defaults to `[pipeline].default_mode`.
    #[arg(long)]
    mode: Option<AnalysisMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rca_harness=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { input, json } => {
            let cfg = load_or_default(&cli.config)?;
            let request = local_request(&input, &cfg)?;
            let generator = RcaGenerator::from_config_with_store(&cfg, local_store())?;

            let report = generator.generate(request).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
        }
        Commands::Prompt { input, system } => {
            let cfg = load_or_default(&cli.config)?;
            let request = local_request(&input, &cfg)?;
            let store = local_store();
            let bundle = pipeline::prepare_prompt(
                store.as_ref(),
                &request,
                cfg.pipeline.max_concurrency,
                Duration::from_secs(cfg.storage.signed_url_ttl_secs),
            )
            .await;
            if system {
                println!("# system ({})\n{}\n", prompt::PROMPT_VERSION, bundle.system_instructions);
            }
            println!("{}", bundle.user_content);
            for image in &bundle.image_attachments {
                println!("[attachment] {}", image.source_name);
            }
        }
        Commands::Serve => {
            let cfg = load_or_default(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::SendEmail { report, to } => {
            let cfg = load_or_default(&cli.config)?;
            let report = read_report(&report)?;
            let recipients = email::normalize_recipients(&to);
            if recipients.is_empty() {
                anyhow::bail!("no valid recipients given");
            }
            let mailer = SendGridMailer::from_env(&cfg.email)?;
            mailer
                .send(&recipients, email::REPORT_SUBJECT, &email::render(&report))
                .await?;
            println!("Sent to {} recipient(s)", recipients.len());
        }
        Commands::RenderEmail { report } => {
            let report = read_report(&report)?;
            println!("{}", email::render(&report));
        }
    }

    Ok(())
}

/// Load the config file, or built-in defaults when it does not exist.
fn load_or_default(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

/// Store that resolves absolute local paths.
fn local_store() -> Arc<dyn ObjectStore> {
    Arc::new(FsStore::new("/"))
}

fn local_request(input: &InputArgs, cfg: &Config) -> anyhow::Result<AnalysisRequest> {
    let documents = input
        .documents
        .iter()
        .map(|p| local_file(p))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let images = input
        .images
        .iter()
        .map(|p| local_file(p))
        .collect::<anyhow::Result<Vec<_>>>()?;

    Ok(AnalysisRequest {
        description: input.description.clone(),
        documents,
        images,
        mode: input.mode.unwrap_or(cfg.pipeline.default_mode),
    })
}

/// Describe a local file as an upload keyed by its absolute path.
fn local_file(path: &Path) -> anyhow::Result<SourceFile> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Cannot open {}", path.display()))?;
    let name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| canonical.display().to_string());
    let key = canonical
        .to_string_lossy()
        .trim_start_matches('/')
        .to_string();

    let mut file = SourceFile::new(name.clone(), key, MediaType::from_extension(&name));
    file.size_bytes = std::fs::metadata(&canonical).map(|m| m.len()).unwrap_or(0);
    Ok(file)
}

fn read_report(path: &Path) -> anyhow::Result<RcaReport> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse report: {}", path.display()))
}

fn print_report(report: &RcaReport) {
    println!("Root causes:");
    for (i, cause) in report.root_causes.iter().enumerate() {
        let rank = cause.rank.unwrap_or(i as u32 + 1);
        println!("\n{}. {} [{:?}]", rank, cause.cause, cause.probability);
        println!("   factors:     {}", cause.factors);
        println!("   explanation: {}", cause.explanation);
        println!("   key insight: {}", cause.key_insight_for_rca);
    }
    println!("\nRecommendations:");
    println!("   short term: {}", report.recommendations.short_term);
    println!("   long term:  {}", report.recommendations.long_term);
    if !report.references.is_empty() {
        println!("\nReferences:");
        for r in &report.references {
            println!("   - {}: {}", r.title, r.description);
        }
    }
}
