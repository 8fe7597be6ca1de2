//! # RCA Harness
//!
//! Structured root cause analysis (RCA) of manufacturing defects.
//!
//! A free-text defect description plus uploaded documents and images are
//! turned into a bounded prompt, handed to an external LLM under a strict
//! output contract, and the response is validated into an [`RcaReport`].
//! Documents staged on the reasoning service are always deleted afterwards.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ ObjectStore  │──▶│ Extract  │──▶│  Prompt   │──▶│ Reasoner │
//! │ S3 / FS      │   │ PDF/OOXML│   │deep/quick │   │ strategy │
//! └──────┬───────┘   └──────────┘   └───────────┘   └────┬─────┘
//!        │ signed image URLs                              │ raw text
//!        └────────────────▶ Artifacts (staged docs) ◀─────┤
//!                                                         ▼
//!                                                   ┌──────────┐
//!                                                   │ Validate │──▶ RcaReport
//!                                                   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export OPENAI_API_KEY=sk-...
//! rca analyze --description "weld crack on bracket A37" --document ./torque_log.pdf
//! rca serve                     # POST /analyze, POST /send-email, GET /health
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`storage`] | Object storage: S3 (SigV4) and filesystem |
//! | [`extract`] | PDF, DOCX, XLSX and text extraction |
//! | [`prompt`] | Prompt synthesis and the system template |
//! | [`reasoning`] | Reasoning invokers, OpenAI client, run polling |
//! | [`artifacts`] | Staged document lifecycle |
//! | [`validate`] | Response validation |
//! | [`pipeline`] | The `generate` orchestrator |
//! | [`email`] | Report rendering and delivery |
//! | [`server`] | HTTP server |
//!
//! [`RcaReport`]: models::RcaReport

pub mod artifacts;
pub mod config;
pub mod email;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod reasoning;
pub mod server;
pub mod storage;
pub mod validate;
