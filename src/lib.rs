//! # Veritext
//!
//! A content-analysis pipeline that checks documents for plagiarism and
//! AI-generated text.
//!
//! Independent detectors each return overlapping, unordered character spans.
//! Veritext merges them into one non-overlapping labeled partition of the
//! document, derives plagiarism / AI / human percentages, and drives every
//! request through a concurrent job lifecycle with retries, timeouts and
//! cancellation.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ JobManager ──▶ Detectors (concurrent, retried)
//!                 │                    │ spans
//!                 │                    ▼
//!                 │            merge ──▶ score
//!                 ▼                        │
//!            ReportStore ◀─────────────────┘
//!                 │
//!        ┌────────┴────────┐
//!        ▼                 ▼
//!   CLI (vtx)         HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | TXT / PDF / DOCX text extraction |
//! | [`detector`] | Detector trait and registry |
//! | [`detector_http`] | HTTP/JSON detector adapter |
//! | [`merge`] | Span merger |
//! | [`score`] | Score aggregation and severity bands |
//! | [`jobs`] | Job lifecycle manager |
//! | [`store`] | Report store trait, in-memory store |
//! | [`sqlite_store`] | SQLite report store |
//! | [`export`] | Report data for external renderers |
//! | [`stats`] | Dashboard statistics |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod db;
pub mod detector;
pub mod detector_http;
pub mod error;
pub mod export;
pub mod extract;
pub mod jobs;
pub mod merge;
pub mod migrate;
pub mod models;
pub mod score;
pub mod server;
pub mod sqlite_store;
pub mod stats;
pub mod store;
