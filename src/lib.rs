//! Palisade, a safe-execution pipeline for authorized reconnaissance probes.
//!
//! Every probe run passes through the same gauntlet before a single packet
//! leaves the process: syntactic host validation, scope authorization with
//! SSRF-safe resolution, rate limiting, and cooperative cancellation. Probe
//! output is redacted before it is handed to any store.
//!
//! # Quick Start
//!
//! ```no_run
//! use palisade::config::PipelineConfig;
//! use palisade::core::lifecycle::{Pipeline, WorkItem};
//! use palisade::core::lifecycle::{ConsoleEvidenceStore, ConsoleRunStore};
//!
//! # async fn run() -> color_eyre::eyre::Result<()> {
//! let pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     ConsoleRunStore::default(),
//!     ConsoleEvidenceStore::default(),
//! );
//! let item = WorkItem {
//!     run_id: "run-1".into(),
//!     target: "example.com".into(),
//!     probe: "TLS_CHECK".into(),
//!     approved_domains: vec!["example.com".into()],
//! };
//! let record = pipeline.process(item).await?;
//! println!("{}", record.status);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
