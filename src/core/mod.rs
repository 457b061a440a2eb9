// src/core/mod.rs

/// Data structures shared across the pipeline: probe kinds, run statuses,
/// probe payloads and run records.
pub mod models;

/// Syntactic host and URL validation, performed before any network I/O.
pub mod validator;

/// Scope authorization and SSRF-safe resolution of validated targets.
pub mod scope;

/// Per-run request budgets, pacing and the global execution ceiling.
pub mod rate_limit;

/// Redaction of probe output before it reaches any store.
pub mod redaction;

/// The probe implementations and their dispatcher.
pub mod probes;

/// The run state machine tying validation, limits, probes and stores together.
pub mod lifecycle;
