// src/core/models.rs

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

// A custom type alias for a Result that can hold an optional success value
// or a String error. Used for per-record sub-results inside probe payloads,
// where one lookup may fail without failing the probe.
pub type ScanResult<T> = Result<Option<T>, String>;

// --- Findings ---

/// Severity level of an analysis finding.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display)]
pub enum Severity {
    #[strum(serialize = "CRITICAL")]
    Critical,
    #[strum(serialize = "WARNING")]
    Warning,
    #[strum(serialize = "INFO")]
    Info,
}

/// A single analysis finding: a severity plus a stable machine code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisFinding {
    pub severity: Severity,
    pub code: String,
}

impl AnalysisFinding {
    pub fn new(severity: Severity, code: &str) -> Self {
        Self {
            severity,
            code: code.to_string(),
        }
    }
}

// --- Probe identity and run lifecycle ---

/// The closed set of probes the pipeline is able to execute.
///
/// Unknown probe names must never reach a dispatcher, so parsing happens
/// through `FromStr` and failures surface before a run is admitted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ProbeKind {
    #[strum(serialize = "TLS_CHECK")]
    #[serde(rename = "TLS_CHECK")]
    TlsCheck,
    #[strum(serialize = "HEADER_CHECK")]
    #[serde(rename = "HEADER_CHECK")]
    HeaderCheck,
    #[strum(serialize = "SECURITY_HEADERS")]
    #[serde(rename = "SECURITY_HEADERS")]
    SecurityHeaders,
    #[strum(serialize = "CORS_CHECK")]
    #[serde(rename = "CORS_CHECK")]
    CorsCheck,
    #[strum(serialize = "DNS_LOOKUP")]
    #[serde(rename = "DNS_LOOKUP")]
    DnsLookup,
    #[strum(serialize = "CERT_TRANSPARENCY")]
    #[serde(rename = "CERT_TRANSPARENCY")]
    CertTransparency,
    #[strum(serialize = "TECH_FINGERPRINT")]
    #[serde(rename = "TECH_FINGERPRINT")]
    TechFingerprint,
}

/// Lifecycle states of a run.
///
/// `Queued` and `Running` are transient; the other four are terminal and
/// a run reaches exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum RunStatus {
    #[strum(serialize = "QUEUED")]
    #[serde(rename = "QUEUED")]
    Queued,
    #[strum(serialize = "RUNNING")]
    #[serde(rename = "RUNNING")]
    Running,
    #[strum(serialize = "COMPLETED")]
    #[serde(rename = "COMPLETED")]
    Completed,
    #[strum(serialize = "FAILED")]
    #[serde(rename = "FAILED")]
    Failed,
    #[strum(serialize = "TIMEOUT")]
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[strum(serialize = "CANCELLED")]
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Running)
    }
}

/// A target that has passed validation, scope and resolution checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidatedHost {
    pub normalized_host: String,
    pub etld_plus_one: String,
    pub resolved_addresses: Vec<IpAddr>,
}

// --- Probe payloads ---

/// Certificate details extracted from the leaf certificate of a TLS handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub subject_name: String,
    pub issuer_name: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub days_until_expiry: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsData {
    pub is_valid: bool,
    pub certificate_info: CertificateInfo,
}

/// Full response-header capture. Values are stored post-redaction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HeadersData {
    pub status: u16,
    pub headers: std::collections::BTreeMap<String, String>,
}

/// Weighted posture assessment of the standard security headers.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SecurityHeadersData {
    pub score: u32,
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

/// Outcome of probing one CORS origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsOriginResult {
    pub origin: String,
    pub allow_origin: Option<String>,
    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsData {
    pub origins: Vec<CorsOriginResult>,
}

/// Per-record-type DNS answers. A failed lookup for one type does not
/// invalidate the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsData {
    pub a: ScanResult<Vec<String>>,
    pub aaaa: ScanResult<Vec<String>>,
    pub cname: ScanResult<Vec<String>>,
    pub mx: ScanResult<Vec<String>>,
    pub txt: ScanResult<Vec<String>>,
    pub ns: ScanResult<Vec<String>>,
}

impl Default for DnsData {
    fn default() -> Self {
        Self {
            a: Ok(None),
            aaaa: Ok(None),
            cname: Ok(None),
            mx: Ok(None),
            txt: Ok(None),
            ns: Ok(None),
        }
    }
}

/// Hostnames observed in certificate transparency logs for the target's
/// registrable domain.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CertTransparencyData {
    pub domain: String,
    pub hostnames: Vec<String>,
    pub truncated: bool,
}

/// A technology identified from response headers or cookies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Technology {
    pub name: String,
    pub category: String,
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FingerprintData {
    pub technologies: Vec<Technology>,
}

/// Typed payload of a probe, tagged by probe kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum ProbeData {
    #[serde(rename = "TLS_CHECK")]
    Tls(TlsData),
    #[serde(rename = "HEADER_CHECK")]
    Headers(HeadersData),
    #[serde(rename = "SECURITY_HEADERS")]
    SecurityHeaders(SecurityHeadersData),
    #[serde(rename = "CORS_CHECK")]
    Cors(CorsData),
    #[serde(rename = "DNS_LOOKUP")]
    Dns(DnsData),
    #[serde(rename = "CERT_TRANSPARENCY")]
    CertTransparency(CertTransparencyData),
    #[serde(rename = "TECH_FINGERPRINT")]
    Fingerprint(FingerprintData),
}

/// What a probe hands back to the lifecycle on success.
///
/// `summary` is a short single-line digest; `raw_output` is the full
/// redacted capture destined for the evidence store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub summary: String,
    pub data: ProbeData,
    pub raw_output: String,
    pub findings: Vec<AnalysisFinding>,
}

// --- Run records ---

/// The terminal record of one processed work item. `probe` carries the
/// name exactly as requested so rejected names remain traceable.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub run_id: String,
    pub target: String,
    pub probe: String,
    pub status: RunStatus,
    pub exit_code: i32,
    pub result_summary: Option<String>,
    pub error: Option<String>,
    pub request_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}
