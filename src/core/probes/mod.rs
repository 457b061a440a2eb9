// src/core/probes/mod.rs

pub mod cert_transparency;
pub mod cors;
pub mod dns;
pub mod fingerprint;
pub mod headers;
pub mod security_headers;
pub mod tls;

use std::collections::BTreeMap;

use crate::config::PipelineConfig;
use crate::core::lifecycle::CancelFlag;
use crate::core::models::{ProbeKind, ProbeReport, ValidatedHost};
use crate::core::rate_limit::RateLimiter;
use crate::error::ProbeError;

const USER_AGENT: &str = "palisade/0.1";
const MAX_SUMMARY_LEN: usize = 256;

/// Everything a probe needs from its surrounding run: identity for rate
/// accounting, the shared limiter, the cooperative cancel flag and the
/// tunables.
pub struct ProbeContext<'a> {
    pub run_id: &'a str,
    pub limiter: &'a RateLimiter,
    pub cancel: &'a CancelFlag,
    pub config: &'a PipelineConfig,
}

impl ProbeContext<'_> {
    /// The checkpoint every probe passes before an outbound operation:
    /// honor a pending cancel, then wait out pacing and budget.
    pub async fn outbound_slot(&self) -> Result<(), ProbeError> {
        if self.cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
        self.limiter.wait_for_request_slot(self.run_id).await?;
        Ok(())
    }
}

/// Routes a validated host to the requested probe implementation.
pub async fn dispatch(
    ctx: &ProbeContext<'_>,
    probe: ProbeKind,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    match probe {
        ProbeKind::TlsCheck => tls::run_tls_check(ctx, host).await,
        ProbeKind::HeaderCheck => headers::run_header_check(ctx, host).await,
        ProbeKind::SecurityHeaders => security_headers::run_security_headers(ctx, host).await,
        ProbeKind::CorsCheck => cors::run_cors_check(ctx, host).await,
        ProbeKind::DnsLookup => dns::run_dns_lookup(ctx, host).await,
        ProbeKind::CertTransparency => cert_transparency::run_cert_transparency(ctx, host).await,
        ProbeKind::TechFingerprint => fingerprint::run_tech_fingerprint(ctx, host).await,
    }
}

/// Builds the HTTP client all HTTP-based probes share: fixed user agent,
/// no redirect following, request timeout from config.
pub(crate) fn http_client(config: &PipelineConfig) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.timeout())
        .build()
        .map_err(|e| ProbeError::Network(format!("failed to build HTTP client: {e}")))
}

/// Captures a response header map as owned strings. Multi-valued headers
/// are joined; values that are not valid UTF-8 are marked, not dropped.
pub(crate) fn capture_headers(headers: &reqwest::header::HeaderMap) -> BTreeMap<String, String> {
    let mut captured: BTreeMap<String, String> = BTreeMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|value| match value.to_str() {
                Ok(text) => text.to_string(),
                Err(_) => "[Invalid UTF-8]".to_string(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        captured.insert(name.as_str().to_string(), joined);
    }
    captured
}

/// Clamps a summary to a single bounded line.
pub(crate) fn bound_summary(text: &str) -> String {
    let line = text.replace(['\r', '\n'], " ");
    if line.len() <= MAX_SUMMARY_LEN {
        return line;
    }
    let mut end = MAX_SUMMARY_LEN;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn summaries_are_single_bounded_lines() {
        assert_eq!(bound_summary("short"), "short");
        assert_eq!(bound_summary("two\nlines"), "two lines");

        let long = "x".repeat(500);
        let bounded = bound_summary(&long);
        assert_eq!(bounded.len(), MAX_SUMMARY_LEN + 3);
        assert!(bounded.ends_with("..."));
    }

    #[test]
    fn bounding_respects_char_boundaries() {
        let long = "é".repeat(300);
        let bounded = bound_summary(&long);
        assert!(bounded.ends_with("..."));
        assert!(bounded.len() <= MAX_SUMMARY_LEN + 3);
    }
}
