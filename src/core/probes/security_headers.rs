// src/core/probes/security_headers.rs

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::core::models::{
    AnalysisFinding, ProbeData, ProbeReport, SecurityHeadersData, Severity, ValidatedHost,
};
use crate::core::probes::{bound_summary, capture_headers, http_client, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

// The scored header set. Weights sum to 100.
const WEIGHTED_HEADERS: [(&str, u32); 8] = [
    ("strict-transport-security", 20),
    ("content-security-policy", 25),
    ("x-frame-options", 15),
    ("x-content-type-options", 10),
    ("referrer-policy", 10),
    ("permissions-policy", 10),
    ("cross-origin-opener-policy", 5),
    ("cross-origin-resource-policy", 5),
];

const WEAK_POSTURE_THRESHOLD: u32 = 50;

/// Issues a single GET and scores the response against the weighted set
/// of standard security headers. Information-disclosure headers are
/// flagged separately.
pub async fn run_security_headers(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    info!(host = %host.normalized_host, "Starting security headers assessment.");
    ctx.outbound_slot().await?;

    let client = http_client(ctx.config)?;
    let url = format!("https://{}", host.normalized_host);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProbeError::Network(format!("HTTP request failed: {e}")))?;

    info!(status = %response.status(), "Received HTTP response for security headers.");
    let captured = capture_headers(response.headers());

    let data = score_headers(&captured);
    let findings = analyze_posture(&captured, &data);

    let summary = bound_summary(&format!(
        "security header score {}/100 for {} ({} of {} present)",
        data.score,
        host.normalized_host,
        data.present.len(),
        WEIGHTED_HEADERS.len(),
    ));

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(score = data.score, findings = %findings.len(), "Security headers assessment finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::SecurityHeaders(data),
        raw_output,
        findings,
    })
}

fn score_headers(headers: &BTreeMap<String, String>) -> SecurityHeadersData {
    let mut data = SecurityHeadersData::default();
    for (name, weight) in WEIGHTED_HEADERS {
        if headers.contains_key(name) {
            debug!(header = name, weight, "Scored header present.");
            data.score += weight;
            data.present.push(name.to_string());
        } else {
            debug!(header = name, "Scored header missing.");
            data.missing.push(name.to_string());
        }
    }
    data
}

fn analyze_posture(
    headers: &BTreeMap<String, String>,
    data: &SecurityHeadersData,
) -> Vec<AnalysisFinding> {
    let mut analyses = Vec::new();

    if data.missing.iter().any(|h| h == "strict-transport-security") {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_HSTS_MISSING"));
    }
    if data.missing.iter().any(|h| h == "content-security-policy") {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_CSP_MISSING"));
    }
    if data.missing.iter().any(|h| h == "x-frame-options") {
        analyses.push(AnalysisFinding::new(
            Severity::Warning,
            "HEADERS_X_FRAME_OPTIONS_MISSING",
        ));
    }
    if data.missing.iter().any(|h| h == "x-content-type-options") {
        analyses.push(AnalysisFinding::new(
            Severity::Info,
            "HEADERS_X_CONTENT_TYPE_OPTIONS_MISSING",
        ));
    }

    if headers.contains_key("server") {
        analyses.push(AnalysisFinding::new(Severity::Info, "HEADERS_SERVER_DISCLOSURE"));
    }
    if headers.contains_key("x-powered-by") {
        analyses.push(AnalysisFinding::new(
            Severity::Warning,
            "HEADERS_X_POWERED_BY_DISCLOSURE",
        ));
    }

    if data.score < WEAK_POSTURE_THRESHOLD {
        analyses.push(AnalysisFinding::new(Severity::Warning, "HEADERS_WEAK_POSTURE"));
    }

    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn headers(names: &[&str]) -> BTreeMap<String, String> {
        names
            .iter()
            .map(|n| (n.to_string(), "value".to_string()))
            .collect()
    }

    #[test]
    fn weights_sum_to_one_hundred() {
        let total: u32 = WEIGHTED_HEADERS.iter().map(|(_, w)| w).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn full_header_set_scores_full_marks() {
        let all: Vec<&str> = WEIGHTED_HEADERS.iter().map(|(n, _)| *n).collect();
        let data = score_headers(&headers(&all));
        assert_eq!(data.score, 100);
        assert_eq!(data.present.len(), 8);
        assert!(data.missing.is_empty());
    }

    #[test]
    fn empty_header_set_scores_zero() {
        let data = score_headers(&headers(&[]));
        assert_eq!(data.score, 0);
        assert_eq!(data.missing.len(), 8);
    }

    #[test]
    fn partial_set_scores_its_weights() {
        let data = score_headers(&headers(&[
            "strict-transport-security",
            "content-security-policy",
        ]));
        assert_eq!(data.score, 45);
    }

    #[test]
    fn missing_headers_produce_findings() {
        let captured = headers(&[]);
        let data = score_headers(&captured);
        let findings = analyze_posture(&captured, &data);
        assert!(findings
            .iter()
            .any(|f| f.code == "HEADERS_HSTS_MISSING" && f.severity == Severity::Warning));
        assert!(findings.iter().any(|f| f.code == "HEADERS_CSP_MISSING"));
        assert!(findings.iter().any(|f| f.code == "HEADERS_WEAK_POSTURE"));
    }

    #[test]
    fn disclosure_headers_are_flagged() {
        let mut captured = headers(&[
            "strict-transport-security",
            "content-security-policy",
            "x-frame-options",
            "x-content-type-options",
            "referrer-policy",
            "permissions-policy",
            "cross-origin-opener-policy",
            "cross-origin-resource-policy",
        ]);
        captured.insert("server".into(), "nginx/1.25".into());
        captured.insert("x-powered-by".into(), "PHP/8.3".into());

        let data = score_headers(&captured);
        let findings = analyze_posture(&captured, &data);
        assert!(findings
            .iter()
            .any(|f| f.code == "HEADERS_SERVER_DISCLOSURE" && f.severity == Severity::Info));
        assert!(findings
            .iter()
            .any(|f| f.code == "HEADERS_X_POWERED_BY_DISCLOSURE"
                && f.severity == Severity::Warning));
        assert!(!findings.iter().any(|f| f.code == "HEADERS_WEAK_POSTURE"));
    }
}
