// src/core/probes/cors.rs

use tracing::{debug, info, warn};

use crate::core::models::{
    AnalysisFinding, CorsData, CorsOriginResult, ProbeData, ProbeReport, Severity, ValidatedHost,
};
use crate::core::probes::{bound_summary, http_client, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

// The origins the preflight matrix probes with: an attacker-controlled
// looking origin, the literal null origin, and an unrelated third party.
const TESTED_ORIGINS: [&str; 3] = [
    "https://palisade-cors-probe.example",
    "null",
    "https://static.example.org",
];

/// Sends one baseline GET plus one OPTIONS preflight per tested origin
/// and grades the returned CORS policy. Verbatim reflection of an
/// arbitrary origin combined with allowed credentials is the worst case.
pub async fn run_cors_check(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    info!(host = %host.normalized_host, "Starting CORS check.");
    let client = http_client(ctx.config)?;
    let url = format!("https://{}", host.normalized_host);

    let mut origins = Vec::new();
    let mut failures = 0usize;

    ctx.outbound_slot().await?;
    match client.get(&url).send().await {
        Ok(response) => {
            debug!(status = %response.status(), "Baseline request answered.");
            origins.push(extract_cors_result("(baseline)", response.headers()));
        }
        Err(e) => {
            warn!(error = %e, "Baseline request failed.");
            failures += 1;
        }
    }

    for origin in TESTED_ORIGINS {
        ctx.outbound_slot().await?;
        let request = client
            .request(reqwest::Method::OPTIONS, &url)
            .header("Origin", origin)
            .header("Access-Control-Request-Method", "GET");
        match request.send().await {
            Ok(response) => {
                debug!(origin, status = %response.status(), "Preflight answered.");
                origins.push(extract_cors_result(origin, response.headers()));
            }
            Err(e) => {
                warn!(origin, error = %e, "Preflight request failed.");
                failures += 1;
            }
        }
    }

    if origins.is_empty() {
        return Err(ProbeError::Network(format!(
            "all {failures} CORS requests failed"
        )));
    }

    let data = CorsData { origins };
    let findings = analyze_cors(&data);

    let summary = bound_summary(&format!(
        "{} CORS responses from {}, {} finding(s)",
        data.origins.len(),
        host.normalized_host,
        findings.len(),
    ));

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(findings = %findings.len(), "CORS check finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::Cors(data),
        raw_output,
        findings,
    })
}

fn extract_cors_result(origin: &str, headers: &reqwest::header::HeaderMap) -> CorsOriginResult {
    let allow_origin = headers
        .get("access-control-allow-origin")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let allow_credentials = headers
        .get("access-control-allow-credentials")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    CorsOriginResult {
        origin: origin.to_string(),
        allow_origin,
        allow_credentials,
    }
}

fn analyze_cors(data: &CorsData) -> Vec<AnalysisFinding> {
    let mut analyses: Vec<AnalysisFinding> = Vec::new();
    let mut push_unique = |finding: AnalysisFinding| {
        if !analyses.iter().any(|f| f.code == finding.code) {
            analyses.push(finding);
        }
    };

    for result in &data.origins {
        let Some(allow_origin) = &result.allow_origin else {
            continue;
        };

        let reflected = result.origin != "(baseline)"
            && result.origin != "null"
            && allow_origin == &result.origin;

        if reflected && result.allow_credentials {
            debug!(origin = %result.origin, "Origin reflected with credentials allowed.");
            push_unique(AnalysisFinding::new(
                Severity::Critical,
                "CORS_REFLECTED_ORIGIN_WITH_CREDENTIALS",
            ));
        } else if reflected {
            push_unique(AnalysisFinding::new(Severity::Warning, "CORS_REFLECTED_ORIGIN"));
        }

        if allow_origin == "*" && result.allow_credentials {
            push_unique(AnalysisFinding::new(
                Severity::Warning,
                "CORS_WILDCARD_WITH_CREDENTIALS",
            ));
        }

        if result.origin == "null" && allow_origin == "null" {
            push_unique(AnalysisFinding::new(Severity::Warning, "CORS_NULL_ORIGIN_ALLOWED"));
        }
    }

    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(origin: &str, allow_origin: Option<&str>, credentials: bool) -> CorsOriginResult {
        CorsOriginResult {
            origin: origin.to_string(),
            allow_origin: allow_origin.map(|s| s.to_string()),
            allow_credentials: credentials,
        }
    }

    #[test]
    fn reflection_with_credentials_is_critical() {
        let data = CorsData {
            origins: vec![result(
                "https://palisade-cors-probe.example",
                Some("https://palisade-cors-probe.example"),
                true,
            )],
        };
        let findings = analyze_cors(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(
                Severity::Critical,
                "CORS_REFLECTED_ORIGIN_WITH_CREDENTIALS"
            )]
        );
    }

    #[test]
    fn reflection_without_credentials_is_a_warning() {
        let data = CorsData {
            origins: vec![result(
                "https://static.example.org",
                Some("https://static.example.org"),
                false,
            )],
        };
        let findings = analyze_cors(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(Severity::Warning, "CORS_REFLECTED_ORIGIN")]
        );
    }

    #[test]
    fn wildcard_with_credentials_is_flagged() {
        let data = CorsData {
            origins: vec![result("https://static.example.org", Some("*"), true)],
        };
        let findings = analyze_cors(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(
                Severity::Warning,
                "CORS_WILDCARD_WITH_CREDENTIALS"
            )]
        );
    }

    #[test]
    fn null_origin_allowance_is_flagged() {
        let data = CorsData {
            origins: vec![result("null", Some("null"), false)],
        };
        let findings = analyze_cors(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(Severity::Warning, "CORS_NULL_ORIGIN_ALLOWED")]
        );
    }

    #[test]
    fn fixed_allow_origin_is_clean() {
        let data = CorsData {
            origins: vec![
                result("(baseline)", Some("https://app.example.com"), true),
                result(
                    "https://palisade-cors-probe.example",
                    Some("https://app.example.com"),
                    true,
                ),
                result("null", None, false),
            ],
        };
        assert_eq!(analyze_cors(&data), vec![]);
    }

    #[test]
    fn duplicate_findings_collapse() {
        let reflected = |origin: &str| result(origin, Some(origin), true);
        let data = CorsData {
            origins: vec![
                reflected("https://palisade-cors-probe.example"),
                reflected("https://static.example.org"),
            ],
        };
        let findings = analyze_cors(&data);
        assert_eq!(findings.len(), 1);
    }
}
