// src/core/probes/headers.rs

use tracing::info;

use crate::core::models::{HeadersData, ProbeData, ProbeReport, ValidatedHost};
use crate::core::probes::{bound_summary, capture_headers, http_client, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

/// Issues a single GET and captures the full response-header set. Values
/// pass through redaction before they enter the payload, so opaque
/// headers (cookies, authorization material) never leave the process.
pub async fn run_header_check(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    info!(host = %host.normalized_host, "Starting header capture.");
    ctx.outbound_slot().await?;

    let client = http_client(ctx.config)?;
    let url = format!("https://{}", host.normalized_host);
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProbeError::Network(format!("HTTP request failed: {e}")))?;

    let status = response.status().as_u16();
    info!(status, "Received HTTP response for header capture.");

    let captured = capture_headers(response.headers());
    let headers = redaction::redact_headers(&captured);

    let raw = headers
        .iter()
        .map(|(name, value)| format!("{name}: {value}"))
        .collect::<Vec<_>>()
        .join("\n");
    let (raw_output, _) = redaction::redact(&format!("HTTP {status}\n{raw}"));

    let summary = bound_summary(&format!(
        "{} response headers captured from {} (status {})",
        headers.len(),
        host.normalized_host,
        status,
    ));

    Ok(ProbeReport {
        summary,
        data: ProbeData::Headers(HeadersData { status, headers }),
        raw_output,
        findings: Vec::new(),
    })
}
