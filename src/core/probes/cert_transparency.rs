// src/core/probes/cert_transparency.rs

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{debug, info};

use crate::core::models::{
    CertTransparencyData, ProbeData, ProbeReport, ValidatedHost,
};
use crate::core::probes::{bound_summary, http_client, ProbeContext};
use crate::core::redaction;
use crate::core::validator;
use crate::error::ProbeError;

// Entries read from the crt.sh answer before truncation kicks in.
const MAX_CERTIFICATES: usize = 100;

#[derive(Debug, Deserialize)]
struct CrtShEntry {
    name_value: String,
}

/// Queries the crt.sh certificate transparency index for the target's
/// registrable domain and returns the deduplicated set of hostnames seen
/// in certificate SANs. Wildcard entries and names outside the domain are
/// dropped.
pub async fn run_cert_transparency(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    let domain = host.etld_plus_one.as_str();
    info!(domain, "Starting certificate transparency lookup.");
    ctx.outbound_slot().await?;

    let client = http_client(ctx.config)?;
    let url = format!("https://crt.sh/?q=%.{domain}&output=json");
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProbeError::Network(format!("crt.sh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ProbeError::Protocol(format!(
            "crt.sh answered with status {status}"
        )));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProbeError::Network(format!("crt.sh response read failed: {e}")))?;
    let entries: Vec<CrtShEntry> = serde_json::from_str(&body)
        .map_err(|e| ProbeError::Protocol(format!("crt.sh answer was not valid JSON: {e}")))?;

    debug!(domain, certificates = entries.len(), "Parsed crt.sh answer.");
    let data = collect_hostnames(domain, &entries);

    let summary = bound_summary(&format!(
        "{} unique hostnames in certificate transparency logs for {}{}",
        data.hostnames.len(),
        domain,
        if data.truncated { " (truncated)" } else { "" },
    ));

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(domain, hostnames = %data.hostnames.len(), "Certificate transparency lookup finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::CertTransparency(data),
        raw_output,
        findings: Vec::new(),
    })
}

fn collect_hostnames(domain: &str, entries: &[CrtShEntry]) -> CertTransparencyData {
    let truncated = entries.len() > MAX_CERTIFICATES;
    let mut hostnames = BTreeSet::new();

    for entry in entries.iter().take(MAX_CERTIFICATES) {
        for name in entry.name_value.lines() {
            let cleaned = name.trim().to_ascii_lowercase();
            // Wildcard SANs name no concrete host.
            if cleaned.is_empty() || cleaned.contains('*') {
                continue;
            }
            if validator::is_subdomain_of(&cleaned, domain) {
                hostnames.insert(cleaned);
            }
        }
    }

    CertTransparencyData {
        domain: domain.to_string(),
        hostnames: hostnames.into_iter().collect(),
        truncated,
    }
}
