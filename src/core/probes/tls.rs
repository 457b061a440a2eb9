// src/core/probes/tls.rs

use chrono::{DateTime, Utc};
use native_tls::TlsConnector;
use std::net::TcpStream;
use tokio::task::spawn_blocking;
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::core::models::{
    AnalysisFinding, CertificateInfo, ProbeData, ProbeReport, Severity, TlsData, ValidatedHost,
};
use crate::core::probes::{bound_summary, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

const EXPIRY_WARNING_DAYS: i64 = 30;

/// Connects to port 443, captures the leaf certificate and assesses its
/// validity window. Failure to obtain or parse the certificate fails the
/// whole probe.
pub async fn run_tls_check(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    info!(host = %host.normalized_host, "Starting TLS check.");
    ctx.outbound_slot().await?;

    let target = host.normalized_host.clone();
    debug!("Spawning blocking task for TLS handshake.");
    let data = ctx
        .limiter
        .with_timeout(async move {
            spawn_blocking(move || fetch_leaf_certificate(&target))
                .await
                .map_err(|e| ProbeError::Network(format!("TLS task failed: {e}")))?
        })
        .await?;

    let findings = analyze_certificate(&data);
    let summary = bound_summary(&format!(
        "subject={}; issuer={}; expires={} ({} days)",
        data.certificate_info.subject_name,
        data.certificate_info.issuer_name,
        data.certificate_info.not_after.format("%Y-%m-%d"),
        data.certificate_info.days_until_expiry,
    ));

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(findings = %findings.len(), "TLS check finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::Tls(data),
        raw_output,
        findings,
    })
}

fn fetch_leaf_certificate(target: &str) -> Result<TlsData, ProbeError> {
    debug!(target, "Performing TLS connection and handshake.");

    let connector = TlsConnector::new()
        .map_err(|e| ProbeError::Protocol(format!("TlsConnector error: {e}")))?;

    debug!(target, "Connecting TCP stream to port 443.");
    let stream = TcpStream::connect((target, 443))
        .map_err(|e| ProbeError::Network(format!("TCP connection error: {e}")))?;

    debug!(target, "Performing TLS handshake.");
    let stream = connector
        .connect(target, stream)
        .map_err(|e| ProbeError::Protocol(format!("TLS handshake error: {e}")))?;

    let cert = stream
        .peer_certificate()
        .map_err(|e| ProbeError::Protocol(format!("could not get peer certificate: {e}")))?
        .ok_or_else(|| ProbeError::Protocol("server presented no certificate".to_string()))?;

    let cert_der = cert
        .to_der()
        .map_err(|e| ProbeError::Protocol(format!("could not convert certificate to DER: {e}")))?;

    let (_, x509) = parse_x509_certificate(&cert_der)
        .map_err(|e| ProbeError::Protocol(format!("X.509 parse error: {e}")))?;

    info!(subject = %x509.subject(), issuer = %x509.issuer(), "Parsed leaf certificate.");

    let validity = x509.validity();
    let not_before = asn1_time_to_chrono_utc(&validity.not_before);
    let not_after = asn1_time_to_chrono_utc(&validity.not_after);
    let now = Utc::now();
    let days_until_expiry = not_after.signed_duration_since(now).num_days();
    let is_valid = now > not_before && now < not_after;

    Ok(TlsData {
        is_valid,
        certificate_info: CertificateInfo {
            subject_name: x509.subject().to_string(),
            issuer_name: x509.issuer().to_string(),
            not_before,
            not_after,
            days_until_expiry,
        },
    })
}

fn asn1_time_to_chrono_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}

fn analyze_certificate(data: &TlsData) -> Vec<AnalysisFinding> {
    debug!("Analyzing certificate validity window.");
    let mut analyses = Vec::new();

    let info = &data.certificate_info;
    if info.days_until_expiry < 0 {
        debug!(expiry_date = %info.not_after, "Certificate is expired.");
        analyses.push(AnalysisFinding::new(Severity::Critical, "TLS_EXPIRED"));
    } else if !data.is_valid {
        debug!(not_before = %info.not_before, "Certificate is not yet valid.");
        analyses.push(AnalysisFinding::new(Severity::Warning, "TLS_NOT_YET_VALID"));
    }

    if (0..=EXPIRY_WARNING_DAYS).contains(&info.days_until_expiry) {
        debug!(days_left = info.days_until_expiry, "Certificate expiring soon.");
        analyses.push(AnalysisFinding::new(Severity::Warning, "TLS_EXPIRING_SOON"));
    }

    analyses
}
