// src/core/probes/dns.rs

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::proto::rr::RecordType;
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

use crate::core::models::{
    AnalysisFinding, DnsData, ProbeData, ProbeReport, ScanResult, Severity, ValidatedHost,
};
use crate::core::probes::{bound_summary, ProbeContext};
use crate::core::redaction;
use crate::error::ProbeError;

/// Queries A, AAAA, CNAME, MX, TXT and NS records independently, one
/// rate-limit slot per type. A failed lookup of one type is recorded in
/// its sub-result and does not fail the probe; the probe only fails when
/// every lookup errors.
pub async fn run_dns_lookup(
    ctx: &ProbeContext<'_>,
    host: &ValidatedHost,
) -> Result<ProbeReport, ProbeError> {
    let target = host.normalized_host.as_str();
    info!(target, "Starting DNS lookup.");

    let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());

    // Sequential on purpose: each lookup takes its own pacing slot and
    // passes the cancel checkpoint.
    ctx.outbound_slot().await?;
    let a = lookup_records(&resolver, target, RecordType::A).await;
    ctx.outbound_slot().await?;
    let aaaa = lookup_records(&resolver, target, RecordType::AAAA).await;
    ctx.outbound_slot().await?;
    let cname = lookup_records(&resolver, target, RecordType::CNAME).await;
    ctx.outbound_slot().await?;
    let mx = lookup_records(&resolver, target, RecordType::MX).await;
    ctx.outbound_slot().await?;
    let txt = lookup_records(&resolver, target, RecordType::TXT).await;
    ctx.outbound_slot().await?;
    let ns = lookup_records(&resolver, target, RecordType::NS).await;

    let data = DnsData {
        a,
        aaaa,
        cname,
        mx,
        txt,
        ns,
    };

    let failures = [&data.a, &data.aaaa, &data.cname, &data.mx, &data.txt, &data.ns]
        .iter()
        .filter(|r| r.is_err())
        .count();
    if failures == 6 {
        warn!(target, "Every DNS lookup failed.");
        return Err(ProbeError::Network("all DNS lookups failed".to_string()));
    }

    let findings = analyze_dns(&data);
    let summary = bound_summary(&format!(
        "DNS records for {}: A={} AAAA={} CNAME={} MX={} TXT={} NS={}",
        target,
        record_count(&data.a),
        record_count(&data.aaaa),
        record_count(&data.cname),
        record_count(&data.mx),
        record_count(&data.txt),
        record_count(&data.ns),
    ));

    let raw = serde_json::to_string_pretty(&data)
        .map_err(|e| ProbeError::Protocol(format!("serialization failed: {e}")))?;
    let (raw_output, _) = redaction::redact(&raw);

    info!(target, findings = %findings.len(), "DNS lookup finished.");
    Ok(ProbeReport {
        summary,
        data: ProbeData::Dns(data),
        raw_output,
        findings,
    })
}

async fn lookup_records(
    resolver: &TokioAsyncResolver,
    target: &str,
    record_type: RecordType,
) -> ScanResult<Vec<String>> {
    debug!(target, %record_type, "Looking up records.");
    match resolver.lookup(target, record_type).await {
        Ok(lookup) => {
            let records: Vec<String> = lookup.iter().map(|r| r.to_string()).collect();
            if records.is_empty() {
                debug!(target, %record_type, "No records found.");
                Ok(None)
            } else {
                debug!(target, %record_type, count = records.len(), "Records found.");
                Ok(Some(records))
            }
        }
        Err(e) => match e.kind() {
            ResolveErrorKind::NoRecordsFound { .. } => {
                debug!(target, %record_type, "No records found.");
                Ok(None)
            }
            _ => {
                warn!(target, %record_type, error = %e, "Lookup failed.");
                Err(format!("DNS Error: {e}"))
            }
        },
    }
}

fn record_count(result: &ScanResult<Vec<String>>) -> usize {
    match result {
        Ok(Some(records)) => records.len(),
        _ => 0,
    }
}

fn analyze_dns(data: &DnsData) -> Vec<AnalysisFinding> {
    let mut analyses = Vec::new();
    if matches!(data.a, Ok(None)) && matches!(data.aaaa, Ok(None)) {
        debug!("No address records in either family.");
        analyses.push(AnalysisFinding::new(Severity::Info, "DNS_NO_ADDRESS_RECORDS"));
    }
    analyses
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counts_only_successful_lookups() {
        assert_eq!(record_count(&Ok(Some(vec!["a".into(), "b".into()]))), 2);
        assert_eq!(record_count(&Ok(None)), 0);
        assert_eq!(record_count(&Err("boom".into())), 0);
    }

    #[test]
    fn missing_address_records_are_flagged() {
        let data = DnsData {
            txt: Ok(Some(vec!["v=spf1 -all".into()])),
            ..DnsData::default()
        };
        let findings = analyze_dns(&data);
        assert_eq!(
            findings,
            vec![AnalysisFinding::new(Severity::Info, "DNS_NO_ADDRESS_RECORDS")]
        );
    }

    #[test]
    fn address_records_suppress_the_finding() {
        let data = DnsData {
            a: Ok(Some(vec!["93.184.216.34".into()])),
            ..DnsData::default()
        };
        assert_eq!(analyze_dns(&data), vec![]);
    }
}
