// src/core/lifecycle.rs

use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::core::models::{ProbeKind, ProbeReport, RunRecord, RunStatus};
use crate::core::probes::{self, ProbeContext};
use crate::core::rate_limit::RateLimiter;
use crate::core::redaction;
use crate::core::scope::ScopeGuard;
use crate::error::{ProbeError, StoreError};

/// One unit of work handed to the pipeline: which probe to run against
/// which target, under which authorization.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub run_id: String,
    pub target: String,
    pub probe: String,
    pub approved_domains: Vec<String>,
}

/// Cooperative cancellation handle. Clones observe the same flag, so the
/// caller keeps one clone and hands another to the pipeline.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Which console stream a piece of evidence belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum EvidenceStream {
    #[strum(serialize = "stdout")]
    Stdout,
    #[strum(serialize = "stderr")]
    Stderr,
}

/// Persistence seam for run state. Status transitions are pushed as they
/// happen; the terminal record is pushed exactly once at the end.
pub trait RunStore {
    fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn record(&self, record: &RunRecord) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Persistence seam for probe evidence. Content arriving here has already
/// passed redaction.
pub trait EvidenceStore {
    fn append(
        &self,
        run_id: &str,
        stream: EvidenceStream,
        content: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Run store that prints transitions and the terminal record to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleRunStore;

impl RunStore for ConsoleRunStore {
    async fn update_status(&self, run_id: &str, status: RunStatus) -> Result<(), StoreError> {
        println!("[{run_id}] {status}");
        Ok(())
    }

    async fn record(&self, record: &RunRecord) -> Result<(), StoreError> {
        println!("{}", serde_json::to_string_pretty(record)?);
        Ok(())
    }
}

/// Evidence store that forwards each entry to the matching console stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleEvidenceStore;

impl EvidenceStore for ConsoleEvidenceStore {
    async fn append(
        &self,
        run_id: &str,
        stream: EvidenceStream,
        content: &str,
    ) -> Result<(), StoreError> {
        match stream {
            EvidenceStream::Stdout => println!("[{run_id}] {content}"),
            EvidenceStream::Stderr => eprintln!("[{run_id}] {content}"),
        }
        Ok(())
    }
}

/// Drives a work item through its full lifecycle: admission, execution
/// under pacing and timeout, evidence capture and the terminal record.
pub struct Pipeline<S: RunStore, E: EvidenceStore> {
    config: PipelineConfig,
    limiter: RateLimiter,
    scope: ScopeGuard,
    cancel: CancelFlag,
    run_store: S,
    evidence: E,
}

impl<S: RunStore, E: EvidenceStore> Pipeline<S, E> {
    pub fn new(config: PipelineConfig, run_store: S, evidence: E) -> Self {
        Self {
            limiter: RateLimiter::new(config.clone()),
            config,
            scope: ScopeGuard::new(),
            cancel: CancelFlag::new(),
            run_store,
            evidence,
        }
    }

    /// A clone of the cancel flag, for wiring into signal handlers.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Processes one work item start to finish and returns its terminal
    /// record. Store failures are the only errors that escape; everything
    /// that goes wrong with the run itself ends up inside the record.
    pub async fn process(&self, item: WorkItem) -> Result<RunRecord, StoreError> {
        info!(run_id = %item.run_id, target = %item.target, probe = %item.probe, "Accepted work item.");

        let Ok(probe) = ProbeKind::from_str(&item.probe) else {
            warn!(run_id = %item.run_id, probe = %item.probe, "Unknown probe requested.");
            let record = self.prestart_record(
                &item,
                RunStatus::Failed,
                Some(format!("unknown probe: {}", item.probe)),
            );
            self.run_store.record(&record).await?;
            return Ok(record);
        };

        self.run_store
            .update_status(&item.run_id, RunStatus::Queued)
            .await?;

        if self.cancel.is_cancelled() {
            info!(run_id = %item.run_id, "Cancelled before admission.");
            let record = self.prestart_record(&item, RunStatus::Cancelled, None);
            self.run_store.record(&record).await?;
            return Ok(record);
        }

        // Admission: validation failures terminate the run without ever
        // consuming an execution slot or counting a request.
        let host = match self
            .scope
            .validate_target(&item.target, &item.approved_domains)
            .await
        {
            Ok(host) => host,
            Err(e) => {
                warn!(run_id = %item.run_id, error = %e, "Target rejected.");
                let (message, _) = redaction::redact(&e.to_string());
                self.evidence
                    .append(&item.run_id, EvidenceStream::Stderr, &message)
                    .await?;
                let record = self.prestart_record(&item, RunStatus::Failed, Some(message));
                self.run_store.record(&record).await?;
                return Ok(record);
            }
        };

        self.limiter.reset_run_state(&item.run_id).await;
        self.limiter.wait_for_execution_slot().await;

        let started_at = Utc::now();
        if let Err(e) = self
            .run_store
            .update_status(&item.run_id, RunStatus::Running)
            .await
        {
            self.limiter.release_execution_slot();
            return Err(e);
        }

        let ctx = ProbeContext {
            run_id: &item.run_id,
            limiter: &self.limiter,
            cancel: &self.cancel,
            config: &self.config,
        };
        let outcome = self
            .limiter
            .with_timeout(probes::dispatch(&ctx, probe, &host))
            .await;
        self.limiter.release_execution_slot();

        let (status, result_summary, error) = match &outcome {
            Ok(report) => {
                self.store_report(&item.run_id, report).await?;
                (RunStatus::Completed, Some(report.summary.clone()), None)
            }
            Err(ProbeError::Timeout { elapsed }) => {
                warn!(run_id = %item.run_id, ?elapsed, "Probe timed out.");
                (
                    RunStatus::Timeout,
                    None,
                    Some(format!("probe timed out after {} ms", elapsed.as_millis())),
                )
            }
            Err(ProbeError::Cancelled) => {
                info!(run_id = %item.run_id, "Probe cancelled.");
                (RunStatus::Cancelled, None, Some("run cancelled".to_string()))
            }
            Err(e) => {
                error!(run_id = %item.run_id, error = %e, "Probe failed.");
                let (message, _) = redaction::redact(&e.to_string());
                self.evidence
                    .append(&item.run_id, EvidenceStream::Stderr, &message)
                    .await?;
                (RunStatus::Failed, None, Some(message))
            }
        };

        let finished_at = Utc::now();
        let record = RunRecord {
            run_id: item.run_id.clone(),
            target: item.target.clone(),
            probe: item.probe.clone(),
            status,
            exit_code: if status == RunStatus::Completed { 0 } else { 1 },
            result_summary,
            error,
            request_count: self.limiter.request_count(&item.run_id).await,
            started_at: Some(started_at),
            finished_at,
            duration_ms: Some((finished_at - started_at).num_milliseconds()),
        };

        info!(run_id = %record.run_id, status = %record.status, "Run finished.");
        self.run_store.record(&record).await?;
        Ok(record)
    }

    /// Pushes a finished probe's evidence to the stdout stream. Probes
    /// redact their raw output; the pass here keeps the storage boundary
    /// closed no matter what the assembled text contains.
    async fn store_report(&self, run_id: &str, report: &ProbeReport) -> Result<(), StoreError> {
        let mut content = report.summary.clone();
        for finding in &report.findings {
            content.push_str(&format!("\nfinding[{}]: {}", finding.severity, finding.code));
        }
        content.push('\n');
        content.push_str(&report.raw_output);

        let (content, hits) = redaction::redact(&content);
        if hits > 0 {
            debug!(run_id, hits, "Redaction matched inside assembled evidence.");
        }
        self.evidence
            .append(run_id, EvidenceStream::Stdout, &content)
            .await
    }

    /// Terminal record for a run that never reached RUNNING.
    fn prestart_record(
        &self,
        item: &WorkItem,
        status: RunStatus,
        error: Option<String>,
    ) -> RunRecord {
        RunRecord {
            run_id: item.run_id.clone(),
            target: item.target.clone(),
            probe: item.probe.clone(),
            status,
            exit_code: 1,
            result_summary: None,
            error,
            request_count: 0,
            started_at: None,
            finished_at: Utc::now(),
            duration_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryRunStore {
        statuses: Mutex<Vec<RunStatus>>,
        records: Mutex<Vec<RunRecord>>,
    }

    impl RunStore for &MemoryRunStore {
        async fn update_status(&self, _run_id: &str, status: RunStatus) -> Result<(), StoreError> {
            self.statuses.lock().unwrap().push(status);
            Ok(())
        }

        async fn record(&self, record: &RunRecord) -> Result<(), StoreError> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryEvidenceStore {
        entries: Mutex<Vec<(EvidenceStream, String)>>,
    }

    impl EvidenceStore for &MemoryEvidenceStore {
        async fn append(
            &self,
            _run_id: &str,
            stream: EvidenceStream,
            content: &str,
        ) -> Result<(), StoreError> {
            self.entries.lock().unwrap().push((stream, content.to_string()));
            Ok(())
        }
    }

    fn item(target: &str, probe: &str) -> WorkItem {
        WorkItem {
            run_id: "run-1".to_string(),
            target: target.to_string(),
            probe: probe.to_string(),
            approved_domains: vec!["example.com".to_string()],
        }
    }

    #[tokio::test]
    async fn unknown_probe_fails_before_queueing() {
        let store = MemoryRunStore::default();
        let evidence = MemoryEvidenceStore::default();
        let pipeline = Pipeline::new(PipelineConfig::default(), &store, &evidence);

        let record = pipeline.process(item("example.com", "PORT_SCAN")).await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.exit_code, 1);
        assert_eq!(record.error.as_deref(), Some("unknown probe: PORT_SCAN"));
        assert!(store.statuses.lock().unwrap().is_empty());
        assert_eq!(store.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_target_fails_without_starting() {
        let store = MemoryRunStore::default();
        let evidence = MemoryEvidenceStore::default();
        let pipeline = Pipeline::new(PipelineConfig::default(), &store, &evidence);

        let record = pipeline.process(item("localhost", "TLS_CHECK")).await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.request_count, 0);
        assert_eq!(record.started_at, None);
        assert_eq!(record.duration_ms, None);
        // Queued was announced, Running never was.
        assert_eq!(*store.statuses.lock().unwrap(), vec![RunStatus::Queued]);

        let entries = evidence.entries.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, EvidenceStream::Stderr);
    }

    #[tokio::test]
    async fn out_of_scope_target_fails_closed() {
        let store = MemoryRunStore::default();
        let evidence = MemoryEvidenceStore::default();
        let pipeline = Pipeline::new(PipelineConfig::default(), &store, &evidence);

        let mut work = item("api.other.org", "DNS_LOOKUP");
        work.approved_domains = vec!["example.com".to_string()];
        let record = pipeline.process(work).await.unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.contains("api.other.org"), "{error}");
    }

    #[tokio::test]
    async fn cancellation_before_admission_short_circuits() {
        let store = MemoryRunStore::default();
        let evidence = MemoryEvidenceStore::default();
        let pipeline = Pipeline::new(PipelineConfig::default(), &store, &evidence);
        pipeline.cancel_handle().cancel();

        let record = pipeline.process(item("example.com", "TLS_CHECK")).await.unwrap();

        assert_eq!(record.status, RunStatus::Cancelled);
        assert_eq!(record.started_at, None);
        assert!(evidence.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancel_flag_clones_share_state() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }
}
