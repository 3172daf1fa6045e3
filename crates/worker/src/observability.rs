use std::net::SocketAddr;

use anyhow::Result;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use voluntra_domain::retention::RetentionReport;
use voluntra_domain::triggers::DispatchOutcome;

const JOBS_PROCESSED_TOTAL: &str = "voluntra_worker_jobs_processed_total";
const JOBS_PROCESSING_DURATION_MS: &str = "voluntra_worker_job_processing_duration_ms";
const QUEUE_LAG_GAUGE: &str = "voluntra_worker_queue_lag_ms";
const TRIGGERS_TOTAL: &str = "voluntra_worker_triggers_total";
const RETENTION_MESSAGES_DELETED_TOTAL: &str = "voluntra_worker_retention_messages_deleted_total";
const RETENTION_ROOMS_FAILED_TOTAL: &str = "voluntra_worker_retention_rooms_failed_total";

/// Serves `/metrics` for the worker on `listen`.
pub fn init_metrics(listen: SocketAddr) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()?;
    Ok(())
}

pub fn register_job_processed(job_type: &str, result: &str, duration_ms: f64) {
    counter!(
        JOBS_PROCESSED_TOTAL,
        "job_type" => job_type.to_string(),
        "result" => result.to_string()
    )
    .increment(1);

    histogram!(
        JOBS_PROCESSING_DURATION_MS,
        "job_type" => job_type.to_string()
    )
    .record(duration_ms);
}

pub fn set_queue_lag_ms(lag_ms: i64) {
    gauge!(QUEUE_LAG_GAUGE).set(lag_ms.max(0) as f64);
}

pub fn register_dispatch(outcome: &DispatchOutcome) {
    let (trigger, result) = match outcome {
        DispatchOutcome::Ignored => return,
        DispatchOutcome::Handled(kind) => (kind.as_str(), "success"),
        DispatchOutcome::Failed(kind, _) => (kind.as_str(), "error"),
    };
    counter!(
        TRIGGERS_TOTAL,
        "trigger" => trigger,
        "result" => result
    )
    .increment(1);
}

pub fn register_retention_report(report: &RetentionReport) {
    counter!(RETENTION_MESSAGES_DELETED_TOTAL).increment(report.messages_deleted as u64);
    counter!(RETENTION_ROOMS_FAILED_TOTAL).increment(report.rooms_failed as u64);
}
