use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::Overlap;

// ── Resolution metrics ──────────────────────────────────────────

/// Counter: commits attempted. Labels: outcome.
pub const RESOLUTIONS_TOTAL: &str = "blockplan_resolutions_total";

/// Counter: overlapping existing blocks seen by the resolver. Labels: case.
pub const OVERLAPS_TOTAL: &str = "blockplan_overlaps_total";

/// Counter: plan operations dispatched. Labels: kind.
pub const PLAN_OPERATIONS_TOTAL: &str = "blockplan_plan_operations_total";

/// Counter: plan operations the store rejected. Labels: kind.
pub const PLAN_OPERATION_FAILURES_TOTAL: &str = "blockplan_plan_operation_failures_total";

/// Histogram: full commit latency (re-fetch, resolve, apply) in seconds.
pub const COMMIT_DURATION_SECONDS: &str = "blockplan_commit_duration_seconds";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "blockplan_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "blockplan_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map an overlap case to a short label for metrics.
pub fn overlap_label(case: Overlap) -> &'static str {
    match case {
        Overlap::FullCover => "full_cover",
        Overlap::StrictContainment => "strict_containment",
        Overlap::TrimTail => "trim_tail",
        Overlap::TrimHead => "trim_head",
    }
}
