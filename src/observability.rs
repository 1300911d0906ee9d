use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: scheduler operations. Labels: op, status.
pub const OPS_TOTAL: &str = "lotbook_ops_total";

/// Histogram: scheduler operation latency in seconds. Labels: op.
pub const OP_DURATION_SECONDS: &str = "lotbook_op_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Counter: transactions committed by a TxScope.
pub const TX_COMMITS_TOTAL: &str = "lotbook_tx_commits_total";

/// Counter: transactions rolled back after a latched error.
pub const TX_ROLLBACKS_TOTAL: &str = "lotbook_tx_rollbacks_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
