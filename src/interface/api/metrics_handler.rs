//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe the call metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!("calls_started_total", "Calls that reached Connected");
    describe_counter!("calls_ended_total", "Call sessions that ended, by reason");
    describe_gauge!("active_call_sessions", "Call sessions not yet ended");
    describe_counter!(
        "compliance_notifications_total",
        "Compliance notifications, by delivery outcome"
    );
    describe_counter!(
        "signaling_messages_dropped_total",
        "Signaling messages dropped because the recipient was offline"
    );

    Ok(handle)
}

/// Prometheus handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}
