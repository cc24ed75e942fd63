//! API Router configuration

use super::invitation_handler::{
    close_session, create_invitation, get_invitation, health_check, list_active_invitations,
    list_invitations, update_invitation, AppState,
};
use super::metrics_handler::metrics_handler;
use super::rooms::room_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    let health_routes = Router::new().route("/health", get(health_check));

    // Invitation persistence
    let invitation_routes = Router::new()
        .route("/invitations", post(create_invitation).get(list_invitations))
        .route("/invitations/active", get(list_active_invitations))
        .route("/invitations/:id", get(get_invitation).patch(update_invitation))
        .route("/sessions/:session_id/close", post(close_session));

    // Real-time signaling rooms
    let room_routes = Router::new().route("/rooms/:user_id", get(room_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(invitation_routes)
        .merge(room_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
