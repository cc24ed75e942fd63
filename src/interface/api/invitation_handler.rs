//! Invitation API handlers

use super::invitation_dto::{
    status_for, ApiResponse, InvitationListResponse, ListInvitationsQuery, UpdateInvitationRequest,
    UpdateInvitationResponse,
};
use crate::domain::invitation::{CallInvitation, InvitationStore, NewInvitation};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{InvitationId, SessionId, UserId};
use crate::infrastructure::signaling::SignalingBus;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn InvitationStore>,
    pub bus: SignalingBus,
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn failure<T>(e: DomainError) -> ApiResult<T> {
    let status = status_for(&e);
    if status.is_server_error() {
        error!("API: {}", e);
    }
    (status, Json(ApiResponse::error(&e)))
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, DomainError> {
    raw.parse()
        .map_err(|_| DomainError::Validation(format!("invalid {what}: {raw}")))
}

/// Create a pending invitation
pub async fn create_invitation(
    State(state): State<AppState>,
    Json(req): Json<NewInvitation>,
) -> ApiResult<CallInvitation> {
    info!(
        "API: Creating invitation {} -> {} (session {})",
        req.caller_id, req.recipient_id, req.session_id
    );

    match state.store.create(req).await {
        Ok(invitation) => (StatusCode::CREATED, Json(ApiResponse::success(invitation))),
        Err(e) => failure(e),
    }
}

/// Pending invitations of a user
pub async fn list_invitations(
    State(state): State<AppState>,
    Query(query): Query<ListInvitationsQuery>,
) -> ApiResult<InvitationListResponse> {
    let user_id = UserId::new(query.user_id);
    match state.store.list_pending(&user_id).await {
        Ok(invitations) => {
            let total = invitations.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(InvitationListResponse { invitations, total })),
            )
        }
        Err(e) => failure(e),
    }
}

/// Accepted invitations whose session is still open
pub async fn list_active_invitations(
    State(state): State<AppState>,
    Query(query): Query<ListInvitationsQuery>,
) -> ApiResult<InvitationListResponse> {
    let user_id = UserId::new(query.user_id);
    match state.store.list_active(&user_id).await {
        Ok(invitations) => {
            let total = invitations.len();
            (
                StatusCode::OK,
                Json(ApiResponse::success(InvitationListResponse { invitations, total })),
            )
        }
        Err(e) => failure(e),
    }
}

pub async fn get_invitation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<CallInvitation> {
    let id: InvitationId = match parse_id(&id, "invitation id") {
        Ok(id) => id,
        Err(e) => return failure(e),
    };

    match state.store.get(&id).await {
        Ok(Some(invitation)) => (StatusCode::OK, Json(ApiResponse::success(invitation))),
        Ok(None) => failure(DomainError::NotFound(format!("invitation {id}"))),
        Err(e) => failure(e),
    }
}

/// Move an invitation to a new status
pub async fn update_invitation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateInvitationRequest>,
) -> ApiResult<UpdateInvitationResponse> {
    let id: InvitationId = match parse_id(&id, "invitation id") {
        Ok(id) => id,
        Err(e) => return failure(e),
    };
    info!("API: Updating invitation {} -> {}", id, req.status);

    match state.store.update_status(&id, req.status).await {
        Ok(change) => (
            StatusCode::OK,
            Json(ApiResponse::success(UpdateInvitationResponse {
                change: change.into(),
            })),
        ),
        Err(e) => failure(e),
    }
}

/// Record that a session ended
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> ApiResult<&'static str> {
    let session_id: SessionId = match parse_id(&session_id, "session id") {
        Ok(id) => id,
        Err(e) => return failure(e),
    };

    match state.store.close_session(&session_id).await {
        Ok(()) => (StatusCode::OK, Json(ApiResponse::success("closed"))),
        Err(e) => failure(e),
    }
}

/// Health check
pub async fn health_check(State(state): State<AppState>) -> ApiResult<&'static str> {
    if state.bus.is_closed() {
        return failure(DomainError::Unavailable("signaling bus is closed".to_string()));
    }
    (StatusCode::OK, Json(ApiResponse::success("OK")))
}
