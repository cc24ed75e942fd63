//! Invitation API DTOs

use crate::domain::invitation::{CallInvitation, InvitationStatus, StatusChange};
use crate::domain::shared::error::DomainError;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Machine-readable error code (see `DomainError::code`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn error(err: &DomainError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            code: Some(err.code().to_string()),
        }
    }
}

/// HTTP status for a domain error
pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Conflict(_) | DomainError::InvalidTransition(_) => StatusCode::CONFLICT,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Rebuild a domain error from an API error body (used by HTTP clients)
pub fn error_from_response(status: u16, code: Option<&str>, message: String) -> DomainError {
    match code {
        Some("NOT_FOUND") => DomainError::NotFound(message),
        Some("CONFLICT") => DomainError::Conflict(message),
        Some("INVALID_TRANSITION") => DomainError::InvalidTransition(message),
        Some("VALIDATION_ERROR") => DomainError::Validation(message),
        Some("INTERNAL_ERROR") => DomainError::Internal(message),
        _ => match status {
            404 => DomainError::NotFound(message),
            409 => DomainError::Conflict(message),
            400 | 422 => DomainError::Validation(message),
            _ => DomainError::Unavailable(format!("HTTP {status}: {message}")),
        },
    }
}

/// `GET /invitations?userId=`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInvitationsQuery {
    pub user_id: String,
}

/// `PATCH /invitations/{id}`
#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateInvitationRequest {
    pub status: InvitationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeDto {
    Applied,
    Unchanged,
}

impl From<StatusChange> for ChangeDto {
    fn from(change: StatusChange) -> Self {
        match change {
            StatusChange::Applied => ChangeDto::Applied,
            StatusChange::Unchanged => ChangeDto::Unchanged,
        }
    }
}

impl From<ChangeDto> for StatusChange {
    fn from(change: ChangeDto) -> Self {
        match change {
            ChangeDto::Applied => StatusChange::Applied,
            ChangeDto::Unchanged => StatusChange::Unchanged,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateInvitationResponse {
    pub change: ChangeDto,
}

/// Invitation list response
#[derive(Debug, Serialize, Deserialize)]
pub struct InvitationListResponse {
    pub invitations: Vec<CallInvitation>,
    pub total: usize,
}
