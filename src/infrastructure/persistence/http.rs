//! Invitation store client for the `/invitations` HTTP API

use crate::domain::invitation::{
    CallInvitation, InvitationStatus, InvitationStore, NewInvitation, StatusChange,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{InvitationId, SessionId, UserId};
use crate::interface::api::invitation_dto::{
    error_from_response, ApiResponse, InvitationListResponse, UpdateInvitationRequest,
    UpdateInvitationResponse,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Invitation store that delegates to a remote invitation service
pub struct HttpInvitationStore {
    client: Client,
    base_url: String,
}

impl HttpInvitationStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<Option<T>> {
        let status = response.status();
        let body: ApiResponse<T> = response.json().await.map_err(|e| {
            warn!("Invalid invitation service response ({}): {}", status, e);
            DomainError::Unavailable(format!("invalid response from invitation service: {e}"))
        })?;

        if status.is_success() && body.success {
            Ok(body.data)
        } else {
            Err(error_from_response(
                status.as_u16(),
                body.code.as_deref(),
                body.error.unwrap_or_else(|| status.to_string()),
            ))
        }
    }

    async fn decode_required<T: DeserializeOwned>(response: Response) -> Result<T> {
        Self::decode(response)
            .await?
            .ok_or_else(|| DomainError::Unavailable("empty response from invitation service".to_string()))
    }
}

fn transport_error(e: reqwest::Error) -> DomainError {
    warn!("Invitation service request failed: {}", e);
    DomainError::Unavailable(format!("invitation service unreachable: {e}"))
}

#[async_trait]
impl InvitationStore for HttpInvitationStore {
    async fn create(&self, invitation: NewInvitation) -> Result<CallInvitation> {
        debug!(session_id = %invitation.session_id, "POST /invitations");
        let response = self
            .client
            .post(self.url("/invitations"))
            .json(&invitation)
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode_required(response).await
    }

    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let response = self
            .client
            .get(self.url("/invitations"))
            .query(&[("userId", user_id.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let list: InvitationListResponse = Self::decode_required(response).await?;
        Ok(list.invitations)
    }

    async fn list_active(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let response = self
            .client
            .get(self.url("/invitations/active"))
            .query(&[("userId", user_id.as_str())])
            .send()
            .await
            .map_err(transport_error)?;
        let list: InvitationListResponse = Self::decode_required(response).await?;
        Ok(list.invitations)
    }

    async fn get(&self, id: &InvitationId) -> Result<Option<CallInvitation>> {
        let response = self
            .client
            .get(self.url(&format!("/invitations/{id}")))
            .send()
            .await
            .map_err(transport_error)?;

        match Self::decode(response).await {
            Ok(invitation) => Ok(invitation),
            Err(DomainError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn update_status(&self, id: &InvitationId, status: InvitationStatus) -> Result<StatusChange> {
        debug!(invitation_id = %id, "PATCH /invitations/{{id}} -> {}", status);
        let response = self
            .client
            .patch(self.url(&format!("/invitations/{id}")))
            .json(&UpdateInvitationRequest { status })
            .send()
            .await
            .map_err(transport_error)?;
        let body: UpdateInvitationResponse = Self::decode_required(response).await?;
        Ok(body.change.into())
    }

    async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/sessions/{session_id}/close")))
            .send()
            .await
            .map_err(transport_error)?;
        Self::decode::<serde_json::Value>(response).await?;
        Ok(())
    }
}
