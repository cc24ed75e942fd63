//! Signaling messages exchanged between the two participants of a session

use crate::domain::invitation::CallInvitation;
use crate::domain::media::{IceCandidate, ProviderKind, SessionDescription};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, InvitationId, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signaling message type; serialized with the real-time channel event names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalingType {
    #[serde(rename = "call-invite")]
    Invite,
    #[serde(rename = "call-accept")]
    Accept,
    #[serde(rename = "call-decline")]
    Decline,
    #[serde(rename = "call-end")]
    End,
    #[serde(rename = "call-offer")]
    Offer,
    #[serde(rename = "call-answer")]
    Answer,
    #[serde(rename = "call-ice-candidate")]
    IceCandidate,
}

impl SignalingType {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingType::Invite => "call-invite",
            SignalingType::Accept => "call-accept",
            SignalingType::Decline => "call-decline",
            SignalingType::End => "call-end",
            SignalingType::Offer => "call-offer",
            SignalingType::Answer => "call-answer",
            SignalingType::IceCandidate => "call-ice-candidate",
        }
    }
}

impl fmt::Display for SignalingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Session-scoped signaling message. Transient: never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "event")]
    pub kind: SignalingType,
    pub sender_id: UserId,
    pub recipient_id: UserId,
    pub session_id: SessionId,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Payload of `call-invite`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitePayload {
    pub invitation_id: InvitationId,
    pub call_id: CallId,
    pub conversation_id: String,
    pub caller_name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub provider_payload: serde_json::Value,
}

/// Payload of `call-end` and `call-decline`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SignalingMessage {
    pub fn new(
        kind: SignalingType,
        sender_id: UserId,
        recipient_id: UserId,
        session_id: SessionId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            sender_id,
            recipient_id,
            session_id,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Build the invite for an invitation (also used to replay missed invites)
    pub fn invite(invitation: &CallInvitation, provider: ProviderKind) -> Self {
        let payload = InvitePayload {
            invitation_id: invitation.id,
            call_id: invitation.call_id,
            conversation_id: invitation.conversation_id.clone(),
            caller_name: invitation.caller_name.clone(),
            provider,
            provider_payload: invitation.provider_payload.clone(),
        };

        Self::new(
            SignalingType::Invite,
            invitation.caller_id.clone(),
            invitation.recipient_id.clone(),
            invitation.session_id,
            serde_json::to_value(payload).unwrap_or_default(),
        )
    }

    pub fn description(
        sender_id: UserId,
        recipient_id: UserId,
        session_id: SessionId,
        description: &SessionDescription,
    ) -> Self {
        let kind = match description.sdp_type {
            crate::domain::media::SdpType::Offer => SignalingType::Offer,
            crate::domain::media::SdpType::Answer => SignalingType::Answer,
        };
        Self::new(
            kind,
            sender_id,
            recipient_id,
            session_id,
            serde_json::to_value(description).unwrap_or_default(),
        )
    }

    pub fn candidate(
        sender_id: UserId,
        recipient_id: UserId,
        session_id: SessionId,
        candidate: &IceCandidate,
    ) -> Self {
        Self::new(
            SignalingType::IceCandidate,
            sender_id,
            recipient_id,
            session_id,
            serde_json::to_value(candidate).unwrap_or_default(),
        )
    }

    pub fn control(
        kind: SignalingType,
        sender_id: UserId,
        recipient_id: UserId,
        session_id: SessionId,
        reason: Option<&str>,
    ) -> Self {
        let payload = EndPayload {
            reason: reason.map(str::to_string),
        };
        Self::new(
            kind,
            sender_id,
            recipient_id,
            session_id,
            serde_json::to_value(payload).unwrap_or_default(),
        )
    }

    /// Decode the payload into its typed form
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            DomainError::Validation(format!("invalid {} payload: {}", self.kind, e))
        })
    }
}
