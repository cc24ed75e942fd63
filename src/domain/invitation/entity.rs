//! Call invitation entity

use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, InvitationId, ParticipantPair, SessionId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default time-to-live of an invitation, in seconds (24h)
pub const DEFAULT_INVITATION_TTL_SECS: i64 = 86_400;

/// Default time-to-live of an invitation
pub fn default_ttl() -> Duration {
    Duration::seconds(DEFAULT_INVITATION_TTL_SECS)
}

/// Invitation status
///
/// `Pending` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvitationStatus {
    Pending,
    Accepted,
    Declined,
    Expired,
}

impl InvitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvitationStatus::Pending => "pending",
            InvitationStatus::Accepted => "accepted",
            InvitationStatus::Declined => "declined",
            InvitationStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvitationStatus::Pending)
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InvitationStatus::Pending),
            "accepted" => Ok(InvitationStatus::Accepted),
            "declined" => Ok(InvitationStatus::Declined),
            "expired" => Ok(InvitationStatus::Expired),
            other => Err(DomainError::Validation(format!(
                "unknown invitation status: {other}"
            ))),
        }
    }
}

/// Result of applying a status update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    /// The stored status changed
    Applied,
    /// The invitation already had the requested status
    Unchanged,
}

/// Data supplied by the caller when issuing an invitation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInvitation {
    pub conversation_id: String,
    pub caller_id: UserId,
    pub caller_name: String,
    pub recipient_id: UserId,
    pub session_id: SessionId,
    pub call_id: CallId,
    #[serde(default)]
    pub provider_payload: serde_json::Value,
}

/// A call invitation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallInvitation {
    pub id: InvitationId,
    pub conversation_id: String,
    pub caller_id: UserId,
    pub caller_name: String,
    pub recipient_id: UserId,
    pub session_id: SessionId,
    pub call_id: CallId,
    pub created_at: DateTime<Utc>,
    pub status: InvitationStatus,
    #[serde(default)]
    pub provider_payload: serde_json::Value,
    /// Set once the call session created from this invitation reached `Ended`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl CallInvitation {
    /// Create a pending invitation
    pub fn new(new: NewInvitation, created_at: DateTime<Utc>) -> Result<Self> {
        if new.caller_id == new.recipient_id {
            return Err(DomainError::Validation(
                "caller and recipient must differ".to_string(),
            ));
        }
        if new.caller_id.as_str().is_empty() || new.recipient_id.as_str().is_empty() {
            return Err(DomainError::Validation(
                "caller and recipient are required".to_string(),
            ));
        }

        Ok(Self {
            id: InvitationId::new(),
            conversation_id: new.conversation_id,
            caller_id: new.caller_id,
            caller_name: new.caller_name,
            recipient_id: new.recipient_id,
            session_id: new.session_id,
            call_id: new.call_id,
            created_at,
            status: InvitationStatus::Pending,
            provider_payload: new.provider_payload,
            closed_at: None,
        })
    }

    pub fn pair(&self) -> ParticipantPair {
        ParticipantPair::new(self.caller_id.clone(), self.recipient_id.clone())
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.caller_id == user || &self.recipient_id == user
    }

    /// Whether the TTL has elapsed, regardless of the stored status
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.created_at > ttl
    }

    /// Status with the TTL applied lazily
    pub fn effective_status(&self, now: DateTime<Utc>, ttl: Duration) -> InvitationStatus {
        if self.is_expired(now, ttl) {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    /// Whether this invitation still holds the pair's single active session slot
    pub fn holds_session(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.effective_status(now, ttl) {
            InvitationStatus::Pending | InvitationStatus::Accepted => self.closed_at.is_none(),
            InvitationStatus::Declined | InvitationStatus::Expired => false,
        }
    }

    /// Whether the callee can still answer this invitation
    pub fn is_open(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.effective_status(now, ttl) == InvitationStatus::Pending && self.closed_at.is_none()
    }

    /// Apply a status update.
    ///
    /// Idempotent for the current status; leaving a terminal status is an
    /// `InvalidTransition`.
    pub fn apply_status(
        &mut self,
        requested: InvitationStatus,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<StatusChange> {
        let current = self.effective_status(now, ttl);

        if current == requested {
            if self.status != current {
                // materialise a lazily expired status
                self.status = current;
            }
            return Ok(StatusChange::Unchanged);
        }

        if current.is_terminal() || requested == InvitationStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "invitation {} cannot move from {} to {}",
                self.id, current, requested
            )));
        }

        self.status = requested;
        Ok(StatusChange::Applied)
    }
}
