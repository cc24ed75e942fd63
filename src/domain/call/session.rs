//! Call session aggregate root

use crate::domain::call::value_object::{CallRole, CallState, EndReason};
use crate::domain::media::ProviderKind;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{CallId, InvitationId, ParticipantPair, SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default duration cap of a connected call, in seconds
pub const DEFAULT_DURATION_CAP_SECS: u64 = 300;

/// Call session aggregate root
///
/// One instance exists per participant per call; it is owned by that
/// participant's state machine and enforces the transition table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSession {
    session_id: SessionId,
    invitation_id: InvitationId,
    call_id: CallId,
    caller_id: UserId,
    recipient_id: UserId,
    role: CallRole,
    state: CallState,
    provider: ProviderKind,
    duration_cap_secs: u64,
    created_at: DateTime<Utc>,
    /// When media started flowing
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Identity of the call a session belongs to
#[derive(Debug, Clone)]
pub struct SessionIdentity {
    pub session_id: SessionId,
    pub invitation_id: InvitationId,
    pub call_id: CallId,
    pub caller_id: UserId,
    pub recipient_id: UserId,
}

impl CallSession {
    /// Session for a call placed by the local user (`Idle -> Calling`)
    pub fn outgoing(identity: SessionIdentity, provider: ProviderKind, duration_cap_secs: u64) -> Self {
        let mut session = Self::idle(identity, CallRole::Caller, provider, duration_cap_secs);
        session.state = CallState::Calling;
        session
    }

    /// Session for a received invitation (`Idle -> Incoming`)
    pub fn incoming(identity: SessionIdentity, provider: ProviderKind, duration_cap_secs: u64) -> Self {
        let mut session = Self::idle(identity, CallRole::Callee, provider, duration_cap_secs);
        session.state = CallState::Incoming;
        session
    }

    /// Session rebuilt from an accepted, unclosed invitation after a reconnect
    pub fn rehydrated(
        identity: SessionIdentity,
        role: CallRole,
        provider: ProviderKind,
        duration_cap_secs: u64,
    ) -> Self {
        let mut session = Self::idle(identity, role, provider, duration_cap_secs);
        session.state = CallState::Connecting;
        session
    }

    fn idle(identity: SessionIdentity, role: CallRole, provider: ProviderKind, duration_cap_secs: u64) -> Self {
        Self {
            session_id: identity.session_id,
            invitation_id: identity.invitation_id,
            call_id: identity.call_id,
            caller_id: identity.caller_id,
            recipient_id: identity.recipient_id,
            role,
            state: CallState::Idle,
            provider,
            duration_cap_secs,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    /// Accept received / local accept
    pub fn begin_connecting(&mut self) -> Result<()> {
        self.transition_to(CallState::Connecting)
    }

    /// Media streams are flowing
    pub fn mark_connected(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallState::Connected)?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Enter the terminal state
    pub fn end(&mut self, reason: EndReason, at: DateTime<Utc>) -> Result<()> {
        self.transition_to(CallState::Ended(reason))?;
        self.ended_at = Some(at);
        Ok(())
    }

    fn transition_to(&mut self, new_state: CallState) -> Result<()> {
        if !self.state.can_transition_to(&new_state) {
            return Err(DomainError::InvalidTransition(format!(
                "session {}: cannot transition from {:?} to {:?}",
                self.session_id, self.state, new_state
            )));
        }

        self.state = new_state;
        Ok(())
    }

    /// Whole seconds spent in `Connected`, if the call connected
    pub fn duration_seconds(&self) -> Option<u64> {
        let started = self.started_at?;
        let ended = self.ended_at.unwrap_or_else(Utc::now);
        Some((ended - started).num_seconds().max(0) as u64)
    }

    // Getters
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn invitation_id(&self) -> &InvitationId {
        &self.invitation_id
    }

    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    pub fn caller_id(&self) -> &UserId {
        &self.caller_id
    }

    pub fn recipient_id(&self) -> &UserId {
        &self.recipient_id
    }

    pub fn participants(&self) -> ParticipantPair {
        ParticipantPair::new(self.caller_id.clone(), self.recipient_id.clone())
    }

    /// The participant on the other side of the call
    pub fn remote_user(&self) -> &UserId {
        match self.role {
            CallRole::Caller => &self.recipient_id,
            CallRole::Callee => &self.caller_id,
        }
    }

    pub fn local_user(&self) -> &UserId {
        match self.role {
            CallRole::Caller => &self.caller_id,
            CallRole::Callee => &self.recipient_id,
        }
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn duration_cap_secs(&self) -> u64 {
        self.duration_cap_secs
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_ended(&self) -> bool {
        self.state.is_ended()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn identity() -> SessionIdentity {
        SessionIdentity {
            session_id: SessionId::new(),
            invitation_id: InvitationId::new(),
            call_id: CallId::new(),
            caller_id: "alice".into(),
            recipient_id: "bob".into(),
        }
    }

    #[test]
    fn test_outgoing_lifecycle() {
        let mut session = CallSession::outgoing(identity(), ProviderKind::PeerLink, DEFAULT_DURATION_CAP_SECS);
        assert_eq!(session.state(), CallState::Calling);
        assert_eq!(session.remote_user(), &UserId::new("bob"));

        session.begin_connecting().unwrap();
        let t0 = Utc::now();
        session.mark_connected(t0).unwrap();
        session.end(EndReason::UserEnded, t0 + Duration::seconds(42)).unwrap();

        assert_eq!(session.state(), CallState::Ended(EndReason::UserEnded));
        assert_eq!(session.duration_seconds(), Some(42));
    }

    #[test]
    fn test_cannot_leave_ended() {
        let mut session = CallSession::incoming(identity(), ProviderKind::PeerLink, DEFAULT_DURATION_CAP_SECS);
        assert_eq!(session.local_user(), &UserId::new("bob"));
        session.end(EndReason::Declined, Utc::now()).unwrap();

        assert!(session.begin_connecting().is_err());
        assert!(session.end(EndReason::Declined, Utc::now()).is_err());
        assert_eq!(session.state(), CallState::Ended(EndReason::Declined));
    }

    #[test]
    fn test_no_duration_without_connect() {
        let mut session = CallSession::outgoing(identity(), ProviderKind::Relay, 60);
        session.end(EndReason::NoAnswer, Utc::now()).unwrap();
        assert_eq!(session.duration_seconds(), None);
    }
}
