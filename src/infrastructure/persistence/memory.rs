//! In-memory invitation store

use crate::domain::invitation::{
    default_ttl, CallInvitation, InvitationStatus, InvitationStore, NewInvitation, StatusChange,
};
use crate::domain::shared::error::DomainError;
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{InvitationId, SessionId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Source of the current time, replaceable in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Invitation store backed by a process-local map
pub struct InMemoryInvitationStore {
    invitations: RwLock<HashMap<InvitationId, CallInvitation>>,
    ttl: Duration,
    clock: Clock,
}

impl InMemoryInvitationStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(Utc::now))
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            invitations: RwLock::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Copy of an invitation with the effective status applied
    fn effective(&self, invitation: &CallInvitation, now: DateTime<Utc>) -> CallInvitation {
        let mut copy = invitation.clone();
        copy.status = invitation.effective_status(now, self.ttl);
        copy
    }

    pub async fn len(&self) -> usize {
        self.invitations.read().await.len()
    }
}

impl Default for InMemoryInvitationStore {
    fn default() -> Self {
        Self::new(default_ttl())
    }
}

#[async_trait]
impl InvitationStore for InMemoryInvitationStore {
    async fn create(&self, new: NewInvitation) -> Result<CallInvitation> {
        let now = self.now();
        let invitation = CallInvitation::new(new, now)?;
        let pair = invitation.pair();

        let mut invitations = self.invitations.write().await;

        if let Some(existing) = invitations
            .values()
            .find(|i| i.pair() == pair && i.holds_session(now, self.ttl))
        {
            return Err(DomainError::Conflict(format!(
                "an active session already exists for {} (session {})",
                pair, existing.session_id
            )));
        }
        if invitations
            .values()
            .any(|i| i.session_id == invitation.session_id)
        {
            return Err(DomainError::Conflict(format!(
                "session {} already has an invitation",
                invitation.session_id
            )));
        }

        invitations.insert(invitation.id, invitation.clone());
        info!(
            invitation_id = %invitation.id,
            session_id = %invitation.session_id,
            "Created invitation {} -> {}",
            invitation.caller_id,
            invitation.recipient_id
        );
        Ok(invitation)
    }

    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let now = self.now();
        let invitations = self.invitations.read().await;

        let mut pending: Vec<CallInvitation> = invitations
            .values()
            .filter(|i| i.involves(user_id))
            .filter(|i| i.is_open(now, self.ttl))
            .cloned()
            .collect();
        pending.sort_by_key(|i| i.created_at);
        Ok(pending)
    }

    async fn list_active(&self, user_id: &UserId) -> Result<Vec<CallInvitation>> {
        let now = self.now();
        let invitations = self.invitations.read().await;

        Ok(invitations
            .values()
            .filter(|i| i.involves(user_id))
            .filter(|i| i.effective_status(now, self.ttl) == InvitationStatus::Accepted)
            .filter(|i| i.closed_at.is_none())
            .map(|i| self.effective(i, now))
            .collect())
    }

    async fn get(&self, id: &InvitationId) -> Result<Option<CallInvitation>> {
        let now = self.now();
        let invitations = self.invitations.read().await;
        Ok(invitations.get(id).map(|i| self.effective(i, now)))
    }

    async fn update_status(&self, id: &InvitationId, status: InvitationStatus) -> Result<StatusChange> {
        let now = self.now();
        let mut invitations = self.invitations.write().await;

        let invitation = invitations
            .get_mut(id)
            .ok_or_else(|| DomainError::NotFound(format!("invitation {id}")))?;

        let change = invitation.apply_status(status, now, self.ttl)?;
        debug!(invitation_id = %id, ?change, "Invitation status -> {}", status);
        Ok(change)
    }

    async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let now = self.now();
        let mut invitations = self.invitations.write().await;

        let invitation = invitations
            .values_mut()
            .find(|i| &i.session_id == session_id)
            .ok_or_else(|| DomainError::NotFound(format!("invitation for session {session_id}")))?;

        if invitation.closed_at.is_none() {
            invitation.closed_at = Some(now);
        }
        Ok(())
    }
}
