//! Invitation store interface

use crate::domain::invitation::entity::{CallInvitation, InvitationStatus, NewInvitation, StatusChange};
use crate::domain::shared::result::Result;
use crate::domain::shared::value_objects::{InvitationId, SessionId, UserId};
use async_trait::async_trait;

/// Durable record of call invitations.
///
/// Defined in the domain layer as a port and implemented by the
/// in-memory, PostgreSQL and HTTP adapters in the infrastructure layer.
/// All reads report the effective status (TTL applied).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InvitationStore: Send + Sync {
    /// Persist a new pending invitation.
    ///
    /// Fails with `Conflict` if the pair already holds an active session.
    async fn create(&self, invitation: NewInvitation) -> Result<CallInvitation>;

    /// Unexpired, unclosed pending invitations in which `user_id` is caller or recipient
    async fn list_pending(&self, user_id: &UserId) -> Result<Vec<CallInvitation>>;

    /// Accepted invitations whose session has not been closed yet
    async fn list_active(&self, user_id: &UserId) -> Result<Vec<CallInvitation>>;

    /// Find an invitation by id
    async fn get(&self, id: &InvitationId) -> Result<Option<CallInvitation>>;

    /// Move an invitation to `status`.
    ///
    /// `NotFound` if absent, `Unchanged` if already there, `InvalidTransition`
    /// when leaving a terminal status.
    async fn update_status(&self, id: &InvitationId, status: InvitationStatus) -> Result<StatusChange>;

    /// Record that the session created from the invitation reached `Ended`
    async fn close_session(&self, session_id: &SessionId) -> Result<()>;
}
