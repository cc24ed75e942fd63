//! Invitation bounded context - durable record of call invitations

pub mod entity;
pub mod repository;

pub use entity::{
    default_ttl, CallInvitation, InvitationStatus, NewInvitation, StatusChange,
    DEFAULT_INVITATION_TTL_SECS,
};
pub use repository::InvitationStore;
