//! Domain layer - Core rules of video-call session coordination
//!
//! This layer contains:
//! - Aggregates: the per-participant call session
//! - Entities: call invitations
//! - Value Objects: identifiers, states, media descriptions
//! - Repository Interfaces: ports for invitation persistence and compliance delivery
//! - Wire types: signaling messages

pub mod call;
pub mod compliance;
pub mod invitation;
pub mod media;
pub mod shared;
pub mod signaling;

// Re-export commonly used types
pub use shared::{DomainError, Result};
