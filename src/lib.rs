//! vidcall - Video call session coordination
//!
//! A Domain-Driven Design implementation of one-to-one video calls:
//! invitations, session-scoped signaling, media negotiation through
//! pluggable providers, a hard duration cap and compliance notification.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interface;

// Re-export commonly used types
pub use domain::shared::error::DomainError;
pub use domain::shared::result::Result;
