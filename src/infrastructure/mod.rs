//! Infrastructure layer - Technical implementations
//!
//! This layer contains:
//! - Invitation store implementations (memory, PostgreSQL, HTTP)
//! - The in-process signaling bus
//! - Media devices, provider adapters and negotiation
//! - External service integrations (compliance)

pub mod compliance;
pub mod media;
pub mod persistence;
pub mod signaling;
pub(crate) mod sync;
