//! Interface layer - External interfaces
//!
//! This layer handles:
//! - REST API endpoints for invitation persistence
//! - WebSocket signaling rooms
//! - Health and metrics endpoints

pub mod api;
