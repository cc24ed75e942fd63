//! API interface implementations

pub mod invitation_dto;
pub mod invitation_handler;
pub mod metrics_handler;
pub mod rooms;
pub mod router;

pub use invitation_handler::AppState;
pub use metrics_handler::init_metrics;
pub use router::build_router;
