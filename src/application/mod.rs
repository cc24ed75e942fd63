//! Application layer - call sessions and the services around them
//!
//! Coordinates the domain model with signaling, media and persistence:
//! - Per-session state machines ([`CallStateMachine`])
//! - Per-user coordination ([`CallCoordinator`])
//! - Duration cap enforcement and compliance notification

pub mod compliance;
pub mod context;
pub mod coordinator;
pub mod duration;
pub mod state_machine;

pub use compliance::ComplianceNotifier;
pub use context::{CallPolicy, CallServices, SessionContext};
pub use coordinator::CallCoordinator;
pub use duration::{DurationEnforcer, DurationEvent, DurationSink, WarningSchedule};
pub use state_machine::{CallSessionHandle, CallStateMachine};
