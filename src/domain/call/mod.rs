//! Call bounded context - manages the lifecycle of call sessions

pub mod event;
pub mod session;
pub mod value_object;

pub use event::SessionUpdate;
pub use session::{CallSession, SessionIdentity, DEFAULT_DURATION_CAP_SECS};
pub use value_object::{CallRole, CallState, EndReason};
