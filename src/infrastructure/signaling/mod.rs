//! Signaling transport

pub mod bus;

pub use bus::{Delivery, SignalingBus, SignalingHandler, Subscription};
