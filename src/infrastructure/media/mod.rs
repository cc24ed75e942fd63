//! Media: capture devices, provider adapters and negotiation

pub mod controller;
pub mod devices;
pub mod hosted;
pub mod ice;
pub mod provider;
pub mod sdp;

pub use controller::{ControllerEvent, PeerConnectionController};
pub use devices::{MediaDevices, VirtualDevices};
pub use hosted::HostedAdapter;
pub use ice::IceAdapter;
pub use provider::{ProviderAdapter, ProviderFactory};

pub(crate) use super::sync::lock;
