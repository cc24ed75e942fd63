//! Invitation store implementations

pub mod http;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod database;
#[cfg(feature = "postgres")]
pub mod invitation_repository;

pub use http::HttpInvitationStore;
pub use memory::InMemoryInvitationStore;
#[cfg(feature = "postgres")]
pub use database::{create_pool, run_migrations, PoolSettings};
#[cfg(feature = "postgres")]
pub use invitation_repository::PgInvitationStore;
