//! Compliance delivery adapters

pub mod http;

pub use http::HttpComplianceSink;
