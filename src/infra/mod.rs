//! Infrastructure adapters and runtime bootstrap.

pub mod api_client;
pub mod error;
pub mod telemetry;
