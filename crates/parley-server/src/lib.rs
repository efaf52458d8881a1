//! # parley-server
//!
//! Axum HTTP + WebSocket surface over the [`Orchestrator`].
//!
//! - **routes**: JSON message operations under `/api`
//! - **ws**: per-chat event subscriptions and document status updates
//! - **context**: caller credentials from forwarded headers
//! - **health**: `/health` with uptime and live counters
//! - **shutdown**: signal handling and generation draining
//!
//! [`Orchestrator`]: parley_runtime::Orchestrator

#![deny(unsafe_code)]

pub mod context;
pub mod error;
pub mod health;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod ws;

#[cfg(test)]
mod test_support;

pub use context::{Caller, caller_context};
pub use error::{ApiError, ErrorBody};
pub use health::HealthResponse;
pub use server::{AppState, ParleyServer};
pub use shutdown::{ShutdownCoordinator, wait_for_signal};
pub use ws::Connections;
