//! Authenticated, rate-limited relay in front of a webhook API.
//!
//! Requests carry a shared secret and a job id. The secret is checked
//! first, the job id is then charged against a fixed-window limit, and
//! admitted payloads are forwarded unmodified to the downstream webhook.

#![forbid(unsafe_code)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod forward;
pub mod gateway;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod rate_limit;
pub mod server;
pub mod state;

pub use config::{Args, GatewayConfig};
pub use error::{GatewayError, Result};
pub use gateway::Gateway;
pub use server::create_router;
pub use state::AppState;
