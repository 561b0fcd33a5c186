//! WasteWise API Library
//!
//! HTTP surface for the subscription-gated pickup lifecycle: configuration,
//! bearer authentication, the permission gate and error mapping.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
