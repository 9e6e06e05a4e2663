//! service-core: Shared infrastructure for the auth-context service.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;

pub use axum;
pub use axum::async_trait;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
