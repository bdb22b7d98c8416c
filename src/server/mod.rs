//! HTTP and WebSocket surface over the orchestration core.

pub mod routes;
pub mod ws;

pub use routes::{app_router, AppState};
