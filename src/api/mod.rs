//! Control plane and streaming endpoints
//!
//! One axum server hosts both the small operational HTTP surface and the
//! WebSocket lease streaming paths.

pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;

pub use server::{ApiServer, AppState};
