//! Lessor - Proxy Lease Broker
//!
//! A proxy lease broker for rotating crawler fleets, written in Rust.
//!
//! ## Features
//!
//! - Per-source in-memory lease pools with strict single-holder semantics
//! - Bidirectional WebSocket streaming of leases and usage reports
//! - Per-proxy cool-down timers returning leases to their pool
//! - Cross-session broadcast of proxy-in-use notices
//! - Two-tier refill path: Redis warm cache over authoritative PostgreSQL
//! - Authenticated encryption of proxy credentials on the wire

pub mod api;
pub mod broker;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod repository;

pub use config::Config;
pub use database::Database;
pub use error::{LessorError, Result};
