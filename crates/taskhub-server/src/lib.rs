//! # taskhub-server
//!
//! Axum HTTP + `WebSocket` front for the notification core.
//!
//! - `GET /ws`: authenticated upgrade handed to the connection hub
//! - `GET /health`: liveness and connection count
//! - `GET /metrics`: Prometheus exposition
//! - [`services::Services`]: component wiring and ordered shutdown

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod services;
pub mod websocket;

pub use errors::{Result, ServerError};
pub use server::{AppState, ServerHandle, TaskhubServer};
pub use services::{PersistingNotifier, Services};
