//! # taskhub-store
//!
//! `SQLite` implementations of the two persistence collaborators the
//! notification core needs.
//!
//! - **[`connection`]**: `r2d2` pool with WAL and foreign keys on every connection
//! - **[`migrations`]**: embedded, version-tracked schema
//! - **[`repositories`]**: stateless `TaskRepo` / `NotificationRepo`
//! - **[`store`]**: [`SqliteStore`], the async `TaskQuery` + `NotificationStore`

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod migrations;
pub mod repositories;
pub mod store;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};
pub use errors::{DbError, Result};
pub use repositories::{NotificationRepo, TaskRepo};
pub use store::SqliteStore;
