//! # taskhub-core
//!
//! Foundation types shared by every taskhub crate.
//!
//! - **Branded IDs**: `UserId`, `ConnectionId`, `NotificationId`, `TaskId`
//! - **Events**: [`events::NotificationEvent`] and its wire representation
//! - **Errors**: delivery and storage errors via `thiserror`
//! - **Retry**: [`retry::RetryPolicy`] and the [`retry::RetryChain`] state machine
//! - **Clock**: injectable wall clock for time-driven logic
//! - **Collaborators**: [`traits::TaskQuery`] and [`traits::NotificationStore`]
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod retry;
pub mod traits;

pub use errors::{DeliveryError, QueryError, StoreError};
pub use events::{NotificationEvent, NotificationKind, WireNotification};
pub use ids::{ConnectionId, NotificationId, TaskId, UserId};
