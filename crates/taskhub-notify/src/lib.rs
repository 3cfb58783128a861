//! # taskhub-notify
//!
//! Real-time notification delivery and due-date scheduling.
//!
//! - [`hub::ConnectionHub`]: per-user fan-out to live client connections
//! - [`broker::MessageBroker`]: in-process topics with one worker per subscription
//! - [`publisher::EventPublisher`]: fire-and-forget delivery with bounded retries
//! - [`gateway`]: app push, broker, and webhook delivery channels
//! - [`notifier::Notifier`]: one retry chain per gateway for each event
//! - [`scheduler`]: due-soon and overdue threshold detection
//! - [`shutdown::ShutdownCoordinator`]: the shared cancellation token

#![deny(unsafe_code)]

pub mod bridge;
pub mod broker;
pub mod errors;
pub mod gateway;
pub mod hub;
pub mod metrics;
pub mod notifier;
pub mod publisher;
pub mod scheduler;
pub mod shutdown;

pub use bridge::{HubBridge, WebhookRelay};
pub use broker::{BrokerMessage, MessageBroker, MessageHandler, Subscription};
pub use errors::{BrokerError, HubError, NotifyError, SchedulerError};
pub use gateway::{AppChannelGateway, BrokerGateway, NotificationGateway, WebhookGateway};
pub use hub::{ConnectionHub, TransportHandle};
pub use notifier::Notifier;
pub use publisher::{EventPublisher, PublishOutcome};
pub use scheduler::{DueScanner, DueScheduler, NotificationSink, TickReport};
pub use shutdown::ShutdownCoordinator;
