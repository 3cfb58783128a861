//! Stateless repositories; each method takes `&Connection` and runs SQL.

pub mod notification;
pub mod task;

pub use notification::NotificationRepo;
pub use task::TaskRepo;
