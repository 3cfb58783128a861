//! WebSocket endpoint: upgrade handling and the hub transport adapter.

pub mod handler;
pub mod transport;

pub use handler::{USER_HEADER, user_from_headers, ws_handler};
pub use transport::into_transport;
