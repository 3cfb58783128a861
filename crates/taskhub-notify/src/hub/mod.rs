//! Connection hub: per-user fan-out to live client connections.
//!
//! - [`ConnectionHub`]: registry, routing, overflow policy, shutdown
//! - [`connection::Connection`]: one client session with a bounded queue
//! - [`transport`]: the sink/source boundary the server adapts sockets to
//! - [`memory`]: in-process transport pair

pub mod connection;
mod manager;
pub mod memory;
mod session;
pub mod transport;

pub use connection::{Connection, Enqueue};
pub use manager::ConnectionHub;
pub use memory::{MemoryClient, MemoryTransport};
pub use session::CloseReason;
pub use transport::{FrameSink, FrameSource, Inbound, Outbound, TransportError, TransportHandle};
