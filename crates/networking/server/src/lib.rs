//! Listening role of the transport: a many-peer host engine plus the
//! connection registry that tracks every remote peer.

/// Connection records and the registry that owns them
pub mod connection;
/// The server facade wrapping the shared host engine
pub mod server;

pub use connection::{Connection, ConnectionRegistry, ConnectionState, RegistryError};
pub use server::{NetworkServer, ServerEvent, ServerSettings};
