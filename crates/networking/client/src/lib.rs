//! Connecting role of the transport: a single-peer host engine tracking the
//! one connection to the server.

/// The client facade wrapping the shared host engine
pub mod client;

pub use client::{ClientError, ClientEvent, ClientSettings, NetworkClient};
