//! Common functionality shared between the server & client crates.
//!
//! The core of this crate is [`host::HostDriver`], the tick-driven engine that
//! both roles wrap: it owns a [`link::Link`] endpoint, drains its pending
//! events once per tick interval and routes decoded message envelopes to
//! registered handlers. Everything else here is the vocabulary both sides must
//! agree on: the fixed channel table, the wire envelope and the Link provider
//! boundary.

/// Channel features shared by client & server
pub mod channels;
/// Message envelope and codec boundary
pub mod envelope;
/// Tick-driven host engine shared by client & server
pub mod host;
/// Link provider boundary and the in-memory implementation
pub mod link;

/// Default capacity of the link-level receive/send queues used by the
/// listening role. Bounds memory when the event rate exceeds the tick rate.
pub const DEFAULT_REACTOR_QUEUE_SIZE: usize = 4096;

/// Default max packet size for the listening role.
pub const DEFAULT_SERVER_MAX_PACKET_SIZE: u32 = 4096;
/// Default max packet size for the connecting role.
pub const DEFAULT_CLIENT_MAX_PACKET_SIZE: u32 = 65535;

/// Default tick rate (ticks per second) for the listening role.
pub const DEFAULT_SERVER_TICK_RATE: u32 = 32;
/// Default tick rate (ticks per second) for the connecting role.
pub const DEFAULT_CLIENT_TICK_RATE: u32 = 64;

/// Default peer capacity of a listening host's topology.
pub const DEFAULT_MAX_PEERS: u16 = 100;

pub use channels::{
    install_channels, ChannelConfigError, ChannelId, ChannelKind, ChannelOrdering, ChannelSet,
    CHANNEL_COUNT,
};
pub use envelope::{BincodeCodec, CodecError, Envelope, EnvelopeCodec};
pub use host::{
    HostDriver, HostError, HostPhase, HostRole, NotRunning, PeerChange, TickReport,
    PING_UNAVAILABLE,
};
pub use link::{
    HostId, HostTopology, Link, LinkConfig, LinkError, LinkEvent, MemoryLink, MemoryNetwork,
    PeerConfig, PeerId, ReactorConfig,
};
