//! The Link provider boundary: the opaque low-level datagram transport the
//! host engine polls and drives.
//!
//! A [`Link`] owns the actual sockets (or their in-memory stand-in) and may
//! run I/O on its own threads; this crate only ever talks to it from the
//! thread that owns the host, through non-blocking calls. [`MemoryLink`] is
//! the bundled implementation for local runs and tests.

pub mod memory;

pub use memory::{MemoryLink, MemoryNetwork};

use bytes::Bytes;

use crate::channels::{ChannelId, ChannelKind};

/// Identifier of a local transport endpoint opened via [`Link::add_host`].
pub type HostId = u16;

/// Link-assigned identifier of a remote peer. Unique among the currently-live
/// connections of one host; meaningless across hosts.
pub type PeerId = u64;

/// Bounds on the link's internal receive/send queues for a fixed-rate host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReactorConfig {
    pub max_received_messages: usize,
    pub max_sent_messages: usize,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            max_received_messages: crate::DEFAULT_REACTOR_QUEUE_SIZE,
            max_sent_messages: crate::DEFAULT_REACTOR_QUEUE_SIZE,
        }
    }
}

/// Global link configuration, applied once at [`Link::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Largest payload the link will accept for a single send.
    pub max_packet_size: u32,
    /// Queue bounds; `None` leaves the link's own defaults (unbounded for the
    /// in-memory link).
    pub reactor: Option<ReactorConfig>,
}

/// Per-connection channel list handed to the link when opening a host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerConfig {
    channels: Vec<ChannelKind>,
}

impl PeerConfig {
    /// Appends a channel and returns its index.
    pub fn add_channel(&mut self, kind: ChannelKind) -> ChannelId {
        self.channels.push(kind);
        (self.channels.len() - 1) as ChannelId
    }

    pub fn channels(&self) -> &[ChannelKind] {
        &self.channels
    }
}

/// Shape of one local endpoint: its channel list and peer capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTopology {
    pub peer_config: PeerConfig,
    /// Maximum simultaneous peers: 1 for the connecting role, the configured
    /// capacity for the listening role.
    pub max_peers: u16,
}

/// One pending transport event, as returned by [`Link::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Queue empty; the drain pass is complete.
    Nothing,
    Connected {
        peer: PeerId,
    },
    Data {
        peer: PeerId,
        channel: ChannelId,
        payload: Bytes,
    },
    Disconnected {
        peer: PeerId,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link not initialized")]
    NotInitialized,
    #[error("link already initialized")]
    AlreadyInitialized,
    #[error("no host with id {0}")]
    UnknownHost(HostId),
    #[error("no peer with id {0}")]
    UnknownPeer(PeerId),
    #[error("port {0} already bound")]
    PortInUse(u16),
    #[error("no listener at {addr}:{port}")]
    NoListener { addr: String, port: u16 },
    #[error("channel {0} not configured on this host")]
    UnknownChannel(ChannelId),
    #[error("payload of {size} bytes exceeds max packet size {max}")]
    PacketTooLarge { size: usize, max: u32 },
    #[error("host {0} is at peer capacity")]
    AtCapacity(HostId),
}

/// The opaque datagram transport. All calls are non-blocking and must only be
/// made from the thread that owns the host engine.
pub trait Link {
    /// Applies the global configuration. Called once, before any host exists.
    fn init(&mut self, config: &LinkConfig) -> Result<(), LinkError>;

    /// Opens a local endpoint. `port` is `None` for an ephemeral binding
    /// (connecting role) and `Some` for a listener.
    fn add_host(&mut self, topology: HostTopology, port: Option<u16>) -> Result<HostId, LinkError>;

    /// Initiates an outgoing connection from `host`. The returned peer id is
    /// this host's handle for the remote; the connection is live once the
    /// corresponding [`LinkEvent::Connected`] is polled.
    fn connect(&mut self, host: HostId, addr: &str, port: u16) -> Result<PeerId, LinkError>;

    /// Queues `payload` on `channel` towards `peer`.
    fn send(
        &mut self,
        host: HostId,
        peer: PeerId,
        channel: ChannelId,
        payload: Bytes,
    ) -> Result<(), LinkError>;

    /// Pops the next pending event for `host`, or [`LinkEvent::Nothing`].
    fn poll(&mut self, host: HostId) -> LinkEvent;

    /// Closes the connection to `peer`.
    fn disconnect(&mut self, host: HostId, peer: PeerId) -> Result<(), LinkError>;

    /// Last round-trip-time sample for `peer`, in milliseconds.
    fn rtt(&self, host: HostId, peer: PeerId) -> Option<u32>;

    /// Releases every host owned by this link value.
    fn shutdown(&mut self);
}
