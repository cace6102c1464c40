//! The connecting facade over the shared host engine.
//!
//! A client is a host with peer capacity 1: it keeps no registry, only the
//! link-assigned id of the server peer and a `connected` flag that follows
//! the link's connect/disconnect events.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared::{
    BincodeCodec, ChannelKind, EnvelopeCodec, HostDriver, HostError, HostRole, Link, NotRunning,
    PeerChange, PeerId, PING_UNAVAILABLE,
};
use tracing::{info, warn};

/// Tunables of the connecting role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Drain passes per second.
    pub tick_rate: u32,
    /// Largest accepted payload, in bytes.
    pub max_packet_size: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            tick_rate: shared::DEFAULT_CLIENT_TICK_RATE,
            max_packet_size: shared::DEFAULT_CLIENT_MAX_PACKET_SIZE,
        }
    }
}

/// Lifecycle notifications for the one server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("client is not connected to a server")]
    NotConnected,
    #[error(transparent)]
    Host(#[from] HostError),
}

/// The single-peer transport endpoint.
pub struct NetworkClient<L: Link> {
    driver: HostDriver<L>,
    settings: ClientSettings,
    server_peer: Option<PeerId>,
    connected: bool,
}

impl<L: Link> NetworkClient<L> {
    /// Creates a client over `link` with the default bincode envelope codec.
    pub fn new(settings: ClientSettings, link: L) -> Self {
        Self::with_codec(settings, link, Box::new(BincodeCodec))
    }

    pub fn with_codec(
        settings: ClientSettings,
        link: L,
        codec: Box<dyn EnvelopeCodec + Send>,
    ) -> Self {
        Self {
            driver: HostDriver::new(link, codec),
            settings,
            server_peer: None,
            connected: false,
        }
    }

    /// Configures the link and installs the channel table. Single-shot.
    pub fn initialize(&mut self) -> Result<(), HostError> {
        self.driver.initialize(
            HostRole::Connector,
            self.settings.max_packet_size,
            self.settings.tick_rate,
        )
    }

    /// Opens the capacity-1 topology and starts connecting to `addr:port`.
    /// Success of the connection itself is observable via
    /// [`NetworkClient::connected`] after later ticks.
    pub fn connect(&mut self, addr: &str, port: u16) -> Result<(), HostError> {
        let peer = self.driver.open_connector(addr, port)?;
        self.server_peer = Some(peer);
        info!(addr, port, "connecting to server");
        Ok(())
    }

    /// Accumulates frame time and, past the tick threshold, drains all
    /// pending link events, tracking the server connection and routing data
    /// to the registered message handlers.
    pub fn tick(&mut self, delta: f32) -> Result<Vec<ClientEvent>, NotRunning> {
        let report = self.driver.tick(delta)?;
        let mut events = Vec::new();
        for change in report.peer_changes {
            match change {
                PeerChange::Joined(peer) if Some(peer) == self.server_peer => {
                    self.connected = true;
                    events.push(ClientEvent::Connected);
                }
                PeerChange::Left(peer) if Some(peer) == self.server_peer => {
                    self.connected = false;
                    events.push(ClientEvent::Disconnected);
                }
                PeerChange::Joined(peer) | PeerChange::Left(peer) => {
                    // Capacity is 1; anything else is a link bug.
                    warn!(peer, "event for unexpected peer on single-peer host");
                }
            }
        }
        Ok(events)
    }

    /// Registers the handler for envelopes of `kind`, invoked synchronously
    /// during the drain pass.
    pub fn on_message<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: FnMut(PeerId, Bytes) + Send + 'static,
    {
        self.driver.on_message(kind, handler);
    }

    /// Whether the link has confirmed the connection to the server.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Sends one `(kind, buffer)` envelope to the server.
    pub fn send(
        &mut self,
        kind: &str,
        channel: ChannelKind,
        buffer: Bytes,
    ) -> Result<(), ClientError> {
        let peer = self.server_peer.ok_or(ClientError::NotConnected)?;
        if !self.connected {
            return Err(ClientError::NotConnected);
        }
        self.driver.send(peer, kind, channel, buffer)?;
        Ok(())
    }

    /// Round-trip time to the server in milliseconds, or
    /// [`PING_UNAVAILABLE`] while not running or not connected.
    pub fn ping(&self) -> i32 {
        match self.server_peer {
            Some(peer) => self.driver.rtt(peer),
            None => PING_UNAVAILABLE,
        }
    }

    /// Drops the server connection and releases the link. Idempotent.
    pub fn disconnect(&mut self) {
        self.driver.stop();
        self.server_peer = None;
        self.connected = false;
    }
}

impl<L: Link> std::fmt::Debug for NetworkClient<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkClient")
            .field("driver", &self.driver)
            .field("connected", &self.connected)
            .field("settings", &self.settings)
            .finish()
    }
}
