//! The listening facade over the shared host engine.
//!
//! [`NetworkServer`] fixes the many-peer topology, owns the
//! [`ConnectionRegistry`] and translates the engine's peer changes into
//! [`ServerEvent`]s for the application. Data payloads never show up here:
//! they are routed to the handlers registered via
//! [`NetworkServer::on_message`] during the drain pass.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shared::{
    BincodeCodec, ChannelKind, EnvelopeCodec, HostDriver, HostError, HostRole, Link, NotRunning,
    PeerChange, PeerId, TickReport,
};
use tracing::{info, warn};

use crate::connection::{Connection, ConnectionRegistry, ConnectionState, RegistryError};

/// Tunables of the listening role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Drain passes per second.
    pub tick_rate: u32,
    /// Largest accepted payload, in bytes.
    pub max_packet_size: u32,
    /// Peer capacity of the host topology.
    pub max_peers: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            tick_rate: shared::DEFAULT_SERVER_TICK_RATE,
            max_packet_size: shared::DEFAULT_SERVER_MAX_PACKET_SIZE,
            max_peers: shared::DEFAULT_MAX_PEERS,
        }
    }
}

/// Connection lifecycle notifications surfaced to the application once per
/// tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerEvent {
    ClientConnected { peer: PeerId },
    ClientDisconnected { peer: PeerId },
}

/// The many-peer transport endpoint.
pub struct NetworkServer<L: Link> {
    driver: HostDriver<L>,
    registry: ConnectionRegistry,
    settings: ServerSettings,
}

impl<L: Link> NetworkServer<L> {
    /// Creates a server over `link` with the default bincode envelope codec.
    pub fn new(settings: ServerSettings, link: L) -> Self {
        Self::with_codec(settings, link, Box::new(BincodeCodec))
    }

    pub fn with_codec(
        settings: ServerSettings,
        link: L,
        codec: Box<dyn EnvelopeCodec + Send>,
    ) -> Self {
        Self {
            driver: HostDriver::new(link, codec),
            registry: ConnectionRegistry::new(),
            settings,
        }
    }

    /// Configures the link and installs the channel table. Single-shot.
    pub fn initialize(&mut self) -> Result<(), HostError> {
        self.driver.initialize(
            HostRole::Listener,
            self.settings.max_packet_size,
            self.settings.tick_rate,
        )
    }

    /// Starts listening on `port`. The registry only gains entries from here
    /// on, once the topology capacity is known.
    pub fn start(&mut self, port: u16) -> Result<(), HostError> {
        self.driver.open_listener(port, self.settings.max_peers)?;
        info!(port, "server listening");
        Ok(())
    }

    /// Accumulates frame time and, past the tick threshold, drains all
    /// pending link events: connects and disconnects update the registry and
    /// come back as [`ServerEvent`]s, data payloads go to the registered
    /// message handlers.
    pub fn tick(&mut self, delta: f32) -> Result<Vec<ServerEvent>, NotRunning> {
        let report = self.driver.tick(delta)?;
        Ok(self.apply_peer_changes(report))
    }

    fn apply_peer_changes(&mut self, report: TickReport) -> Vec<ServerEvent> {
        let mut events = Vec::with_capacity(report.peer_changes.len());
        for change in report.peer_changes {
            match change {
                PeerChange::Joined(peer) => match self.registry.insert(peer) {
                    Ok(_) => events.push(ServerEvent::ClientConnected { peer }),
                    Err(err) => warn!(peer, %err, "connect event ignored"),
                },
                PeerChange::Left(peer) => {
                    // The registry warns on unknown peers; the application is
                    // still told so no disconnect is ever silently dropped.
                    self.registry.remove(peer);
                    events.push(ServerEvent::ClientDisconnected { peer });
                }
            }
        }
        events
    }

    /// Registers the handler for envelopes of `kind`, invoked synchronously
    /// during the drain pass with `(peer, payload)`.
    pub fn on_message<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: FnMut(PeerId, Bytes) + Send + 'static,
    {
        self.driver.on_message(kind, handler);
    }

    /// Looks up a connection by its transport id.
    pub fn connection(&self, peer: PeerId) -> Option<&Connection> {
        self.registry.get(peer)
    }

    /// Looks up a connection by its application auth id.
    pub fn connection_by_auth(&self, auth_id: &str) -> Option<&Connection> {
        self.registry.find_by_auth_id(auth_id)
    }

    /// Binds `auth_id` to `peer` (unique across live connections, write-once)
    /// and moves it to [`ConnectionState::Authorized`].
    pub fn authorize(&mut self, peer: PeerId, auth_id: &str) -> Result<(), RegistryError> {
        self.registry.set_auth_id(peer, auth_id)?;
        if let Some(connection) = self.registry.get_mut(peer) {
            connection.state = ConnectionState::Authorized;
        }
        Ok(())
    }

    /// Sets the application-driven lifecycle state of `peer`.
    pub fn set_state(&mut self, peer: PeerId, state: ConnectionState) -> Result<(), RegistryError> {
        let connection = self
            .registry
            .get_mut(peer)
            .ok_or(RegistryError::UnknownPeer(peer))?;
        connection.state = state;
        Ok(())
    }

    /// Round-trip time of `peer` in milliseconds, or
    /// [`shared::PING_UNAVAILABLE`] while not listening or without a sample.
    pub fn ping(&self, peer: PeerId) -> i32 {
        self.driver.rtt(peer)
    }

    /// Sends one `(kind, buffer)` envelope to `peer`.
    pub fn send_to(
        &mut self,
        peer: PeerId,
        kind: &str,
        channel: ChannelKind,
        buffer: Bytes,
    ) -> Result<(), HostError> {
        self.driver.send(peer, kind, channel, buffer)
    }

    /// Sends one envelope to every live connection, iterating a registry
    /// snapshot. Per-peer transport errors are logged and skip only that
    /// peer; the number of successful sends is returned.
    pub fn broadcast(&mut self, kind: &str, channel: ChannelKind, buffer: Bytes) -> usize {
        let mut delivered = 0;
        for peer in self.registry.snapshot() {
            match self.driver.send(peer, kind, channel, buffer.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => warn!(peer, %err, "broadcast send failed"),
            }
        }
        delivered
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.registry.iter()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_listening(&self) -> bool {
        self.driver.is_running()
    }

    /// Releases the link and clears the registry. Idempotent.
    pub fn stop(&mut self) {
        self.driver.stop();
        self.registry.clear();
    }
}

impl<L: Link> std::fmt::Debug for NetworkServer<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServer")
            .field("driver", &self.driver)
            .field("connections", &self.registry.len())
            .field("settings", &self.settings)
            .finish()
    }
}
