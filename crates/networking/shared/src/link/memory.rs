//! In-memory [`Link`] implementation.
//!
//! Keeps every host in the same process without touching the network stack,
//! for singleplayer-style local runs and for tests. A [`MemoryNetwork`] is the
//! shared wire: hosts opened on links cloned from the same network can reach
//! each other by port, with per-host event queues standing in for sockets.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use bytes::Bytes;
use tracing::warn;

use super::{HostId, HostTopology, Link, LinkConfig, LinkError, LinkEvent, PeerId};
use crate::channels::ChannelId;

/// Where a local peer id points: the remote host and our id in its namespace.
#[derive(Debug, Clone, Copy)]
struct RemoteRef {
    host: HostId,
    peer: PeerId,
}

#[derive(Debug)]
struct HostState {
    topology: HostTopology,
    /// Bound listening port; `None` for ephemeral (connecting) hosts.
    port: Option<u16>,
    max_packet_size: u32,
    /// Receive queue bound, when a reactor config was supplied.
    max_received: Option<usize>,
    events: VecDeque<LinkEvent>,
    peers: HashMap<PeerId, RemoteRef>,
}

#[derive(Debug, Default)]
struct NetworkState {
    next_host: HostId,
    next_peer: PeerId,
    rtt_ms: u32,
    hosts: HashMap<HostId, HostState>,
}

impl NetworkState {
    fn allocate_host(&mut self) -> HostId {
        let id = self.next_host;
        self.next_host += 1;
        id
    }

    fn allocate_peer(&mut self) -> PeerId {
        let id = self.next_peer;
        self.next_peer += 1;
        id
    }

    fn host_by_port(&self, port: u16) -> Option<HostId> {
        self.hosts
            .iter()
            .find(|(_, host)| host.port == Some(port))
            .map(|(id, _)| *id)
    }

    /// Pushes an event onto a host's queue, honoring its receive bound.
    fn push_event(&mut self, host: HostId, event: LinkEvent) {
        let Some(state) = self.hosts.get_mut(&host) else {
            return;
        };
        if let Some(max) = state.max_received {
            if state.events.len() >= max {
                warn!(host, "receive queue full, dropping {event:?}");
                return;
            }
        }
        state.events.push_back(event);
    }

    /// Tears down one side of a connection and notifies the other.
    fn sever(&mut self, host: HostId, peer: PeerId) -> Result<(), LinkError> {
        let remote = {
            let state = self.hosts.get_mut(&host).ok_or(LinkError::UnknownHost(host))?;
            state
                .peers
                .remove(&peer)
                .ok_or(LinkError::UnknownPeer(peer))?
        };

        self.push_event(host, LinkEvent::Disconnected { peer });

        if let Some(remote_state) = self.hosts.get_mut(&remote.host) {
            remote_state.peers.remove(&remote.peer);
        }
        self.push_event(remote.host, LinkEvent::Disconnected { peer: remote.peer });
        Ok(())
    }
}

/// Shared in-process wire. Clone it to hand the same network to several link
/// values; [`MemoryNetwork::link`] mints endpoints attached to it.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a link endpoint attached to this network.
    pub fn link(&self) -> MemoryLink {
        MemoryLink {
            network: self.clone(),
            config: None,
            owned: Vec::new(),
        }
    }

    /// Sets the round-trip time reported for every live connection.
    pub fn set_rtt(&self, rtt_ms: u32) {
        self.lock().rtt_ms = rtt_ms;
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One process-local link endpoint. Hosts opened through this value are torn
/// down again by [`Link::shutdown`].
#[derive(Debug)]
pub struct MemoryLink {
    network: MemoryNetwork,
    config: Option<LinkConfig>,
    owned: Vec<HostId>,
}

impl MemoryLink {
    /// Convenience constructor for a link on its own private network.
    pub fn new() -> Self {
        MemoryNetwork::new().link()
    }

    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

impl Default for MemoryLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        // A dropped endpoint must not leave ghost hosts on the shared wire.
        self.shutdown();
    }
}

impl Link for MemoryLink {
    fn init(&mut self, config: &LinkConfig) -> Result<(), LinkError> {
        if self.config.is_some() {
            return Err(LinkError::AlreadyInitialized);
        }
        self.config = Some(config.clone());
        Ok(())
    }

    fn add_host(&mut self, topology: HostTopology, port: Option<u16>) -> Result<HostId, LinkError> {
        let config = self.config.as_ref().ok_or(LinkError::NotInitialized)?;

        let mut net = self.network.lock();
        if let Some(port) = port {
            if net.host_by_port(port).is_some() {
                return Err(LinkError::PortInUse(port));
            }
        }

        let id = net.allocate_host();
        net.hosts.insert(
            id,
            HostState {
                topology,
                port,
                max_packet_size: config.max_packet_size,
                max_received: config.reactor.map(|r| r.max_received_messages),
                events: VecDeque::new(),
                peers: HashMap::new(),
            },
        );
        self.owned.push(id);
        Ok(id)
    }

    fn connect(&mut self, host: HostId, addr: &str, port: u16) -> Result<PeerId, LinkError> {
        let mut net = self.network.lock();

        let listener = net.host_by_port(port).ok_or_else(|| LinkError::NoListener {
            addr: addr.to_string(),
            port,
        })?;

        let local = net.hosts.get(&host).ok_or(LinkError::UnknownHost(host))?;
        if local.peers.len() >= local.topology.max_peers as usize {
            return Err(LinkError::AtCapacity(host));
        }
        let remote = net
            .hosts
            .get(&listener)
            .ok_or(LinkError::UnknownHost(listener))?;
        if remote.peers.len() >= remote.topology.max_peers as usize {
            return Err(LinkError::AtCapacity(listener));
        }

        let local_view = net.allocate_peer();
        let remote_view = net.allocate_peer();

        if let Some(local) = net.hosts.get_mut(&host) {
            local.peers.insert(
                local_view,
                RemoteRef {
                    host: listener,
                    peer: remote_view,
                },
            );
        }
        if let Some(remote) = net.hosts.get_mut(&listener) {
            remote.peers.insert(
                remote_view,
                RemoteRef {
                    host,
                    peer: local_view,
                },
            );
        }

        net.push_event(host, LinkEvent::Connected { peer: local_view });
        net.push_event(listener, LinkEvent::Connected { peer: remote_view });

        Ok(local_view)
    }

    fn send(
        &mut self,
        host: HostId,
        peer: PeerId,
        channel: ChannelId,
        payload: Bytes,
    ) -> Result<(), LinkError> {
        let mut net = self.network.lock();

        let state = net.hosts.get(&host).ok_or(LinkError::UnknownHost(host))?;
        if channel as usize >= state.topology.peer_config.channels().len() {
            return Err(LinkError::UnknownChannel(channel));
        }
        if payload.len() > state.max_packet_size as usize {
            return Err(LinkError::PacketTooLarge {
                size: payload.len(),
                max: state.max_packet_size,
            });
        }
        let remote = *state.peers.get(&peer).ok_or(LinkError::UnknownPeer(peer))?;

        net.push_event(
            remote.host,
            LinkEvent::Data {
                peer: remote.peer,
                channel,
                payload,
            },
        );
        Ok(())
    }

    fn poll(&mut self, host: HostId) -> LinkEvent {
        let mut net = self.network.lock();
        match net.hosts.get_mut(&host) {
            Some(state) => state.events.pop_front().unwrap_or(LinkEvent::Nothing),
            None => {
                warn!(host, "poll on unknown host");
                LinkEvent::Nothing
            }
        }
    }

    fn disconnect(&mut self, host: HostId, peer: PeerId) -> Result<(), LinkError> {
        self.network.lock().sever(host, peer)
    }

    fn rtt(&self, host: HostId, peer: PeerId) -> Option<u32> {
        let net = self.network.lock();
        let state = net.hosts.get(&host)?;
        state.peers.contains_key(&peer).then_some(net.rtt_ms)
    }

    fn shutdown(&mut self) {
        let mut net = self.network.lock();
        for host in self.owned.drain(..) {
            let Some(state) = net.hosts.remove(&host) else {
                continue;
            };
            for remote in state.peers.values() {
                if let Some(remote_state) = net.hosts.get_mut(&remote.host) {
                    remote_state.peers.remove(&remote.peer);
                }
                net.push_event(remote.host, LinkEvent::Disconnected { peer: remote.peer });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::install_channels;
    use crate::link::{PeerConfig, ReactorConfig};

    fn topology(max_peers: u16) -> HostTopology {
        let mut peer_config = PeerConfig::default();
        install_channels(&mut peer_config).unwrap();
        HostTopology {
            peer_config,
            max_peers,
        }
    }

    fn config() -> LinkConfig {
        LinkConfig {
            max_packet_size: 4096,
            reactor: None,
        }
    }

    fn listener_and_dialer() -> (MemoryNetwork, MemoryLink, MemoryLink, HostId, HostId) {
        let network = MemoryNetwork::new();
        let mut server = network.link();
        let mut client = network.link();
        server.init(&config()).unwrap();
        client.init(&config()).unwrap();
        let server_host = server.add_host(topology(100), Some(7777)).unwrap();
        let client_host = client.add_host(topology(1), None).unwrap();
        (network, server, client, server_host, client_host)
    }

    #[test]
    fn test_init_is_single_shot() {
        let mut link = MemoryLink::new();
        link.init(&config()).unwrap();
        assert!(matches!(
            link.init(&config()),
            Err(LinkError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_add_host_requires_init() {
        let mut link = MemoryLink::new();
        assert!(matches!(
            link.add_host(topology(1), None),
            Err(LinkError::NotInitialized)
        ));
    }

    #[test]
    fn test_port_collision_rejected() {
        let network = MemoryNetwork::new();
        let mut a = network.link();
        let mut b = network.link();
        a.init(&config()).unwrap();
        b.init(&config()).unwrap();
        a.add_host(topology(4), Some(7777)).unwrap();
        assert!(matches!(
            b.add_host(topology(4), Some(7777)),
            Err(LinkError::PortInUse(7777))
        ));
    }

    #[test]
    fn test_connect_delivers_symmetric_events() {
        let (_network, mut server, mut client, server_host, client_host) = listener_and_dialer();

        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();

        assert_eq!(
            client.poll(client_host),
            LinkEvent::Connected { peer: server_peer }
        );
        assert_eq!(client.poll(client_host), LinkEvent::Nothing);

        let LinkEvent::Connected { peer: client_peer } = server.poll(server_host) else {
            panic!("expected connect event on the listener");
        };
        assert_eq!(server.poll(server_host), LinkEvent::Nothing);
        assert_ne!(server_peer, client_peer);
    }

    #[test]
    fn test_connect_without_listener_fails() {
        let (_network, _server, mut client, _server_host, client_host) = listener_and_dialer();
        assert!(matches!(
            client.connect(client_host, "127.0.0.1", 9999),
            Err(LinkError::NoListener { port: 9999, .. })
        ));
    }

    #[test]
    fn test_capacity_one_dialer_cannot_connect_twice() {
        let (network, _server, mut client, _server_host, client_host) = listener_and_dialer();
        let mut second_server = network.link();
        second_server.init(&config()).unwrap();
        second_server.add_host(topology(100), Some(7778)).unwrap();

        client.connect(client_host, "127.0.0.1", 7777).unwrap();
        assert!(matches!(
            client.connect(client_host, "127.0.0.1", 7778),
            Err(LinkError::AtCapacity(_))
        ));
    }

    #[test]
    fn test_send_routes_payload_to_remote_queue() {
        let (_network, mut server, mut client, server_host, client_host) = listener_and_dialer();
        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();
        let _ = client.poll(client_host);
        let LinkEvent::Connected { peer: client_peer } = server.poll(server_host) else {
            panic!("expected connect event");
        };

        client
            .send(client_host, server_peer, 3, Bytes::from_static(b"ping"))
            .unwrap();

        assert_eq!(
            server.poll(server_host),
            LinkEvent::Data {
                peer: client_peer,
                channel: 3,
                payload: Bytes::from_static(b"ping"),
            }
        );
    }

    #[test]
    fn test_send_validates_channel_and_size() {
        let (_network, _server, mut client, _server_host, client_host) = listener_and_dialer();
        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();

        assert!(matches!(
            client.send(client_host, server_peer, 42, Bytes::new()),
            Err(LinkError::UnknownChannel(42))
        ));
        let oversized = Bytes::from(vec![0u8; 5000]);
        assert!(matches!(
            client.send(client_host, server_peer, 0, oversized),
            Err(LinkError::PacketTooLarge { size: 5000, .. })
        ));
    }

    #[test]
    fn test_receive_queue_bound_drops_excess() {
        let network = MemoryNetwork::new();
        let mut server = network.link();
        let mut client = network.link();
        server
            .init(&LinkConfig {
                max_packet_size: 4096,
                reactor: Some(ReactorConfig {
                    max_received_messages: 2,
                    max_sent_messages: 2,
                }),
            })
            .unwrap();
        client.init(&config()).unwrap();
        let server_host = server.add_host(topology(100), Some(7777)).unwrap();
        let client_host = client.add_host(topology(1), None).unwrap();

        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();
        // Connect event already occupies one of the two listener slots.
        for _ in 0..5 {
            client
                .send(client_host, server_peer, 0, Bytes::from_static(b"x"))
                .unwrap();
        }

        let mut delivered = 0;
        while server.poll(server_host) != LinkEvent::Nothing {
            delivered += 1;
        }
        assert_eq!(delivered, 2);
    }

    #[test]
    fn test_disconnect_notifies_both_sides() {
        let (_network, mut server, mut client, server_host, client_host) = listener_and_dialer();
        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();
        let _ = client.poll(client_host);
        let LinkEvent::Connected { peer: client_peer } = server.poll(server_host) else {
            panic!("expected connect event");
        };

        client.disconnect(client_host, server_peer).unwrap();

        assert_eq!(
            client.poll(client_host),
            LinkEvent::Disconnected { peer: server_peer }
        );
        assert_eq!(
            server.poll(server_host),
            LinkEvent::Disconnected { peer: client_peer }
        );
        // Gone on both sides.
        assert!(matches!(
            client.send(client_host, server_peer, 0, Bytes::new()),
            Err(LinkError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_shutdown_disconnects_remotes() {
        let (_network, mut server, mut client, server_host, client_host) = listener_and_dialer();
        let _server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();
        let _ = client.poll(client_host);
        let LinkEvent::Connected { peer: client_peer } = server.poll(server_host) else {
            panic!("expected connect event");
        };

        client.shutdown();

        assert_eq!(
            server.poll(server_host),
            LinkEvent::Disconnected { peer: client_peer }
        );
        // Shutdown is idempotent and the client host is gone.
        client.shutdown();
        assert_eq!(client.poll(client_host), LinkEvent::Nothing);
    }

    #[test]
    fn test_rtt_reports_for_live_peers_only() {
        let (network, _server, mut client, _server_host, client_host) = listener_and_dialer();
        network.set_rtt(35);

        assert_eq!(client.rtt(client_host, 999), None);
        let server_peer = client.connect(client_host, "127.0.0.1", 7777).unwrap();
        assert_eq!(client.rtt(client_host, server_peer), Some(35));
    }
}
