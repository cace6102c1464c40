//! Integration tests for the full server/client pair over the in-memory
//! link: connection lifecycle through the registry, tick gating, broadcast
//! and ping.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use client::{ClientEvent, ClientSettings, NetworkClient};
use server::{ConnectionState, NetworkServer, ServerEvent, ServerSettings};
use shared::{ChannelKind, MemoryLink, MemoryNetwork, PeerId, PING_UNAVAILABLE};

fn listening_server(network: &MemoryNetwork, port: u16) -> NetworkServer<MemoryLink> {
    let mut server = NetworkServer::new(
        ServerSettings {
            tick_rate: 64,
            ..ServerSettings::default()
        },
        network.link(),
    );
    server.initialize().unwrap();
    server.start(port).unwrap();
    server
}

fn connected_client(network: &MemoryNetwork, port: u16) -> NetworkClient<MemoryLink> {
    let mut client = NetworkClient::new(ClientSettings::default(), network.link());
    client.initialize().unwrap();
    client.connect("127.0.0.1", port).unwrap();
    client
}

#[test]
fn test_connect_tick_lookup_disconnect_scenario() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);
    let mut client = connected_client(&network, 7777);

    // One server tick past the threshold registers the connection.
    let events = server.tick(1.0 / 64.0).unwrap();
    let [ServerEvent::ClientConnected { peer }] = events[..] else {
        panic!("expected one connect event, got {events:?}");
    };

    let connection = server.connection(peer).unwrap();
    assert_eq!(connection.peer(), peer);
    assert_eq!(connection.state, ConnectionState::Connecting);
    assert_eq!(server.connection_count(), 1);

    assert_eq!(client.tick(1.0).unwrap(), vec![ClientEvent::Connected]);
    assert!(client.connected());

    // Client goes away; the next drained tick removes the registry entry.
    client.disconnect();
    let events = server.tick(1.0).unwrap();
    assert_eq!(events, vec![ServerEvent::ClientDisconnected { peer }]);
    assert!(server.connection(peer).is_none());
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_connect_and_disconnect_in_same_pass_leaves_no_entry() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);

    {
        let _client = connected_client(&network, 7777);
        // Dropped here: connect and disconnect both queued before the tick.
    }

    let events = server.tick(1.0).unwrap();
    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], ServerEvent::ClientConnected { .. }));
    assert!(matches!(events[1], ServerEvent::ClientDisconnected { .. }));
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_registry_end_state_independent_of_tick_batching() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);

    let _a = connected_client(&network, 7777);
    let _b = connected_client(&network, 7777);

    // Split over several sub-threshold ticks: drains happen only when the
    // accumulator crosses 1/64s, but the end state is the same as one pass.
    let mut events = Vec::new();
    for _ in 0..4 {
        events.extend(server.tick(1.0 / 256.0).unwrap());
    }
    assert_eq!(events.len(), 2);
    assert_eq!(server.connection_count(), 2);

    let _c = connected_client(&network, 7777);
    events.extend(server.tick(1.0).unwrap());
    assert_eq!(events.len(), 3);
    assert_eq!(server.connection_count(), 3);
}

#[test]
fn test_auth_lookup_and_state_transitions() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);
    let _client = connected_client(&network, 7777);

    let events = server.tick(1.0).unwrap();
    let [ServerEvent::ClientConnected { peer }] = events[..] else {
        panic!("expected one connect event");
    };

    server.authorize(peer, "account:42").unwrap();
    let connection = server.connection_by_auth("account:42").unwrap();
    assert_eq!(connection.peer(), peer);
    assert_eq!(connection.state, ConnectionState::Authorized);

    server.set_state(peer, ConnectionState::Connected).unwrap();
    assert_eq!(
        server.connection(peer).unwrap().state,
        ConnectionState::Connected
    );
}

#[test]
fn test_message_roundtrip_and_broadcast() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);
    let mut client_a = connected_client(&network, 7777);
    let mut client_b = connected_client(&network, 7777);

    let received: Arc<Mutex<Vec<(PeerId, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    server.on_message("chat.say", move |peer, buffer| {
        sink.lock().unwrap().push((peer, buffer));
    });

    let greetings: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    for client in [&mut client_a, &mut client_b] {
        let counter = Arc::clone(&greetings);
        client.on_message("motd", move |_, _| {
            *counter.lock().unwrap() += 1;
        });
        client.tick(1.0).unwrap();
    }

    server.tick(1.0).unwrap();
    assert_eq!(server.connection_count(), 2);

    client_a
        .send(
            "chat.say",
            ChannelKind::Reliable,
            Bytes::from_static(b"hello"),
        )
        .unwrap();
    server.tick(1.0).unwrap();
    assert_eq!(received.lock().unwrap().len(), 1);

    let delivered = server.broadcast(
        "motd",
        ChannelKind::ReliableSequenced,
        Bytes::from_static(b"welcome"),
    );
    assert_eq!(delivered, 2);

    client_a.tick(1.0).unwrap();
    client_b.tick(1.0).unwrap();
    assert_eq!(*greetings.lock().unwrap(), 2);
}

#[test]
fn test_broadcast_skips_dead_peer_and_counts_live_deliveries() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);
    let mut client_a = connected_client(&network, 7777);
    let mut client_b = connected_client(&network, 7777);

    server.tick(1.0).unwrap();
    assert_eq!(server.connection_count(), 2);

    let greetings: Arc<Mutex<usize>> = Arc::new(Mutex::new(0));
    for client in [&mut client_a, &mut client_b] {
        let counter = Arc::clone(&greetings);
        client.on_message("motd", move |_, _| {
            *counter.lock().unwrap() += 1;
        });
        client.tick(1.0).unwrap();
    }

    // The link connection is gone but the registry entry survives until the
    // next drained tick.
    client_a.disconnect();
    assert_eq!(server.connection_count(), 2);

    let delivered = server.broadcast(
        "motd",
        ChannelKind::ReliableSequenced,
        Bytes::from_static(b"welcome"),
    );
    assert_eq!(delivered, 1);

    client_b.tick(1.0).unwrap();
    assert_eq!(*greetings.lock().unwrap(), 1);

    // The dead peer drops out of the registry on the next pass.
    let events = server.tick(1.0).unwrap();
    assert!(matches!(
        events[..],
        [ServerEvent::ClientDisconnected { .. }]
    ));
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_ping_sentinel_and_live_sample() {
    let network = MemoryNetwork::new();
    network.set_rtt(35);

    let mut server = NetworkServer::new(ServerSettings::default(), network.link());
    assert_eq!(server.ping(0), PING_UNAVAILABLE);

    server.initialize().unwrap();
    assert_eq!(server.ping(0), PING_UNAVAILABLE);

    server.start(7777).unwrap();
    let _client = connected_client(&network, 7777);
    let events = server.tick(1.0).unwrap();
    let [ServerEvent::ClientConnected { peer }] = events[..] else {
        panic!("expected one connect event");
    };
    assert_eq!(server.ping(peer), 35);

    server.stop();
    assert_eq!(server.ping(peer), PING_UNAVAILABLE);
}

#[test]
fn test_stop_clears_registry_and_is_idempotent() {
    let network = MemoryNetwork::new();
    let mut server = listening_server(&network, 7777);
    let _client = connected_client(&network, 7777);
    server.tick(1.0).unwrap();
    assert_eq!(server.connection_count(), 1);

    server.stop();
    server.stop();
    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_listening());
    assert!(server.tick(1.0).is_err());
}
