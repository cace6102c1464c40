//! Per-peer connection records and the registry that exclusively owns them.
//!
//! Connections are only ever created by [`ConnectionRegistry::insert`] when
//! the link reports a connect and destroyed by [`ConnectionRegistry::remove`]
//! on disconnect; callers look them up, they never construct them. The
//! registry is mutated exclusively from within the owning server's `tick`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use shared::PeerId;
use tracing::warn;

/// Application-driven lifecycle of a connection. The engine only ever sets
/// [`ConnectionState::Connecting`] at insert; every further transition is up
/// to the layers above (auth, scene sync).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connecting,
    Authorizing,
    Authorized,
    SyncingScene,
    SyncingObjects,
    Connected,
}

/// The engine's record of one remote peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    peer: PeerId,
    auth_id: Option<String>,
    /// Current lifecycle state; transitions are application-driven.
    pub state: ConnectionState,
}

impl Connection {
    fn new(peer: PeerId) -> Self {
        Self {
            peer,
            auth_id: None,
            state: ConnectionState::Connecting,
        }
    }

    /// Link-assigned transport id. Immutable for the connection's lifetime.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Application auth id, once assigned via
    /// [`ConnectionRegistry::set_auth_id`].
    pub fn auth_id(&self) -> Option<&str> {
        self.auth_id.as_deref()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("peer {0} already registered")]
    DuplicatePeer(PeerId),
    #[error("peer {0} not registered")]
    UnknownPeer(PeerId),
    #[error("auth id {0:?} already belongs to another connection")]
    AuthIdTaken(String),
    #[error("peer {0} already has an auth id")]
    AuthIdAlreadySet(PeerId),
}

/// Owns the set of live connections of a listening host.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<PeerId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a connection in state `Connecting`. The registry is left
    /// unchanged when `peer` is already present.
    pub fn insert(&mut self, peer: PeerId) -> Result<&mut Connection, RegistryError> {
        if self.connections.contains_key(&peer) {
            return Err(RegistryError::DuplicatePeer(peer));
        }
        Ok(self
            .connections
            .entry(peer)
            .or_insert_with(|| Connection::new(peer)))
    }

    /// Deletes the connection for `peer`. Absence is not an error: disconnect
    /// events may race with application-driven removal.
    pub fn remove(&mut self, peer: PeerId) -> Option<Connection> {
        let removed = self.connections.remove(&peer);
        if removed.is_none() {
            warn!(peer, "removal of unknown connection");
        }
        removed
    }

    pub fn get(&self, peer: PeerId) -> Option<&Connection> {
        self.connections.get(&peer)
    }

    pub fn get_mut(&mut self, peer: PeerId) -> Option<&mut Connection> {
        self.connections.get_mut(&peer)
    }

    /// Assigns the application auth id for `peer`, enforcing uniqueness
    /// across live connections and write-once per connection.
    pub fn set_auth_id(&mut self, peer: PeerId, auth_id: &str) -> Result<(), RegistryError> {
        if self
            .connections
            .values()
            .any(|conn| conn.auth_id.as_deref() == Some(auth_id))
        {
            return Err(RegistryError::AuthIdTaken(auth_id.to_string()));
        }
        let connection = self
            .connections
            .get_mut(&peer)
            .ok_or(RegistryError::UnknownPeer(peer))?;
        if connection.auth_id.is_some() {
            return Err(RegistryError::AuthIdAlreadySet(peer));
        }
        connection.auth_id = Some(auth_id.to_string());
        Ok(())
    }

    /// Finds the single connection holding `auth_id`. Uniqueness is enforced
    /// at assignment, so at most one match can exist.
    pub fn find_by_auth_id(&self, auth_id: &str) -> Option<&Connection> {
        self.connections
            .values()
            .find(|conn| conn.auth_id.as_deref() == Some(auth_id))
    }

    /// Stable snapshot of live peer ids (sorted), safe to iterate while the
    /// registry is mutated afterwards, e.g. for a broadcast.
    pub fn snapshot(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.connections.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn clear(&mut self) {
        self.connections.clear();
    }
}
