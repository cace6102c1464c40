//! The tick-driven host engine shared by both roles.
//!
//! [`HostDriver`] owns one [`Link`] endpoint and turns the caller's per-frame
//! `tick(delta)` into fixed-rate drain passes: once the accumulated time
//! crosses one tick interval, every pending link event is polled and
//! dispatched before the pass is considered complete. Connect/disconnect
//! events surface as [`PeerChange`]s in the returned [`TickReport`]; data
//! events are decoded into envelopes and routed to the handler registered for
//! their kind. Draining the queue fully each pass is what keeps queue depth
//! bounded when the event rate exceeds the tick rate.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::channels::{install_channels, ChannelConfigError, ChannelKind, ChannelSet};
use crate::envelope::{CodecError, Envelope, EnvelopeCodec};
use crate::link::{
    HostId, HostTopology, Link, LinkConfig, LinkError, LinkEvent, PeerConfig, PeerId, ReactorConfig,
};

/// Sentinel returned by ping queries when no sample is available, e.g. while
/// the host is not running. "Ping unknown" is a normal state, not an error.
pub const PING_UNAVAILABLE: i32 = -1;

/// Lifecycle of a host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPhase {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

/// Which end of the topology this engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostRole {
    /// Many-peer, bound to a port.
    Listener,
    /// Single-peer, ephemeral binding.
    Connector,
}

/// Recoverable host errors. Precondition violations of `tick` use the
/// separate fatal [`NotRunning`] type instead.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("host already initialized")]
    AlreadyInitialized,
    #[error("host not initialized")]
    NotInitialized,
    #[error("host already running")]
    AlreadyRunning,
    #[error("host not running")]
    NotRunning,
    #[error("host initialized as {initialized:?}, cannot open as {requested:?}")]
    WrongRole {
        initialized: HostRole,
        requested: HostRole,
    },
    #[error(transparent)]
    Channels(#[from] ChannelConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Fatal precondition violation: `tick` was invoked while the engine is not
/// running. This indicates a caller bug, not a transport condition.
#[derive(Debug, thiserror::Error)]
#[error("tick invoked while host is not running")]
pub struct NotRunning;

/// Connection lifecycle change observed during a drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerChange {
    Joined(PeerId),
    Left(PeerId),
}

/// Accounting for one `tick` call. Every polled event ends up either in
/// `peer_changes`, in `dispatched` or in `skipped`; nothing is silently lost.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Whether a drain pass ran (the accumulator crossed one tick interval).
    pub drained: bool,
    /// Connects/disconnects in arrival order.
    pub peer_changes: Vec<PeerChange>,
    /// Data events routed to a registered handler.
    pub dispatched: usize,
    /// Data events logged and skipped (undecodable or no handler).
    pub skipped: usize,
}

type MessageHandler = Box<dyn FnMut(PeerId, Bytes) + Send>;

/// The shared engine driving one transport endpoint at a fixed tick rate.
pub struct HostDriver<L: Link> {
    link: L,
    codec: Box<dyn EnvelopeCodec + Send>,
    phase: HostPhase,
    role: Option<HostRole>,
    tick_rate: u32,
    max_packet_size: u32,
    accumulator: f32,
    host: Option<HostId>,
    peer_config: PeerConfig,
    channels: Option<ChannelSet>,
    handlers: HashMap<String, MessageHandler>,
    /// Fixed-capacity scratch for envelope encoding, reused across sends.
    scratch: Vec<u8>,
}

impl<L: Link> HostDriver<L> {
    pub fn new(link: L, codec: Box<dyn EnvelopeCodec + Send>) -> Self {
        Self {
            link,
            codec,
            phase: HostPhase::Uninitialized,
            role: None,
            tick_rate: crate::DEFAULT_SERVER_TICK_RATE,
            max_packet_size: crate::DEFAULT_SERVER_MAX_PACKET_SIZE,
            accumulator: 0.0,
            host: None,
            peer_config: PeerConfig::default(),
            channels: None,
            handlers: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    /// Configures the link and installs the channel table.
    ///
    /// Single-shot: a second call fails with [`HostError::AlreadyInitialized`]
    /// rather than re-touching transport state. The listener role gets
    /// bounded receive/send queues; the connector keeps the link defaults.
    pub fn initialize(
        &mut self,
        role: HostRole,
        max_packet_size: u32,
        tick_rate: u32,
    ) -> Result<(), HostError> {
        if self.phase != HostPhase::Uninitialized {
            return Err(HostError::AlreadyInitialized);
        }

        let config = LinkConfig {
            max_packet_size,
            reactor: match role {
                HostRole::Listener => Some(ReactorConfig::default()),
                HostRole::Connector => None,
            },
        };
        self.link.init(&config)?;

        self.channels = Some(install_channels(&mut self.peer_config)?);

        self.role = Some(role);
        self.max_packet_size = max_packet_size;
        self.tick_rate = tick_rate.max(1);
        self.scratch = Vec::with_capacity(max_packet_size as usize);
        self.phase = HostPhase::Initialized;
        debug!(?role, max_packet_size, tick_rate, "host initialized");
        Ok(())
    }

    /// Binds a listening host on `port` with capacity `max_peers`.
    pub fn open_listener(&mut self, port: u16, max_peers: u16) -> Result<(), HostError> {
        self.ensure_can_open(HostRole::Listener)?;
        let topology = HostTopology {
            peer_config: self.peer_config.clone(),
            max_peers,
        };
        let host = self.link.add_host(topology, Some(port))?;
        self.host = Some(host);
        self.phase = HostPhase::Running;
        info!(port, max_peers, "listening");
        Ok(())
    }

    /// Opens an ephemeral single-peer host and connects it to `addr:port`.
    /// Returns this host's id for the remote peer; the connection is live
    /// once the link reports the connect event in a later drain pass.
    pub fn open_connector(&mut self, addr: &str, port: u16) -> Result<PeerId, HostError> {
        self.ensure_can_open(HostRole::Connector)?;
        let topology = HostTopology {
            peer_config: self.peer_config.clone(),
            max_peers: 1,
        };
        let host = self.link.add_host(topology, None)?;
        let peer = match self.link.connect(host, addr, port) {
            Ok(peer) => peer,
            Err(err) => {
                // Leave the engine re-openable rather than half-running.
                self.link.shutdown();
                self.host = None;
                return Err(err.into());
            }
        };
        self.host = Some(host);
        self.phase = HostPhase::Running;
        info!(addr, port, "connecting");
        Ok(peer)
    }

    fn ensure_can_open(&self, requested: HostRole) -> Result<(), HostError> {
        match self.phase {
            HostPhase::Uninitialized | HostPhase::Stopped => return Err(HostError::NotInitialized),
            HostPhase::Running => return Err(HostError::AlreadyRunning),
            HostPhase::Initialized => {}
        }
        // Reactor queue bounds were chosen for the initialized role.
        match self.role {
            Some(initialized) if initialized != requested => Err(HostError::WrongRole {
                initialized,
                requested,
            }),
            _ => Ok(()),
        }
    }

    /// Accumulates `delta` seconds and, once one tick interval has elapsed,
    /// performs a drain pass over all pending link events.
    ///
    /// The remainder beyond one interval carries into the next call, so tick
    /// cadence stays aligned with real elapsed time.
    pub fn tick(&mut self, delta: f32) -> Result<TickReport, NotRunning> {
        if self.phase != HostPhase::Running {
            return Err(NotRunning);
        }
        let Some(host) = self.host else {
            return Err(NotRunning);
        };

        let mut report = TickReport::default();
        self.accumulator += delta;
        let interval = 1.0 / self.tick_rate as f32;
        if self.accumulator < interval {
            return Ok(report);
        }

        report.drained = true;
        loop {
            match self.link.poll(host) {
                LinkEvent::Nothing => break,
                LinkEvent::Connected { peer } => {
                    trace!(peer, "peer connected");
                    report.peer_changes.push(PeerChange::Joined(peer));
                }
                LinkEvent::Data {
                    peer,
                    channel,
                    payload,
                } => self.dispatch_data(peer, channel, payload, &mut report),
                LinkEvent::Disconnected { peer } => {
                    trace!(peer, "peer disconnected");
                    report.peer_changes.push(PeerChange::Left(peer));
                }
            }
        }
        self.accumulator -= interval;

        Ok(report)
    }

    fn dispatch_data(&mut self, peer: PeerId, channel: u8, payload: Bytes, report: &mut TickReport) {
        let envelope = match self.codec.decode(&payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(peer, channel, %err, "skipping undecodable payload");
                report.skipped += 1;
                return;
            }
        };
        match self.handlers.get_mut(&envelope.kind) {
            Some(handler) => {
                handler(peer, envelope.buffer);
                report.dispatched += 1;
            }
            None => {
                warn!(peer, kind = %envelope.kind, "skipping message without handler");
                report.skipped += 1;
            }
        }
    }

    /// Registers the handler invoked for envelopes of `kind` during drain
    /// passes. A handler already registered for `kind` is replaced.
    pub fn on_message<F>(&mut self, kind: impl Into<String>, handler: F)
    where
        F: FnMut(PeerId, Bytes) + Send + 'static,
    {
        let kind = kind.into();
        if self.handlers.insert(kind.clone(), Box::new(handler)).is_some() {
            debug!(%kind, "message handler replaced");
        }
    }

    /// Encodes `(kind, buffer)` into an envelope and queues it for `peer` on
    /// the channel of the given delivery contract.
    pub fn send(
        &mut self,
        peer: PeerId,
        kind: &str,
        channel: ChannelKind,
        buffer: Bytes,
    ) -> Result<(), HostError> {
        if self.phase != HostPhase::Running {
            return Err(HostError::NotRunning);
        }
        let host = self.host.ok_or(HostError::NotRunning)?;
        let channels = self.channels.as_ref().ok_or(HostError::NotInitialized)?;
        let channel_id = channels.id_of(channel);

        let envelope = Envelope {
            kind: kind.to_string(),
            buffer,
        };
        self.scratch.clear();
        self.codec.encode_into(&envelope, &mut self.scratch)?;

        self.link
            .send(host, peer, channel_id, Bytes::copy_from_slice(&self.scratch))?;
        Ok(())
    }

    /// Last round-trip time for `peer` in milliseconds, or
    /// [`PING_UNAVAILABLE`] while the host is not running or the link has no
    /// sample.
    pub fn rtt(&self, peer: PeerId) -> i32 {
        if self.phase != HostPhase::Running {
            return PING_UNAVAILABLE;
        }
        let Some(host) = self.host else {
            return PING_UNAVAILABLE;
        };
        self.link
            .rtt(host, peer)
            .map(|ms| ms as i32)
            .unwrap_or(PING_UNAVAILABLE)
    }

    /// Releases the link endpoint. Idempotent: stopping twice (or stopping a
    /// never-started engine) is a no-op.
    pub fn stop(&mut self) {
        if self.phase == HostPhase::Stopped {
            return;
        }
        if self.host.take().is_some() {
            self.link.shutdown();
        }
        self.accumulator = 0.0;
        self.phase = HostPhase::Stopped;
        debug!("host stopped");
    }

    pub fn phase(&self) -> HostPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == HostPhase::Running
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// The installed channel table; `None` before initialization.
    pub fn channels(&self) -> Option<&ChannelSet> {
        self.channels.as_ref()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

impl<L: Link> std::fmt::Debug for HostDriver<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver")
            .field("phase", &self.phase)
            .field("role", &self.role)
            .field("tick_rate", &self.tick_rate)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
