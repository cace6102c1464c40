//! The fixed table of QoS channels multiplexed over every connection.
//!
//! Both peers must agree on channel indices, so the table is closed: exactly
//! [`CHANNEL_COUNT`] kinds, installed in the order of [`ChannelKind::ALL`] at
//! host initialization and never touched again for the lifetime of the host.

use serde::{Deserialize, Serialize};

use crate::link::PeerConfig;

/// Index of a channel within a peer configuration. Stable for the lifetime of
/// a host; identical on both ends of a connection.
pub type ChannelId = u8;

/// Number of channels installed on every host.
pub const CHANNEL_COUNT: usize = 11;

/// Delivery contract of a logical sub-stream. Each kind is an immutable
/// (reliability, ordering, fragmentation) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Unreliable,
    UnreliableFragmented,
    UnreliableSequenced,
    Reliable,
    ReliableFragmented,
    ReliableSequenced,
    /// Unreliable, latest-wins: stale state updates are superseded in-flight.
    StateUpdate,
    /// Reliable, latest-wins.
    ReliableStateUpdate,
    /// Reliable with retry-until-ack at the highest send priority.
    AllCostDelivery,
    UnreliableFragmentedSequenced,
    ReliableFragmentedSequenced,
}

/// Ordering guarantee of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrdering {
    /// Messages may arrive in any order.
    Unordered,
    /// Out-of-date messages are dropped; survivors arrive in send order.
    Sequenced,
    /// Only the most recent message matters; older ones are superseded.
    LatestWins,
}

impl ChannelKind {
    /// Every supported kind, in installation order. The position in this
    /// array is the kind's [`ChannelId`].
    pub const ALL: [ChannelKind; CHANNEL_COUNT] = [
        ChannelKind::Unreliable,
        ChannelKind::UnreliableFragmented,
        ChannelKind::UnreliableSequenced,
        ChannelKind::Reliable,
        ChannelKind::ReliableFragmented,
        ChannelKind::ReliableSequenced,
        ChannelKind::StateUpdate,
        ChannelKind::ReliableStateUpdate,
        ChannelKind::AllCostDelivery,
        ChannelKind::UnreliableFragmentedSequenced,
        ChannelKind::ReliableFragmentedSequenced,
    ];

    /// Whether delivery is guaranteed (retransmitted until acknowledged).
    pub fn is_reliable(self) -> bool {
        matches!(
            self,
            ChannelKind::Reliable
                | ChannelKind::ReliableFragmented
                | ChannelKind::ReliableSequenced
                | ChannelKind::ReliableStateUpdate
                | ChannelKind::AllCostDelivery
                | ChannelKind::ReliableFragmentedSequenced
        )
    }

    /// The ordering contract of this kind.
    pub fn ordering(self) -> ChannelOrdering {
        match self {
            ChannelKind::UnreliableSequenced
            | ChannelKind::ReliableSequenced
            | ChannelKind::UnreliableFragmentedSequenced
            | ChannelKind::ReliableFragmentedSequenced => ChannelOrdering::Sequenced,
            ChannelKind::StateUpdate | ChannelKind::ReliableStateUpdate => {
                ChannelOrdering::LatestWins
            }
            _ => ChannelOrdering::Unordered,
        }
    }

    /// Whether payloads larger than one packet are split and reassembled.
    pub fn is_fragmentable(self) -> bool {
        matches!(
            self,
            ChannelKind::UnreliableFragmented
                | ChannelKind::ReliableFragmented
                | ChannelKind::UnreliableFragmentedSequenced
                | ChannelKind::ReliableFragmentedSequenced
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelConfigError {
    #[error("peer configuration already has {0} channels installed")]
    AlreadyConfigured(usize),
}

/// Handle to the installed channel table. Maps between [`ChannelKind`] and the
/// [`ChannelId`] both peers agree on.
#[derive(Debug, Clone)]
pub struct ChannelSet {
    channels: [ChannelKind; CHANNEL_COUNT],
}

impl ChannelSet {
    /// The wire index of `kind`.
    pub fn id_of(&self, kind: ChannelKind) -> ChannelId {
        self.channels
            .iter()
            .position(|k| *k == kind)
            .expect("every kind of the closed channel table is installed") as ChannelId
    }

    /// The kind installed at `id`, if any.
    pub fn kind_of(&self, id: ChannelId) -> Option<ChannelKind> {
        self.channels.get(id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Installs the full channel table onto a fresh peer configuration, in the
/// fixed order of [`ChannelKind::ALL`].
///
/// Fails with [`ChannelConfigError::AlreadyConfigured`] if the configuration
/// already carries channels; the host engine calls this exactly once.
pub fn install_channels(config: &mut PeerConfig) -> Result<ChannelSet, ChannelConfigError> {
    if !config.channels().is_empty() {
        return Err(ChannelConfigError::AlreadyConfigured(
            config.channels().len(),
        ));
    }

    for kind in ChannelKind::ALL {
        config.add_channel(kind);
    }

    Ok(ChannelSet {
        channels: ChannelKind::ALL,
    })
}
