//! Radio subsystem boundary
//!
//! Defines the types exchanged with the radio driver and the closed error
//! taxonomy the repair logic in [`crate::messenger`] matches on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

/// Largest payload the radio hardware accepts in a single datagram.
pub const MAX_PAYLOAD_SIZE: usize = 250;

/// Shared handle to a radio driver.
///
/// A tokio mutex because receive waits hold the guard across a suspension
/// point. The core is single-threaded and cooperative; the mutex serializes
/// component access, it does not guard against parallelism.
pub type RadioHandle<R> = Arc<Mutex<R>>;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Transient radio conditions that clear on their own if the caller backs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransientKind {
    /// The outbound hardware queue is full.
    TxQueueFull,
    /// The driver is out of datagram buffers.
    NoBuffers,
    /// The driver timed out internally before the frame left the air.
    InternalTimeout,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::TxQueueFull => write!(f, "tx queue full"),
            TransientKind::NoBuffers => write!(f, "out of buffers"),
            TransientKind::InternalTimeout => write!(f, "driver timeout"),
        }
    }
}

/// Errors reported by the radio driver.
///
/// A closed set so repair logic is exhaustive pattern matching: `Inactive`
/// and `UnknownPeer` are recoverable by repair, `Transient` is worth
/// retrying with backoff, `Fatal` is always surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RadioError {
    #[error("radio interface is not active")]
    Inactive,

    #[error("peer {0} is not registered")]
    UnknownPeer(PeerAddress),

    #[error("transient radio condition: {0}")]
    Transient(TransientKind),

    #[error("fatal radio failure: {0}")]
    Fatal(String),
}

impl RadioError {
    /// Whether this error can never be repaired or retried away.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RadioError::Fatal(_))
    }
}

/// Error parsing a textual hardware address.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AddressParseError {
    #[error("hardware addresses are 6 bytes")]
    InvalidLength,

    #[error("invalid hex in address: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

/// A channel number outside the range supported by the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("channel {0} outside supported range {min}..={max}", min = Channel::MIN.number(), max = Channel::MAX.number())]
pub struct InvalidChannel(pub u8);

// ============================================================================
// DATA MODEL
// ============================================================================

/// Fixed 6-byte hardware address of a remote radio endpoint.
///
/// Equality is byte-wise. Displays and parses in the usual colon-separated
/// hex form (`aa:bb:cc:dd:ee:ff`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress([u8; 6]);

impl PeerAddress {
    /// The all-ones broadcast address.
    pub const BROADCAST: PeerAddress = PeerAddress([0xff; 6]);

    /// Wrap raw address bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for PeerAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(compact)?;
        let bytes: [u8; 6] = bytes
            .try_into()
            .map_err(|_| AddressParseError::InvalidLength)?;
        Ok(PeerAddress(bytes))
    }
}

/// A numbered frequency slot. Only one is active locally at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Channel(u8);

impl Channel {
    /// Lowest channel supported by the hardware.
    pub const MIN: Channel = Channel(1);
    /// Highest channel supported by the hardware.
    pub const MAX: Channel = Channel(14);

    /// Validate and wrap a channel number.
    pub fn new(number: u8) -> Result<Self, InvalidChannel> {
        if (Self::MIN.0..=Self::MAX.0).contains(&number) {
            Ok(Channel(number))
        } else {
            Err(InvalidChannel(number))
        }
    }

    /// The channel number.
    pub const fn number(&self) -> u8 {
        self.0
    }

    /// Every supported channel, ascending.
    pub fn all() -> impl Iterator<Item = Channel> {
        (Self::MIN.0..=Self::MAX.0).map(Channel)
    }
}

impl TryFrom<u8> for Channel {
    type Error = InvalidChannel;

    fn try_from(number: u8) -> Result<Self, Self::Error> {
        Channel::new(number)
    }
}

impl From<Channel> for u8 {
    fn from(channel: Channel) -> u8 {
        channel.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One received datagram: who sent it and what they sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    /// Hardware address of the sender.
    pub sender: PeerAddress,
    /// Opaque payload, at most [`MAX_PAYLOAD_SIZE`] bytes.
    pub payload: Vec<u8>,
}

// ============================================================================
// DRIVER TRAIT
// ============================================================================

/// Capabilities the core requires from the radio driver.
///
/// The active channel and the peer table are process-wide state owned by the
/// implementation; [`crate::scan::ChannelScanner`] and
/// [`crate::messenger::ResilientMessenger`] mutate them through this trait
/// and never through ambient globals, so tests can substitute a fake.
///
/// Peer-table invariant: any address `send` succeeds for was present in the
/// table before the transmit. Receiving from an unregistered address is
/// always legal.
#[async_trait]
pub trait RadioSubsystem: Send {
    /// Whether the radio interface is up.
    fn is_active(&self) -> bool;

    /// Bring the interface up or down. Idempotent.
    fn activate(&mut self, on: bool) -> Result<(), RadioError>;

    /// The currently active channel.
    fn active_channel(&self) -> Channel;

    /// Switch the active channel.
    fn set_channel(&mut self, channel: Channel) -> Result<(), RadioError>;

    /// Whether `peer` is in the peer table.
    fn has_peer(&self, peer: PeerAddress) -> bool;

    /// Register `peer` in the peer table. Re-registering updates the
    /// recorded channel.
    fn add_peer(&mut self, peer: PeerAddress, channel: Channel) -> Result<(), RadioError>;

    /// Hand `payload` to the hardware for transmission to `peer`.
    ///
    /// Success means accepted for transmission, not acknowledged by the
    /// peer. No partial transmission occurs on failure.
    async fn send(&mut self, peer: PeerAddress, payload: &[u8]) -> Result<(), RadioError>;

    /// Wait up to `timeout` for an inbound datagram. A zero timeout polls
    /// without suspending. `Ok(None)` on expiry.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Datagram>, RadioError>;
}
