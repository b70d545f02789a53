//! Scriptable radio double for tests
//!
//! [`FakeRadio`] models just enough driver behavior to exercise the core:
//! per-peer home channels (a datagram reaches a peer only while the peer's
//! home channel is active, in which case the payload is echoed back),
//! scripted send faults, and a manually seedable inbox. All waits go through
//! tokio time, so paused-clock tests stay deterministic.
//!
//! Available to downstream crates behind the `test-utils` feature.

use crate::radio::{Channel, Datagram, PeerAddress, RadioError, RadioSubsystem};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

/// In-memory [`RadioSubsystem`] with scriptable behavior and observation
/// counters.
pub struct FakeRadio {
    active: bool,
    channel: Channel,
    peers: HashMap<PeerAddress, Channel>,
    homes: HashMap<PeerAddress, Channel>,
    inbox: VecDeque<Datagram>,
    send_faults: VecDeque<RadioError>,
    auto_reply: bool,

    /// Every accepted transmission: recipient, payload, channel it left on.
    pub sent: Vec<(PeerAddress, Vec<u8>, Channel)>,
    /// Every channel switch, in order.
    pub channel_history: Vec<Channel>,
    /// Every peer-table insertion, in order.
    pub registrations: Vec<(PeerAddress, Channel)>,
    /// How many times the radio was brought up.
    pub activations: u32,
}

impl FakeRadio {
    /// Inactive radio on the lowest channel, empty peer table.
    pub fn new() -> Self {
        Self {
            active: false,
            channel: Channel::MIN,
            peers: HashMap::new(),
            homes: HashMap::new(),
            inbox: VecDeque::new(),
            send_faults: VecDeque::new(),
            auto_reply: true,
            sent: Vec::new(),
            channel_history: Vec::new(),
            registrations: Vec::new(),
            activations: 0,
        }
    }

    /// Make `peer` reachable on `home`: while that channel is active, any
    /// datagram sent to the peer is echoed back into the inbox.
    pub fn place_peer(&mut self, peer: PeerAddress, home: Channel) {
        self.homes.insert(peer, home);
    }

    /// Turn the reachable-peer echo behavior on or off.
    pub fn set_auto_reply(&mut self, on: bool) {
        self.auto_reply = on;
    }

    /// Script failures for upcoming sends, consumed in order after the
    /// activation and peer-table checks pass. Lets a test simulate races
    /// (an `Inactive`/`UnknownPeer` that appears despite the precondition
    /// holding) as well as congestion and hardware faults.
    pub fn fail_next_sends(&mut self, faults: impl IntoIterator<Item = RadioError>) {
        self.send_faults.extend(faults);
    }

    /// Queue an inbound datagram for the next receive.
    pub fn push_inbound(&mut self, sender: PeerAddress, payload: Vec<u8>) {
        self.inbox.push_back(Datagram { sender, payload });
    }
}

impl Default for FakeRadio {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RadioSubsystem for FakeRadio {
    fn is_active(&self) -> bool {
        self.active
    }

    fn activate(&mut self, on: bool) -> Result<(), RadioError> {
        if on && !self.active {
            self.activations += 1;
        }
        self.active = on;
        Ok(())
    }

    fn active_channel(&self) -> Channel {
        self.channel
    }

    fn set_channel(&mut self, channel: Channel) -> Result<(), RadioError> {
        self.channel = channel;
        self.channel_history.push(channel);
        Ok(())
    }

    fn has_peer(&self, peer: PeerAddress) -> bool {
        self.peers.contains_key(&peer)
    }

    fn add_peer(&mut self, peer: PeerAddress, channel: Channel) -> Result<(), RadioError> {
        self.peers.insert(peer, channel);
        self.registrations.push((peer, channel));
        Ok(())
    }

    async fn send(&mut self, peer: PeerAddress, payload: &[u8]) -> Result<(), RadioError> {
        if !self.active {
            return Err(RadioError::Inactive);
        }
        if !self.peers.contains_key(&peer) {
            return Err(RadioError::UnknownPeer(peer));
        }
        if let Some(fault) = self.send_faults.pop_front() {
            return Err(fault);
        }

        self.sent.push((peer, payload.to_vec(), self.channel));
        if self.auto_reply && self.homes.get(&peer) == Some(&self.channel) {
            self.inbox.push_back(Datagram {
                sender: peer,
                payload: payload.to_vec(),
            });
        }
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Option<Datagram>, RadioError> {
        if !self.active {
            return Err(RadioError::Inactive);
        }
        if let Some(datagram) = self.inbox.pop_front() {
            return Ok(Some(datagram));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        tokio::time::sleep(timeout).await;
        Ok(self.inbox.pop_front())
    }
}
