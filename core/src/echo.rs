//! Echo request/response service
//!
//! Demonstration layer over [`ResilientMessenger`]: everything here goes
//! through the messenger's send/receive contract, never the radio directly.
//! A server echoes each datagram back to its sender until the stop sentinel
//! arrives; a client sends a payload and checks the echo matches.

use crate::messenger::{MessengerError, ResilientMessenger};
use crate::radio::{PeerAddress, RadioSubsystem, MAX_PAYLOAD_SIZE};
use crate::timer::RetryTimer;
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Payload that stops a serving echo loop. Echoed back like any other
/// payload before the server returns.
pub const DONE: &[u8] = b"!done";

/// Echo service timing.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// How long each receive wait blocks.
    pub receive_timeout: Duration,
    /// How much total silence a serving loop tolerates before returning.
    pub idle_budget: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(500),
            idle_budget: Duration::from_secs(30),
        }
    }
}

/// Request/response echo loop built on the resilient messenger.
pub struct EchoService<R> {
    messenger: ResilientMessenger<R>,
    config: EchoConfig,
}

impl<R: RadioSubsystem> EchoService<R> {
    /// Echo service with default timing.
    pub fn new(messenger: ResilientMessenger<R>) -> Self {
        Self {
            messenger,
            config: EchoConfig::default(),
        }
    }

    /// Echo service with explicit timing.
    pub fn with_config(messenger: ResilientMessenger<R>, config: EchoConfig) -> Self {
        Self { messenger, config }
    }

    /// The wrapped messenger.
    pub fn messenger(&self) -> &ResilientMessenger<R> {
        &self.messenger
    }

    /// Serve echo requests until the stop sentinel arrives or the link has
    /// been silent for the idle budget. Returns the number of datagrams
    /// echoed, the sentinel excluded.
    ///
    /// Unknown senders need no special handling: replying through the
    /// resilient send registers them as peers.
    pub async fn serve(&self) -> Result<usize, MessengerError> {
        let mut idle = RetryTimer::new(self.config.idle_budget, self.config.receive_timeout, false);
        let mut echoed = 0usize;

        loop {
            match self.messenger.receive(self.config.receive_timeout).await? {
                Some(datagram) => {
                    idle.reset();
                    self.messenger
                        .send(datagram.sender, &datagram.payload)
                        .await?;
                    if datagram.payload == DONE {
                        info!(peer = %datagram.sender, echoed, "stop sentinel received");
                        return Ok(echoed);
                    }
                    debug!(peer = %datagram.sender, len = datagram.payload.len(), "echoed datagram");
                    echoed += 1;
                }
                // The receive wait already slept; the timer only tracks how
                // long the link has been silent.
                None if idle.is_exhausted() => {
                    info!(echoed, "echo server idle budget exhausted");
                    return Ok(echoed);
                }
                None => {}
            }
        }
    }

    /// Send `payload` to `peer` and wait for the echo.
    ///
    /// `Ok(false)` when the reply times out, comes from the wrong peer, or
    /// does not match. A silent peer is an answer, not a failure.
    pub async fn roundtrip(
        &self,
        peer: PeerAddress,
        payload: &[u8],
    ) -> Result<bool, MessengerError> {
        self.messenger.send(peer, payload).await?;
        match self.messenger.receive(self.config.receive_timeout).await? {
            Some(reply) if reply.sender == peer => {
                if reply.payload == payload {
                    Ok(true)
                } else {
                    warn!(%peer, "echo reply differs from sent payload");
                    Ok(false)
                }
            }
            Some(reply) => {
                warn!(expected = %peer, got = %reply.sender, "echo reply from unexpected peer");
                Ok(false)
            }
            None => {
                debug!(%peer, "echo reply timed out");
                Ok(false)
            }
        }
    }

    /// Run a round-trip for a random payload of each given length and return
    /// how many echoed back intact.
    pub async fn exercise(
        &self,
        peer: PeerAddress,
        lengths: &[usize],
    ) -> Result<usize, MessengerError> {
        let mut passed = 0;
        for payload in random_payloads(lengths) {
            if self.roundtrip(peer, &payload).await? {
                passed += 1;
            }
        }
        Ok(passed)
    }
}

/// Random test payloads of the given lengths, clipped to the radio MTU.
/// The first byte is forced printable so a payload can never collide with
/// the `!`-prefixed stop sentinel.
pub fn random_payloads(lengths: &[usize]) -> Vec<Vec<u8>> {
    let mut rng = rand::thread_rng();
    lengths
        .iter()
        .map(|&len| {
            let len = len.min(MAX_PAYLOAD_SIZE);
            let mut payload = vec![0u8; len];
            rng.fill(payload.as_mut_slice());
            if let Some(first) = payload.first_mut() {
                *first = b'_';
            }
            payload
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRadio;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn peer(last: u8) -> PeerAddress {
        PeerAddress::new([0x02, 0x00, 0x00, 0x00, 0x00, last])
    }

    fn service_over(radio: FakeRadio) -> (Arc<Mutex<FakeRadio>>, EchoService<FakeRadio>) {
        let radio = Arc::new(Mutex::new(radio));
        let messenger = ResilientMessenger::new(radio.clone());
        let service = EchoService::with_config(
            messenger,
            EchoConfig {
                receive_timeout: Duration::from_millis(100),
                idle_budget: Duration::from_millis(300),
            },
        );
        (radio, service)
    }

    #[test]
    fn test_random_payloads_shape() {
        let payloads = random_payloads(&[0, 1, 16, MAX_PAYLOAD_SIZE + 100]);
        assert_eq!(payloads.len(), 4);
        assert!(payloads[0].is_empty());
        assert_eq!(payloads[1], b"_");
        assert_eq!(payloads[2][0], b'_');
        assert_eq!(
            payloads[3].len(),
            MAX_PAYLOAD_SIZE,
            "Lengths must be clipped to the radio MTU"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_echoes_and_stops_on_sentinel() {
        let client = peer(1);
        let mut radio = FakeRadio::new();
        // The server's own sends must not come back as new requests.
        radio.set_auto_reply(false);
        radio.push_inbound(client, b"first".to_vec());
        radio.push_inbound(client, b"second".to_vec());
        radio.push_inbound(client, DONE.to_vec());
        let (radio, service) = service_over(radio);

        let echoed = service.serve().await.expect("Serve should succeed");

        assert_eq!(echoed, 2);
        let radio = radio.lock().await;
        let replies: Vec<&[u8]> = radio.sent.iter().map(|(_, p, _)| p.as_slice()).collect();
        assert_eq!(replies, vec![&b"first"[..], &b"second"[..], &DONE[..]]);
        assert!(
            radio.has_peer(client),
            "Replying must have registered the unknown sender"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_returns_after_idle_budget() {
        let (_, service) = service_over(FakeRadio::new());

        let started = tokio::time::Instant::now();
        let echoed = service.serve().await.expect("Serve should succeed");

        assert_eq!(echoed, 0);
        assert!(
            started.elapsed() >= Duration::from_millis(300),
            "Server should wait out the idle budget before giving up"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_succeeds_against_echoing_peer() {
        let remote = peer(2);
        let mut radio = FakeRadio::new();
        // Reachable on the current channel: every send is echoed back.
        radio.place_peer(remote, crate::radio::Channel::MIN);
        let (_, service) = service_over(radio);

        let ok = service
            .roundtrip(remote, b"hello")
            .await
            .expect("Roundtrip should not fail");
        assert!(ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_roundtrip_false_on_silence() {
        let remote = peer(3);
        // No home channel: sends vanish into the air.
        let (_, service) = service_over(FakeRadio::new());

        let ok = service
            .roundtrip(remote, b"hello")
            .await
            .expect("Roundtrip should not fail");
        assert!(!ok, "Silence is a false result, not an error");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exercise_counts_intact_roundtrips() {
        let remote = peer(4);
        let mut radio = FakeRadio::new();
        radio.place_peer(remote, crate::radio::Channel::MIN);
        let (_, service) = service_over(radio);

        let passed = service
            .exercise(remote, &[4, 32, 250])
            .await
            .expect("Exercise should not fail");
        assert_eq!(passed, 3);
    }
}
