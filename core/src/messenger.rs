//! Resilient datagram messenger
//!
//! Wraps the raw radio send/receive capability and silently repairs the two
//! classic operator errors (radio left inactive, peer never registered)
//! while keeping genuine faults visible. Repair happens at most once per
//! condition per operation; a recurrence is promoted to a fatal error so a
//! real fault cannot hide behind an endless repair loop.

use crate::radio::{
    Datagram, PeerAddress, RadioError, RadioHandle, RadioSubsystem, TransientKind,
    MAX_PAYLOAD_SIZE,
};
use crate::timer::{RetryTimer, TimerExpired};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced by [`ResilientMessenger`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessengerError {
    #[error("payload of {len} bytes exceeds the {max}-byte radio limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("{condition} recurred after repair")]
    RepairFailed { condition: RadioError },

    #[error("transient condition ({kind}) persisted past the retry budget")]
    RetriesExhausted {
        kind: TransientKind,
        #[source]
        source: TimerExpired,
    },

    #[error("invalid messenger configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Pacing for transient-failure retries during send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    /// Total time allowed for retrying transient transmit failures.
    pub retry_budget: Duration,
    /// Backoff between transmit retries.
    pub retry_interval: Duration,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            retry_budget: Duration::from_millis(400),
            retry_interval: Duration::from_millis(100),
        }
    }
}

impl MessengerConfig {
    /// Set the total transient-retry budget.
    pub fn with_retry_budget(mut self, budget: Duration) -> Self {
        self.retry_budget = budget;
        self
    }

    /// Set the backoff between transmit retries.
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), MessengerError> {
        if self.retry_budget.is_zero() || self.retry_interval.is_zero() {
            return Err(MessengerError::InvalidConfig(
                "Retry durations must be > 0".to_string(),
            ));
        }
        if self.retry_interval > self.retry_budget {
            return Err(MessengerError::InvalidConfig(
                "Retry interval must be <= retry budget".to_string(),
            ));
        }
        Ok(())
    }
}

/// Send/receive contract over the radio that self-heals recoverable
/// precondition failures.
///
/// The caller is responsible for already being on the correct channel
/// (normally via [`crate::scan::ChannelScanner`]); this layer never changes
/// the active channel.
pub struct ResilientMessenger<R> {
    radio: RadioHandle<R>,
    config: MessengerConfig,
}

impl<R: RadioSubsystem> ResilientMessenger<R> {
    /// Messenger with default retry pacing.
    pub fn new(radio: RadioHandle<R>) -> Self {
        Self {
            radio,
            config: MessengerConfig::default(),
        }
    }

    /// Messenger with explicit retry pacing.
    pub fn with_config(
        radio: RadioHandle<R>,
        config: MessengerConfig,
    ) -> Result<Self, MessengerError> {
        config.validate()?;
        Ok(Self { radio, config })
    }

    /// Clone of the underlying radio handle.
    pub fn radio(&self) -> RadioHandle<R> {
        self.radio.clone()
    }

    /// Send `payload` to `peer`, repairing preconditions as needed.
    ///
    /// On success the payload has been accepted by the radio hardware for
    /// transmission; no delivery guarantee is made. On failure nothing was
    /// transmitted partially. Oversized payloads fail immediately and are
    /// never retried.
    pub async fn send(&self, peer: PeerAddress, payload: &[u8]) -> Result<(), MessengerError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(MessengerError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut radio = self.radio.lock().await;
        if !radio.is_active() {
            debug!("radio inactive before send, activating");
            radio.activate(true)?;
        }
        if !radio.has_peer(peer) {
            let channel = radio.active_channel();
            debug!(%peer, %channel, "registering peer before send");
            radio.add_peer(peer, channel)?;
        }

        let mut repaired_inactive = false;
        let mut repaired_peer = false;
        let mut backoff = RetryTimer::new(
            self.config.retry_budget,
            self.config.retry_interval,
            true,
        );

        loop {
            match radio.send(peer, payload).await {
                Ok(()) => return Ok(()),
                Err(RadioError::Inactive) => {
                    if repaired_inactive {
                        warn!(%peer, "radio went inactive again after repair");
                        return Err(MessengerError::RepairFailed {
                            condition: RadioError::Inactive,
                        });
                    }
                    repaired_inactive = true;
                    debug!(%peer, "radio dropped mid-send, reactivating");
                    radio.activate(true)?;
                }
                Err(RadioError::UnknownPeer(addr)) => {
                    if repaired_peer {
                        warn!(peer = %addr, "peer vanished again after re-registration");
                        return Err(MessengerError::RepairFailed {
                            condition: RadioError::UnknownPeer(addr),
                        });
                    }
                    repaired_peer = true;
                    let channel = radio.active_channel();
                    debug!(peer = %addr, %channel, "peer table entry lost mid-send, re-registering");
                    radio.add_peer(addr, channel)?;
                }
                Err(RadioError::Transient(kind)) => match backoff.tick().await {
                    Ok(_) => debug!(%kind, "transient send failure, backing off"),
                    Err(expired) => {
                        warn!(%kind, "transient send failures exhausted the retry budget");
                        return Err(MessengerError::RetriesExhausted {
                            kind,
                            source: expired,
                        });
                    }
                },
                Err(err @ RadioError::Fatal(_)) => return Err(MessengerError::Radio(err)),
            }
        }
    }

    /// Wait up to `timeout` for an inbound datagram.
    ///
    /// Expiry is the distinguished `Ok(None)`, not an error. Calling with
    /// the radio inactive activates it and returns `Ok(None)` immediately,
    /// since nothing can have been queued yet. The sender is *not* auto-registered
    /// as a peer; receiving from an unregistered address is legal at the
    /// radio level.
    pub async fn receive(&self, timeout: Duration) -> Result<Option<Datagram>, MessengerError> {
        let mut radio = self.radio.lock().await;
        if !radio.is_active() {
            debug!("receive on an inactive radio, activating");
            radio.activate(true)?;
            return Ok(None);
        }
        Ok(radio.receive(timeout).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeRadio;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn peer(last: u8) -> PeerAddress {
        PeerAddress::new([0x10, 0x20, 0x30, 0x40, 0x50, last])
    }

    fn fresh_messenger() -> (RadioHandle<FakeRadio>, ResilientMessenger<FakeRadio>) {
        let radio = Arc::new(Mutex::new(FakeRadio::new()));
        let messenger = ResilientMessenger::new(radio.clone());
        (radio, messenger)
    }

    #[test]
    fn test_config_validation() {
        MessengerConfig::default()
            .validate()
            .expect("Default config should be valid");

        let config = MessengerConfig::default().with_retry_budget(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(MessengerError::InvalidConfig(_))
        ));

        let config = MessengerConfig::default()
            .with_retry_budget(Duration::from_millis(50))
            .with_retry_interval(Duration::from_millis(100));
        assert!(matches!(
            config.validate(),
            Err(MessengerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = MessengerConfig::default();
        let json = serde_json::to_string(&config).expect("Should serialize");
        let recovered: MessengerConfig = serde_json::from_str(&json).expect("Should deserialize");
        assert_eq!(recovered.retry_budget, config.retry_budget);
        assert_eq!(recovered.retry_interval, config.retry_interval);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_activates_radio_exactly_once() {
        let (radio, messenger) = fresh_messenger();

        messenger.send(peer(1), b"ping").await.expect("Send should succeed");
        messenger.send(peer(1), b"ping").await.expect("Send should succeed");

        let radio = radio.lock().await;
        assert!(radio.is_active());
        assert_eq!(radio.activations, 1, "Activation must happen once, not per send");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_registers_peer_exactly_once() {
        let (radio, messenger) = fresh_messenger();
        let target = peer(2);

        messenger.send(target, b"one").await.expect("Send should succeed");
        messenger.send(target, b"two").await.expect("Send should succeed");

        let radio = radio.lock().await;
        assert!(radio.has_peer(target));
        assert_eq!(
            radio.registrations.len(),
            1,
            "Registration must be idempotent across sends"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_repairs_inactive_race_once() {
        let (radio, messenger) = fresh_messenger();
        // The radio reports Inactive once even though preconditions passed,
        // simulating a concurrent deactivation.
        radio.lock().await.fail_next_sends([RadioError::Inactive]);

        messenger.send(peer(3), b"ping").await.expect("Send should succeed");

        let radio = radio.lock().await;
        assert_eq!(radio.sent.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_promotes_repeated_unknown_peer_to_fatal() {
        let (radio, messenger) = fresh_messenger();
        let target = peer(4);
        radio.lock().await.fail_next_sends([
            RadioError::UnknownPeer(target),
            RadioError::UnknownPeer(target),
        ]);

        let err = messenger
            .send(target, b"ping")
            .await
            .expect_err("Repeated unknown-peer must not loop");
        assert_eq!(
            err,
            MessengerError::RepairFailed {
                condition: RadioError::UnknownPeer(target)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_transient_failures_within_budget() {
        let (radio, messenger) = fresh_messenger();
        radio.lock().await.fail_next_sends([
            RadioError::Transient(TransientKind::TxQueueFull),
            RadioError::Transient(TransientKind::TxQueueFull),
        ]);

        messenger.send(peer(5), b"ping").await.expect("Send should succeed");

        let radio = radio.lock().await;
        assert_eq!(radio.sent.len(), 1, "Third attempt should have gone through");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_reports_exhausted_transient_retries() {
        let (radio, messenger) = fresh_messenger();
        // Default budget allows four paced retries; fail more than that.
        radio.lock().await.fail_next_sends(std::iter::repeat(
            RadioError::Transient(TransientKind::NoBuffers),
        ).take(8));

        let err = messenger
            .send(peer(6), b"ping")
            .await
            .expect_err("Retries must not continue past the budget");
        assert!(matches!(
            err,
            MessengerError::RetriesExhausted {
                kind: TransientKind::NoBuffers,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_rejects_oversized_payload_immediately() {
        let (radio, messenger) = fresh_messenger();
        let payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];

        let err = messenger
            .send(peer(7), &payload)
            .await
            .expect_err("Oversized payload must fail");
        assert_eq!(
            err,
            MessengerError::PayloadTooLarge {
                len: MAX_PAYLOAD_SIZE + 1,
                max: MAX_PAYLOAD_SIZE
            }
        );
        let radio = radio.lock().await;
        assert!(
            !radio.is_active(),
            "Malformed input must be rejected before any repair"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_surfaces_fatal_unchanged() {
        let (radio, messenger) = fresh_messenger();
        radio
            .lock()
            .await
            .fail_next_sends([RadioError::Fatal("phy fault".to_string())]);

        let err = messenger
            .send(peer(8), b"ping")
            .await
            .expect_err("Fatal must propagate");
        assert_eq!(
            err,
            MessengerError::Radio(RadioError::Fatal("phy fault".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_on_inactive_radio_activates_and_returns_none() {
        let (radio, messenger) = fresh_messenger();

        let got = messenger
            .receive(Duration::from_millis(100))
            .await
            .expect("Receive should not fail");

        assert_eq!(got, None);
        let radio = radio.lock().await;
        assert!(radio.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_times_out_after_requested_duration() {
        let (radio, messenger) = fresh_messenger();
        radio.lock().await.activate(true).expect("Activate should succeed");

        let timeout = Duration::from_millis(750);
        let started = tokio::time::Instant::now();
        let got = messenger.receive(timeout).await.expect("Receive should not fail");

        assert_eq!(got, None);
        assert_eq!(
            started.elapsed(),
            timeout,
            "Empty receive must block for the full timeout, no longer"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_returns_queued_datagram_without_registering_sender() {
        let (radio, messenger) = fresh_messenger();
        let sender = peer(9);
        {
            let mut radio = radio.lock().await;
            radio.activate(true).expect("Activate should succeed");
            radio.push_inbound(sender, b"hello".to_vec());
        }

        let got = messenger
            .receive(Duration::from_millis(100))
            .await
            .expect("Receive should not fail")
            .expect("Datagram should be delivered");

        assert_eq!(got.sender, sender);
        assert_eq!(got.payload, b"hello");
        let radio = radio.lock().await;
        assert!(
            !radio.has_peer(sender),
            "Receive must not auto-register the sender"
        );
    }
}
