//! Channel discovery
//!
//! Finds which channel a known peer is listening on by walking the candidate
//! channels in ascending order and probing each one. The discovered channel
//! is left active on return; callers rely on that side effect to start
//! messaging immediately.

use crate::radio::{Channel, PeerAddress, RadioError, RadioHandle, RadioSubsystem};
use crate::timer::RetryTimer;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Minimal datagram sent to elicit any reply from the target peer.
pub const PROBE_PAYLOAD: &[u8] = b"ping";

/// Result of a channel scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The peer answered on this channel; it is now the active channel.
    Found(Channel),
    /// No candidate produced an answer. The active channel is whatever the
    /// scan last tried; it is not restored.
    NotFound,
}

/// Errors that can occur during a scan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("invalid scan configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Channel scan configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Candidate channels to probe. Probed in ascending order regardless of
    /// the order given here.
    pub channels: Vec<Channel>,
    /// How long to wait for an answer on each channel.
    pub probe_timeout: Duration,
    /// Pacing between probe datagrams within one channel's window.
    pub probe_interval: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            channels: Channel::all().collect(),
            // Five probes per channel, matching field experience with
            // ESP-NOW peers that drop the first datagram after a hop.
            probe_timeout: Duration::from_millis(200),
            probe_interval: Duration::from_millis(50),
        }
    }
}

impl ScanConfig {
    /// Restrict the scan to an explicit channel set.
    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.channels = channels;
        self
    }

    /// Set the per-channel answer timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the probe pacing within a channel window.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.probe_timeout.is_zero() || self.probe_interval.is_zero() {
            return Err(ScanError::InvalidConfig(
                "Probe durations must be > 0".to_string(),
            ));
        }
        if self.probe_interval > self.probe_timeout {
            return Err(ScanError::InvalidConfig(
                "Probe interval must be <= probe timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// Discovers which channel a specific peer is reachable on.
pub struct ChannelScanner<R> {
    radio: RadioHandle<R>,
    config: ScanConfig,
}

impl<R: RadioSubsystem> ChannelScanner<R> {
    /// Scanner over every channel the hardware supports, default pacing.
    pub fn new(radio: RadioHandle<R>) -> Self {
        Self {
            radio,
            config: ScanConfig::default(),
        }
    }

    /// Scanner with an explicit configuration.
    pub fn with_config(radio: RadioHandle<R>, config: ScanConfig) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self { radio, config })
    }

    /// Probe each candidate channel for `target` and return the first one it
    /// answers on.
    ///
    /// Side effects, by contract: the active channel is left at the
    /// discovered value on success, and at the last probed value on
    /// `NotFound`; a provisional peer-table entry for `target` may remain
    /// even when the scan fails.
    ///
    /// Peer absence is never an error. Any non-transient radio failure
    /// aborts the scan immediately.
    pub async fn scan(&self, target: PeerAddress) -> Result<ScanOutcome, ScanError> {
        let mut candidates = self.config.channels.clone();
        candidates.sort_unstable();
        candidates.dedup();

        let mut radio = self.radio.lock().await;
        if !radio.is_active() {
            debug!("activating radio for scan");
            radio.activate(true)?;
        }

        for channel in candidates {
            radio.set_channel(channel)?;
            if !radio.has_peer(target) {
                // Provisional entry; deliberately left behind when the scan
                // moves on. Bounded by the channel count.
                radio.add_peer(target, channel)?;
            }
            debug!(%channel, peer = %target, "probing channel");

            let mut window = RetryTimer::new(
                self.config.probe_timeout,
                self.config.probe_interval,
                false,
            );
            loop {
                match radio.send(target, PROBE_PAYLOAD).await {
                    Ok(()) => {}
                    Err(RadioError::Transient(kind)) => {
                        debug!(%channel, %kind, "probe deferred");
                    }
                    Err(err) => return Err(err.into()),
                }

                let window_open = matches!(window.tick().await, Ok(Some(_)));

                // Drain whatever arrived during the tick wait. Polling even
                // after the window closes keeps a late same-channel reply
                // from leaking into the next candidate's window.
                while let Some(datagram) = radio.receive(Duration::ZERO).await? {
                    if datagram.sender == target {
                        info!(%channel, peer = %target, "peer found");
                        return Ok(ScanOutcome::Found(channel));
                    }
                    debug!(sender = %datagram.sender, "ignoring datagram from foreign peer");
                }

                if !window_open {
                    break;
                }
            }
        }

        info!(peer = %target, "peer not found on any candidate channel");
        Ok(ScanOutcome::NotFound)
    }
}
