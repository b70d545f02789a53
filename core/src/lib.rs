// Nowgram — peer discovery and resilient datagrams for ESP-NOW-class radios
//
// "Find the channel, then keep the datagrams flowing even when the radio
//  stack is having a bad day."
//
// The core is three pieces: a channel scanner that locates a peer on an
// unknown wifi channel, a messenger that self-heals the recoverable radio
// failures and surfaces the rest, and the retry timer both are paced by.
// Everything talks to the hardware through the RadioSubsystem trait, so the
// whole stack runs against a fake in tests.

pub mod echo;
pub mod messenger;
pub mod radio;
pub mod scan;
pub mod timer;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use echo::{EchoConfig, EchoService};
pub use messenger::{MessengerConfig, MessengerError, ResilientMessenger};
pub use radio::{
    AddressParseError, Channel, Datagram, InvalidChannel, PeerAddress, RadioError, RadioHandle,
    RadioSubsystem, TransientKind, MAX_PAYLOAD_SIZE,
};
pub use scan::{ChannelScanner, ScanConfig, ScanError, ScanOutcome};
pub use timer::{RetryTimer, TimerExpired};
