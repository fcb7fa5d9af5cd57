/// RtmLink Core - Reliable ordered delivery over an unreliable message channel
///
/// **Creator**: Shayan Golmezerji
/// **License**: Creative Commons Attribution 4.0 International (CC BY 4.0)
///
/// This library implements a small reliability layer on top of a real-time
/// messaging transport that delivers opaque blobs to a named peer, reports a
/// per-message delivery outcome out of band, and guarantees neither order nor
/// delivery.
///
/// # Design Principles
/// - Bounded in-flight window of fixed slots addressed by `id mod window`
/// - Wraparound-safe 32-bit sequence arithmetic for every ordering decision
/// - Strict in-order receive with full resynchronization on gaps
/// - No I/O while holding the window lock

pub mod errors;
pub mod seq;
pub mod contracts;
pub mod config;
pub mod telemetry;
pub mod transport;
pub mod window;
pub mod retransmit;
pub mod receiver;
pub mod handshake;
pub mod transmitter;
pub mod source;
pub mod sink;
pub mod session;
pub mod simulator;

pub use config::LinkConfig;
pub use contracts::{FileInfo, Message};
pub use errors::{LinkError, Result};
pub use receiver::{Classification, ReceiveSequencer, Receiver};
pub use session::Session;
pub use transmitter::Transmitter;
pub use transport::{DeliveryOutcome, Transport, TransportEvent};
pub use window::SendWindow;

/// Reserved identifier carrying out-of-band metadata (file size and name)
pub const MSG_ID_INFO: u32 = 0;

/// Reserved identifier asking the sender to forget everything and restart at 1
pub const MSG_ID_RESET: u32 = u32::MAX;

/// First identifier of a fresh stream
pub const FIRST_MSG_ID: u32 = 1;

/// Default number of in-flight messages
pub const DEFAULT_WINDOW_SIZE: usize = 60;

/// Default time before an unacknowledged message is resent
pub const RETRANSMIT_TIMEOUT_MS: u64 = 10_000;

/// Default cap on resends per sweep
pub const MAX_RESENDS_PER_TICK: usize = 3;

/// Default payload bytes per message
pub const DEFAULT_SEND_SIZE: usize = 10 * 1024;

/// Largest payload the transport accepts in one message
pub const MAX_PAYLOAD_SIZE: usize = 31 * 1024;
