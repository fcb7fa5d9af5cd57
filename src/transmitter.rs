/// Transmitter - producer side of a session
///
/// Each tick, in order:
/// 1. re-announce `INFO` until the transport confirms it was delivered
/// 2. sweep the window for timed-out messages; a tick that resends does
///    nothing else
/// 3. take the next chunk from the source and send it under a fresh id
///
/// Reading from the source happens outside the window lock. A chunk that
/// could not get a slot is kept staged for the next tick rather than re-read.
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::LinkConfig;
use crate::errors::{LinkError, Result};
use crate::handshake;
use crate::retransmit::RetransmissionScheduler;
use crate::source::PayloadSource;
use crate::transport::{DeliveryOutcome, Transport};
use crate::window::SendWindow;
use crate::{MSG_ID_INFO, MSG_ID_RESET};

/// What one tick accomplished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The sweep resent this many messages; nothing new was sent
    Resent(usize),

    /// The sweep hit a transport rejection and backed off
    Backoff,

    /// A new message went out
    Sent(u32),

    /// A new message was allocated but the transport refused it; the sweep
    /// picks it up next tick
    Rejected(u32),

    /// No free slot; the chunk stays staged
    WindowFull,

    /// Source exhausted, waiting for outstanding confirmations
    Draining,

    /// Source exhausted and every message confirmed
    Finished,
}

/// Send-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Payload bytes handed to the transport on first send
    pub have_sent_size: u64,

    /// Payload bytes confirmed delivered
    pub bytes_delivered: u64,

    pub messages_sent: u64,
    pub resends: u64,
    pub resets: u64,
    pub window_full: u64,
}

pub struct Transmitter {
    peer: String,
    window: SendWindow,
    scheduler: RetransmissionScheduler,
    source: Box<dyn PayloadSource>,
    send_size: usize,
    staged: Option<Bytes>,
    exhausted: bool,
    info_delivered: bool,
    stats: SenderStats,
}

impl Transmitter {
    pub fn new(peer: impl Into<String>, source: Box<dyn PayloadSource>, config: &LinkConfig) -> Self {
        Self {
            peer: peer.into(),
            window: SendWindow::new(config.window_size),
            scheduler: RetransmissionScheduler::from_config(config),
            source,
            send_size: config.send_size,
            staged: None,
            exhausted: false,
            info_delivered: false,
            stats: SenderStats::default(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    pub fn info_delivered(&self) -> bool {
        self.info_delivered
    }

    pub fn is_finished(&self) -> bool {
        self.exhausted && self.staged.is_none() && self.window.is_empty()
    }

    /// Run one producer step at time `now`
    ///
    /// # Errors
    /// Only source failures; transport trouble is reported through
    /// [`TickOutcome`] and retried on later ticks.
    pub fn tick<T: Transport + ?Sized>(&mut self, transport: &T, now: Instant) -> Result<TickOutcome> {
        if !self.info_delivered {
            if let Some(info) = self.source.info() {
                if let Err(err) = handshake::send_info(transport, &self.peer, &info) {
                    warn!(peer = %self.peer, error = %err, "file info rejected");
                }
            }
        }

        let report = self.scheduler.sweep(&self.window, transport, &self.peer, now);
        self.stats.resends += report.resent as u64;
        if !report.is_idle() {
            if report.resent == 0 {
                return Ok(TickOutcome::Backoff);
            }
            return Ok(TickOutcome::Resent(report.resent));
        }

        let chunk = match self.staged.take() {
            Some(chunk) => chunk,
            None if self.exhausted => return Ok(self.drain_state()),
            None => match self.source.next_chunk(self.send_size)? {
                Some(chunk) => chunk,
                None => {
                    debug!(peer = %self.peer, "source exhausted");
                    self.exhausted = true;
                    return Ok(self.drain_state());
                }
            },
        };

        let message = match self.window.allocate(chunk.clone()) {
            Ok(message) => message,
            Err(LinkError::WindowFull { id }) => {
                debug!(peer = %self.peer, msg_id = id, "can't send msg, send buf is full");
                self.staged = Some(chunk);
                self.stats.window_full += 1;
                return Ok(TickOutcome::WindowFull);
            }
            Err(err) => return Err(err),
        };

        match transport.send(&self.peer, message.encode(), message.id) {
            Ok(()) => {
                self.window.mark_sent(message.id, now);
                self.stats.messages_sent += 1;
                self.stats.have_sent_size += message.payload.len() as u64;
                debug!(
                    peer = %self.peer,
                    msg_id = message.id,
                    msg_len = message.payload.len(),
                    have_sent_size = self.stats.have_sent_size,
                    "sent"
                );
                Ok(TickOutcome::Sent(message.id))
            }
            Err(err) => {
                warn!(peer = %self.peer, msg_id = message.id, error = %err, "send failed");
                Ok(TickOutcome::Rejected(message.id))
            }
        }
    }

    fn drain_state(&self) -> TickOutcome {
        if self.window.is_empty() {
            TickOutcome::Finished
        } else {
            TickOutcome::Draining
        }
    }

    /// Apply a delivery result reported by the transport
    pub fn on_delivery_result(&mut self, message_id: u32, outcome: DeliveryOutcome) {
        match message_id {
            MSG_ID_RESET => {
                if outcome.is_delivered() {
                    debug!(peer = %self.peer, "reset request delivered");
                }
            }
            MSG_ID_INFO => {
                if outcome.is_delivered() && !self.info_delivered {
                    self.info_delivered = true;
                    debug!(peer = %self.peer, "file info delivered");
                }
            }
            id if outcome.is_delivered() => {
                if let Some(message) = self.window.release(id) {
                    self.stats.bytes_delivered += message.payload.len() as u64;
                }
            }
            id => {
                self.window.mark_result(id, outcome);
            }
        }
    }

    /// Peer asked for a restart: clear the window, rewind the source, and
    /// announce `INFO` again before any data
    pub fn on_reset(&mut self) -> Result<()> {
        let dropped = self.window.stats().occupied;
        self.window.reset();
        self.staged = None;
        self.exhausted = false;
        self.info_delivered = false;
        self.stats.resets += 1;
        info!(peer = %self.peer, dropped, "send reset, restarting from msg_id 1");
        self.source.rewind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::config::LinkConfigBuilder;
    use crate::source::RandomSource;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<u32>>,
        reject: Mutex<bool>,
    }

    impl Transport for Capture {
        fn send(&self, _peer: &str, _bytes: Bytes, message_id: u32) -> Result<()> {
            if *self.reject.lock() {
                return Err(LinkError::TransportRejected {
                    id: message_id,
                    reason: "offline".into(),
                });
            }
            self.sent.lock().push(message_id);
            Ok(())
        }
    }

    fn transmitter(window: usize, chunks: u64) -> Transmitter {
        let config = LinkConfigBuilder::new()
            .with_window_size(window)
            .with_send_size(64)
            .build()
            .unwrap();
        Transmitter::new("peer", Box::new(RandomSource::with_seed(1, 64, Some(chunks))), &config)
    }

    #[test]
    fn test_window_full_stages_chunk() {
        let transport = Capture::default();
        let mut tx = transmitter(3, 10);
        let now = Instant::now();

        for id in 1..=3 {
            assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Sent(id));
        }
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::WindowFull);
        assert_eq!(tx.stats().window_full, 1);

        tx.on_delivery_result(1, DeliveryOutcome::Delivered);
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Sent(4));
        assert_eq!(tx.stats().messages_sent, 4);
        assert_eq!(tx.stats().bytes_delivered, 64);
    }

    #[test]
    fn test_resend_preempts_new_sends() {
        let transport = Capture::default();
        let mut tx = transmitter(8, 10);
        let t0 = Instant::now();
        tx.tick(&transport, t0).unwrap();
        tx.tick(&transport, t0).unwrap();

        let later = t0 + Duration::from_millis(10_000);
        assert_eq!(tx.tick(&transport, later).unwrap(), TickOutcome::Resent(2));
        assert_eq!(*transport.sent.lock(), vec![1, 2, 1, 2]);
        assert_eq!(tx.tick(&transport, later).unwrap(), TickOutcome::Sent(3));
    }

    #[test]
    fn test_rejected_send_is_retried_by_sweep() {
        let transport = Capture::default();
        let mut tx = transmitter(8, 10);
        let now = Instant::now();

        *transport.reject.lock() = true;
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Rejected(1));
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Backoff);

        *transport.reject.lock() = false;
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Resent(1));
        assert_eq!(tx.stats().have_sent_size, 0);
    }

    #[test]
    fn test_finishes_after_all_confirmed() {
        let transport = Capture::default();
        let mut tx = transmitter(8, 2);
        let now = Instant::now();

        tx.tick(&transport, now).unwrap();
        tx.tick(&transport, now).unwrap();
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Draining);

        tx.on_delivery_result(1, DeliveryOutcome::Delivered);
        tx.on_delivery_result(2, DeliveryOutcome::Failed);
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Draining);
        tx.on_delivery_result(2, DeliveryOutcome::Delivered);
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Finished);
        assert!(tx.is_finished());
    }

    #[test]
    fn test_reset_restarts_from_one() {
        let transport = Capture::default();
        let mut tx = transmitter(8, 10);
        let now = Instant::now();
        for _ in 0..4 {
            tx.tick(&transport, now).unwrap();
        }

        tx.on_reset().unwrap();
        assert!(tx.window().is_empty());
        assert_eq!(tx.stats().resets, 1);
        assert_eq!(tx.tick(&transport, now).unwrap(), TickOutcome::Sent(1));

        // confirmation for a pre-reset id that is no longer tracked
        tx.on_delivery_result(3, DeliveryOutcome::Delivered);
        assert_eq!(tx.window().stats().occupied, 1);
    }

    #[test]
    fn test_info_repeated_until_delivered() {
        use crate::source::FileSource;
        use std::fs;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        fs::write(&path, vec![7u8; 200]).unwrap();

        let config = LinkConfigBuilder::new().with_send_size(64).build().unwrap();
        let mut tx = Transmitter::new("peer", Box::new(FileSource::open(&path).unwrap()), &config);
        let transport = Capture::default();
        let now = Instant::now();

        tx.tick(&transport, now).unwrap();
        tx.tick(&transport, now).unwrap();
        assert_eq!(*transport.sent.lock(), vec![MSG_ID_INFO, 1, MSG_ID_INFO, 2]);

        tx.on_delivery_result(MSG_ID_INFO, DeliveryOutcome::Delivered);
        assert!(tx.info_delivered());
        tx.tick(&transport, now).unwrap();
        assert_eq!(transport.sent.lock().last(), Some(&3));

        tx.on_reset().unwrap();
        assert!(!tx.info_delivered());
    }
}
