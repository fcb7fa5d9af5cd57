/// Retransmission scheduler
///
/// Periodic sweep over the send window that resends messages whose delivery
/// was never confirmed. At most `max_per_tick` resends happen per sweep so a
/// full window of simultaneous timeouts cannot monopolize the transport; the
/// first rejection ends the sweep and the rest waits for the next tick.
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::LinkConfig;
use crate::errors::LinkError;
use crate::transport::Transport;
use crate::window::SendWindow;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Resends handed to the transport, including a rejected one
    pub attempted: usize,

    /// Resends the transport accepted
    pub resent: usize,

    /// Rejection that cut the sweep short
    pub rejected: Option<LinkError>,
}

impl SweepReport {
    pub fn is_idle(&self) -> bool {
        self.attempted == 0
    }
}

#[derive(Debug, Clone)]
pub struct RetransmissionScheduler {
    timeout: Duration,
    max_per_tick: usize,
}

impl RetransmissionScheduler {
    pub fn new(timeout: Duration, max_per_tick: usize) -> Self {
        Self {
            timeout,
            max_per_tick,
        }
    }

    pub fn from_config(config: &LinkConfig) -> Self {
        Self::new(config.retransmit_timeout(), config.max_resends_per_tick)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resend due messages in increasing id order
    ///
    /// Candidates are collected under the window lock; the sends happen
    /// outside it and each success stamps `last_sent_at = now`.
    pub fn sweep<T: Transport + ?Sized>(
        &self,
        window: &SendWindow,
        transport: &T,
        peer: &str,
        now: Instant,
    ) -> SweepReport {
        let mut report = SweepReport::default();

        for message in window.due_for_resend(now, self.timeout, self.max_per_tick) {
            report.attempted += 1;
            match transport.send(peer, message.encode(), message.id) {
                Ok(()) => {
                    window.mark_sent(message.id, now);
                    report.resent += 1;
                    debug!(peer, msg_id = message.id, "resent message");
                }
                Err(err) => {
                    warn!(peer, msg_id = message.id, error = %err, "resend rejected, backing off");
                    report.rejected = Some(err);
                    break;
                }
            }
        }
        report
    }
}

impl Default for RetransmissionScheduler {
    fn default() -> Self {
        Self::from_config(&LinkConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use crate::errors::Result;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<u32>>,
        reject_from: Option<usize>,
    }

    impl Transport for RecordingTransport {
        fn send(&self, _peer: &str, _bytes: Bytes, message_id: u32) -> Result<()> {
            let mut sent = self.sent.lock();
            if self.reject_from.is_some_and(|n| sent.len() >= n) {
                return Err(LinkError::TransportRejected {
                    id: message_id,
                    reason: "busy".into(),
                });
            }
            sent.push(message_id);
            Ok(())
        }
    }

    fn window_sent_at(count: usize, at: Instant) -> SendWindow {
        let window = SendWindow::new(16);
        for _ in 0..count {
            let msg = window.allocate(Bytes::from_static(b"data")).unwrap();
            window.mark_sent(msg.id, at);
        }
        window
    }

    #[test]
    fn test_resend_only_after_timeout() {
        let t0 = Instant::now();
        let window = window_sent_at(1, t0);
        let transport = RecordingTransport::default();
        let scheduler = RetransmissionScheduler::new(Duration::from_millis(10_000), 3);

        let report = scheduler.sweep(&window, &transport, "peer", t0 + Duration::from_millis(9_999));
        assert!(report.is_idle());

        let report = scheduler.sweep(&window, &transport, "peer", t0 + Duration::from_millis(10_000));
        assert_eq!(report.resent, 1);
        assert_eq!(*transport.sent.lock(), vec![1]);

        // stamped: not due again right away
        let report = scheduler.sweep(&window, &transport, "peer", t0 + Duration::from_millis(10_001));
        assert!(report.is_idle());
    }

    #[test]
    fn test_cap_per_tick() {
        let t0 = Instant::now();
        let window = window_sent_at(5, t0);
        let transport = RecordingTransport::default();
        let scheduler = RetransmissionScheduler::new(Duration::from_millis(100), 3);
        let later = t0 + Duration::from_millis(100);

        assert_eq!(scheduler.sweep(&window, &transport, "peer", later).resent, 3);
        assert_eq!(scheduler.sweep(&window, &transport, "peer", later).resent, 2);
        assert_eq!(*transport.sent.lock(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_rejection_aborts_sweep() {
        let t0 = Instant::now();
        let window = window_sent_at(3, t0);
        let transport = RecordingTransport {
            reject_from: Some(1),
            ..Default::default()
        };
        let scheduler = RetransmissionScheduler::new(Duration::from_millis(100), 3);

        let report = scheduler.sweep(&window, &transport, "peer", t0 + Duration::from_secs(1));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.resent, 1);
        assert!(matches!(report.rejected, Some(LinkError::TransportRejected { id: 2, .. })));
    }

    #[test]
    fn test_received_slots_are_skipped() {
        let t0 = Instant::now();
        let window = window_sent_at(2, t0);
        window.mark_result(1, crate::transport::DeliveryOutcome::Delivered);
        let transport = RecordingTransport::default();
        let scheduler = RetransmissionScheduler::new(Duration::from_millis(100), 3);

        scheduler.sweep(&window, &transport, "peer", t0 + Duration::from_secs(1));
        assert_eq!(*transport.sent.lock(), vec![2]);
    }
}
