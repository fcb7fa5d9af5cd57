/// In-memory link with configurable loss.
///
/// [`MemoryLink::pair`] connects two endpoints. A message that survives the
/// [`LossPolicy`] is pushed to the peer's event queue as `Data` and reported
/// `Delivered` to the sender; a dropped one is reported `Failed`. Delivery
/// results can also be suppressed to model lost confirmations.
use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::errors::{LinkError, Result};
use crate::transport::{
    event_queue, DeliveryOutcome, EventReceiver, EventSender, Transport, TransportEvent,
};

/// Loss behavior for one direction of the link
#[derive(Debug)]
pub struct LossPolicy {
    /// Ids dropped the next time each is sent
    pub drop_ids: HashSet<u32>,

    /// Probability of dropping any message
    pub loss_rate: f64,

    /// Refuse this many upcoming sends outright
    pub reject_next: usize,

    /// Deliver data but never report the outcome
    pub suppress_results: bool,

    rng: StdRng,
}

impl LossPolicy {
    pub fn lossless() -> Self {
        Self::seeded(0)
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            drop_ids: HashSet::new(),
            loss_rate: 0.0,
            reject_next: 0,
            suppress_results: false,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn should_drop(&mut self, id: u32) -> bool {
        if self.drop_ids.remove(&id) {
            return true;
        }
        self.loss_rate > 0.0 && self.rng.gen_bool(self.loss_rate.min(1.0))
    }
}

impl Default for LossPolicy {
    fn default() -> Self {
        Self::lossless()
    }
}

/// One endpoint of a [`MemoryLink`]
#[derive(Clone)]
pub struct MemoryTransport {
    local: String,
    remote: String,
    own_events: EventSender,
    peer_events: EventSender,
    policy: Arc<Mutex<LossPolicy>>,
}

impl MemoryTransport {
    pub fn local(&self) -> &str {
        &self.local
    }

    /// Adjust the outbound loss policy
    pub fn with_policy<R>(&self, f: impl FnOnce(&mut LossPolicy) -> R) -> R {
        f(&mut self.policy.lock())
    }

    fn report(&self, message_id: u32, outcome: DeliveryOutcome) -> Result<()> {
        self.own_events
            .send(TransportEvent::DeliveryResult {
                peer: self.remote.clone(),
                message_id,
                outcome,
            })
            .map_err(|_| closed(message_id))
    }
}

fn closed(id: u32) -> LinkError {
    LinkError::TransportRejected {
        id,
        reason: "link closed".into(),
    }
}

impl Transport for MemoryTransport {
    fn send(&self, peer: &str, bytes: Bytes, message_id: u32) -> Result<()> {
        if peer != self.remote {
            return Err(LinkError::TransportRejected {
                id: message_id,
                reason: format!("unknown peer {peer}"),
            });
        }

        let (dropped, suppress) = {
            let mut policy = self.policy.lock();
            if policy.reject_next > 0 {
                policy.reject_next -= 1;
                return Err(LinkError::TransportRejected {
                    id: message_id,
                    reason: "send queue full".into(),
                });
            }
            (policy.should_drop(message_id), policy.suppress_results)
        };

        if dropped {
            trace!(from = %self.local, msg_id = message_id, "simulated loss");
            if !suppress {
                self.report(message_id, DeliveryOutcome::Failed)?;
            }
            return Ok(());
        }

        self.peer_events
            .send(TransportEvent::Data {
                peer: self.local.clone(),
                bytes,
            })
            .map_err(|_| closed(message_id))?;
        if !suppress {
            self.report(message_id, DeliveryOutcome::Delivered)?;
        }
        Ok(())
    }
}

/// A connected pair of endpoints
pub struct MemoryLink;

/// One side of a link: its transport and the queue its events land on
pub struct LinkEnd {
    pub transport: MemoryTransport,
    pub events: EventReceiver,
}

impl MemoryLink {
    pub fn pair(a: &str, b: &str) -> (LinkEnd, LinkEnd) {
        let (a_tx, a_rx) = event_queue();
        let (b_tx, b_rx) = event_queue();

        let a_end = LinkEnd {
            transport: MemoryTransport {
                local: a.to_string(),
                remote: b.to_string(),
                own_events: a_tx.clone(),
                peer_events: b_tx.clone(),
                policy: Arc::new(Mutex::new(LossPolicy::lossless())),
            },
            events: a_rx,
        };
        let b_end = LinkEnd {
            transport: MemoryTransport {
                local: b.to_string(),
                remote: a.to_string(),
                own_events: b_tx,
                peer_events: a_tx,
                policy: Arc::new(Mutex::new(LossPolicy::lossless())),
            },
            events: b_rx,
        };
        (a_end, b_end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_reaches_peer_and_reports() {
        let (mut a, mut b) = MemoryLink::pair("arm", "gello");
        a.transport.send("gello", Bytes::from_static(b"hi"), 1).unwrap();

        assert_eq!(
            b.events.try_recv().unwrap(),
            TransportEvent::Data { peer: "arm".into(), bytes: Bytes::from_static(b"hi") }
        );
        assert_eq!(
            a.events.try_recv().unwrap(),
            TransportEvent::DeliveryResult {
                peer: "gello".into(),
                message_id: 1,
                outcome: DeliveryOutcome::Delivered,
            }
        );
    }

    #[test]
    fn test_drop_ids_reports_failure() {
        let (mut a, mut b) = MemoryLink::pair("arm", "gello");
        a.transport.with_policy(|p| p.drop_ids.insert(3));

        a.transport.send("gello", Bytes::new(), 3).unwrap();
        assert!(b.events.try_recv().is_err());
        assert!(matches!(
            a.events.try_recv().unwrap(),
            TransportEvent::DeliveryResult { message_id: 3, outcome: DeliveryOutcome::Failed, .. }
        ));

        a.transport.send("gello", Bytes::new(), 3).unwrap();
        assert!(b.events.try_recv().is_ok());
    }

    #[test]
    fn test_reject_and_unknown_peer() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        a.transport.with_policy(|p| p.reject_next = 1);
        assert!(a.transport.send("gello", Bytes::new(), 1).is_err());
        assert!(a.transport.send("gello", Bytes::new(), 1).is_ok());
        assert!(a.transport.send("nobody", Bytes::new(), 2).is_err());
    }

    #[test]
    fn test_suppressed_results() {
        let (mut a, mut b) = MemoryLink::pair("arm", "gello");
        a.transport.with_policy(|p| p.suppress_results = true);
        a.transport.send("gello", Bytes::new(), 1).unwrap();
        assert!(b.events.try_recv().is_ok());
        assert!(a.events.try_recv().is_err());
    }
}
