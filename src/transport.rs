/// Transport seam
///
/// The underlying channel is an external real-time messaging service. This
/// layer consumes it through three narrow points: an immediate accept/reject
/// `send`, and two asynchronous notifications (delivery result, inbound data)
/// which arrive as [`TransportEvent`]s on a queue owned by the session.
use bytes::Bytes;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::errors::Result;

/// Per-message delivery outcome reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryOutcome {
    /// Accepted, still in flight
    Pending,

    /// Confirmed received by the peer
    Delivered,

    /// Delivery failed; the message may be resent
    Failed,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Unreliable, unordered, at-most-once message channel to a named peer
pub trait Transport: Send + Sync {
    /// Hand `bytes` to the transport. `Err` means the transport refused it
    /// right away; acceptance says nothing about delivery.
    fn send(&self, peer: &str, bytes: Bytes, message_id: u32) -> Result<()>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send(&self, peer: &str, bytes: Bytes, message_id: u32) -> Result<()> {
        (**self).send(peer, bytes, message_id)
    }
}

/// Notification pushed by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Outcome for a message this side sent
    DeliveryResult {
        peer: String,
        message_id: u32,
        outcome: DeliveryOutcome,
    },

    /// Bytes arrived from `peer`
    Data { peer: String, bytes: Bytes },
}

/// Producer half handed to the transport callbacks
pub type EventSender = UnboundedSender<TransportEvent>;

/// Consumer half owned by the session
pub type EventReceiver = UnboundedReceiver<TransportEvent>;

/// Create the queue transport callbacks push into
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
