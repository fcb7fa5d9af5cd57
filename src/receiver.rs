/// Receive side: in-order acceptance and gap detection
///
/// Delivery is strictly in order. There is no reorder buffer: a gap is never
/// filled by holding later arrivals, only by asking the sender to restart.
use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::contracts::{FileInfo, Message};
use crate::errors::Result;
use crate::handshake::{self, ControlMessage};
use crate::seq;
use crate::sink::PayloadSink;
use crate::transport::Transport;
use crate::FIRST_MSG_ID;

/// Verdict for an incoming data identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// The next identifier in sequence; consumed
    Expected,

    /// Already consumed; a duplicate from at-least-once delivery
    Stale,

    /// Something before it was lost; the stream must restart
    OutOfOrder,
}

/// Tracks the next expected identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveSequencer {
    expected_id: u32,
}

impl ReceiveSequencer {
    pub fn new() -> Self {
        Self {
            expected_id: FIRST_MSG_ID,
        }
    }

    pub fn expected_id(&self) -> u32 {
        self.expected_id
    }

    /// Classify a data identifier. Control identifiers never reach here.
    pub fn classify(&mut self, id: u32) -> Classification {
        debug_assert!(!seq::is_reserved(id), "control id {id} classified");
        if id == self.expected_id {
            self.expected_id = seq::next_id(self.expected_id);
            Classification::Expected
        } else if seq::before(id, self.expected_id) {
            Classification::Stale
        } else {
            Classification::OutOfOrder
        }
    }

    /// Restart at identifier 1
    pub fn reset(&mut self) {
        self.expected_id = FIRST_MSG_ID;
    }
}

impl Default for ReceiveSequencer {
    fn default() -> Self {
        Self::new()
    }
}

/// What the receiver did with one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiveOutcome {
    /// In-order payload handed to the sink
    Accepted { id: u32, progress: Option<f32> },

    /// Duplicate dropped
    Stale { id: u32 },

    /// Gap detected; sequencer and sink reset, one `RESET` sent
    Gap { expected: u32, got: u32 },

    /// Transfer metadata recorded
    Info(FileInfo),

    /// The peer asked our sender to restart
    ResetRequested,

    /// The announced size has been received; the stream starts over at 1
    Completed { id: u32, total: u64 },
}

/// Receive-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub accepted: u64,
    pub stale: u64,
    pub gaps: u64,
    pub resets_sent: u64,
    pub completed: u64,
    pub received_bytes: u64,
}

/// A transfer the sink has already finished
#[derive(Debug, Clone, PartialEq, Eq)]
struct FinishedTransfer {
    last_id: u32,
    info: FileInfo,
}

/// Inbound half of a session: sequencer plus sink
///
/// Once a transfer completes, late duplicates of its identifiers and of its
/// `INFO` are dropped without touching the sink. The finished output is only
/// replaced when a different `INFO` or an identifier past the old stream
/// starts a new transfer.
pub struct Receiver {
    peer: String,
    sequencer: ReceiveSequencer,
    sink: Box<dyn PayloadSink>,
    info: Option<FileInfo>,
    finished: Option<FinishedTransfer>,
    stats: ReceiveStats,
}

impl Receiver {
    pub fn new(peer: impl Into<String>, sink: Box<dyn PayloadSink>) -> Self {
        Self {
            peer: peer.into(),
            sequencer: ReceiveSequencer::new(),
            sink,
            info: None,
            finished: None,
            stats: ReceiveStats::default(),
        }
    }

    pub fn sequencer(&self) -> &ReceiveSequencer {
        &self.sequencer
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn file_info(&self) -> Option<&FileInfo> {
        self.info.as_ref()
    }

    /// Percent of the announced transfer received, capped at 100
    pub fn progress(&self) -> Option<f32> {
        let total = self.info.as_ref()?.total_size;
        if total == 0 {
            return None;
        }
        let pct = self.stats.received_bytes as f32 * 100.0 / total as f32;
        Some(pct.min(100.0))
    }

    /// Decode raw bytes from the transport and process them
    pub fn on_data<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        bytes: &Bytes,
    ) -> Result<ReceiveOutcome> {
        let message = Message::decode(bytes)?;
        self.on_message(transport, message)
    }

    /// Whether the last transfer completed and no new one has started yet
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Process one decoded message
    ///
    /// # Errors
    /// Sink failures and malformed `INFO` payloads. A failed write restarts
    /// the stream, so the chunk is delivered again rather than skipped.
    pub fn on_message<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        message: Message,
    ) -> Result<ReceiveOutcome> {
        match ControlMessage::parse(&message)? {
            Some(ControlMessage::Reset) => return Ok(ReceiveOutcome::ResetRequested),
            Some(ControlMessage::Info(info)) => return self.on_info(info),
            None => {}
        }

        let id = message.id;
        if let Some(done) = &self.finished {
            if seq::in_range(id, FIRST_MSG_ID, done.last_id) {
                trace!(peer = %self.peer, msg_id = id, "dropping duplicate of finished transfer");
                self.stats.stale += 1;
                return Ok(ReceiveOutcome::Stale { id });
            }
            debug!(peer = %self.peer, msg_id = id, "new stream after finished transfer");
            self.finished = None;
        }

        let expected = self.sequencer.expected_id();
        match self.sequencer.classify(id) {
            Classification::Expected => self.accept(transport, id, &message.payload),
            Classification::Stale => {
                trace!(peer = %self.peer, msg_id = id, expected, "dropping old message");
                self.stats.stale += 1;
                Ok(ReceiveOutcome::Stale { id })
            }
            Classification::OutOfOrder => {
                error!(peer = %self.peer, msg_id = id, expect_msg_id = expected, "not expected msg");
                self.resync(transport)?;
                Ok(ReceiveOutcome::Gap { expected, got: id })
            }
        }
    }

    fn on_info(&mut self, info: FileInfo) -> Result<ReceiveOutcome> {
        if let Some(done) = &self.finished {
            if done.info == info {
                trace!(peer = %self.peer, name = %info.name, "file info of finished transfer");
                return Ok(ReceiveOutcome::Info(info));
            }
            self.finished = None;
            self.sequencer.reset();
            self.sink.reset()?;
        }
        debug!(peer = %self.peer, name = %info.name, size = info.total_size, "got file info");
        self.sink.on_info(&info)?;
        self.info = Some(info.clone());
        Ok(ReceiveOutcome::Info(info))
    }

    fn accept<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
        id: u32,
        payload: &[u8],
    ) -> Result<ReceiveOutcome> {
        if let Err(err) = self.sink.write(payload) {
            warn!(peer = %self.peer, msg_id = id, error = %err, "sink rejected payload, restarting stream");
            self.resync(transport)?;
            return Err(err);
        }
        self.stats.accepted += 1;
        self.stats.received_bytes += payload.len() as u64;

        let progress = self.progress();
        debug!(peer = %self.peer, msg_id = id, msg_len = payload.len(), progress, "accepted");

        let total = self.info.as_ref().map(|i| u64::from(i.total_size));
        if let Some(total) = total.filter(|&t| t > 0 && self.stats.received_bytes >= t) {
            self.sink.finish()?;
            if let Some(info) = self.info.clone() {
                self.finished = Some(FinishedTransfer { last_id: id, info });
            }
            self.sequencer.reset();
            self.stats.received_bytes = 0;
            self.stats.completed += 1;
            info!(peer = %self.peer, total, "received file successfully, reset to initial state");
            return Ok(ReceiveOutcome::Completed { id, total });
        }
        Ok(ReceiveOutcome::Accepted { id, progress })
    }

    /// Handle a `RESET` from the peer: expect identifier 1 next and drop
    /// whatever the sink holds for the interrupted stream. A finished
    /// transfer is left alone.
    pub fn restart(&mut self) -> Result<()> {
        debug!(peer = %self.peer, expected = self.sequencer.expected_id(), "inbound stream reset");
        self.sequencer.reset();
        self.stats.received_bytes = 0;
        if self.finished.is_some() {
            return Ok(());
        }
        self.sink.reset()
    }

    /// Restart the inbound stream and ask the peer to do the same
    fn resync<T: Transport + ?Sized>(&mut self, transport: &T) -> Result<()> {
        self.sequencer.reset();
        self.stats.received_bytes = 0;
        self.stats.gaps += 1;

        // a lost RESET is recovered by the next out-of-order arrival
        match handshake::send_reset(transport, &self.peer) {
            Ok(()) => self.stats.resets_sent += 1,
            Err(err) => warn!(peer = %self.peer, error = %err, "could not send reset"),
        }
        self.sink.reset()
    }
}
