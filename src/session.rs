/// Session - one link to one peer
///
/// Owns the transport handle, the queue its callbacks push into, and either
/// half of the protocol (or both). Transport events are applied one at a time
/// from the queue, so the window and sequencer never see a callback
/// concurrently with a tick.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::LinkConfig;
use crate::contracts::Message;
use crate::errors::Result;
use crate::receiver::{ReceiveOutcome, Receiver};
use crate::sink::PayloadSink;
use crate::source::PayloadSource;
use crate::transmitter::{TickOutcome, Transmitter};
use crate::transport::{EventReceiver, Transport, TransportEvent};

/// Summary returned by [`Session::run`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    pub ticks: u64,
    pub events: u64,

    /// Events from peers other than ours
    pub foreign: u64,

    /// Inbound messages that could not be processed
    pub errors: u64,

    /// The transmitter delivered everything it had
    pub finished: bool,
}

pub struct Session<T: Transport> {
    peer: String,
    config: LinkConfig,
    transport: T,
    events: EventReceiver,
    transmitter: Option<Transmitter>,
    receiver: Option<Receiver>,
    report: SessionReport,
}

impl<T: Transport> Session<T> {
    /// Pacing options in `config` are clamped with [`LinkConfig::normalized`]
    pub fn new(peer: impl Into<String>, transport: T, events: EventReceiver, config: &LinkConfig) -> Self {
        Self {
            peer: peer.into(),
            config: config.clone().normalized(),
            transport,
            events,
            transmitter: None,
            receiver: None,
            report: SessionReport::default(),
        }
    }

    /// Send the contents of `source` to the peer
    pub fn with_transmitter(mut self, source: Box<dyn PayloadSource>) -> Self {
        self.transmitter = Some(Transmitter::new(self.peer.clone(), source, &self.config));
        self
    }

    /// Deliver the peer's stream into `sink`
    pub fn with_receiver(mut self, sink: Box<dyn PayloadSink>) -> Self {
        self.receiver = Some(Receiver::new(self.peer.clone(), sink));
        self
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transmitter(&self) -> Option<&Transmitter> {
        self.transmitter.as_ref()
    }

    pub fn receiver(&self) -> Option<&Receiver> {
        self.receiver.as_ref()
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    /// Apply one transport notification
    ///
    /// # Errors
    /// Malformed inbound bytes, sink failures, and source failures while
    /// rewinding after a `RESET`.
    pub fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        self.report.events += 1;
        match event {
            TransportEvent::DeliveryResult { peer, message_id, outcome } => {
                if peer != self.peer {
                    self.report.foreign += 1;
                    trace!(%peer, msg_id = message_id, "result for foreign peer");
                    return Ok(());
                }
                trace!(%peer, msg_id = message_id, ?outcome, "delivery result");
                if let Some(tx) = self.transmitter.as_mut() {
                    tx.on_delivery_result(message_id, outcome);
                }
                Ok(())
            }
            TransportEvent::Data { peer, bytes } => {
                if peer != self.peer {
                    self.report.foreign += 1;
                    trace!(%peer, len = bytes.len(), "data from foreign peer");
                    return Ok(());
                }
                let message = Message::decode(&bytes)?;
                if message.is_reset() {
                    return self.on_reset_request();
                }
                match self.receiver.as_mut() {
                    Some(rx) => {
                        let outcome = rx.on_message(&self.transport, message)?;
                        if let ReceiveOutcome::Completed { total, .. } = outcome {
                            debug!(peer = %self.peer, total, "inbound transfer complete");
                        }
                        Ok(())
                    }
                    None => {
                        trace!(peer = %self.peer, msg_id = message.id, "no receiver, dropping");
                        Ok(())
                    }
                }
            }
        }
    }

    fn on_reset_request(&mut self) -> Result<()> {
        if let Some(rx) = self.receiver.as_mut() {
            rx.restart()?;
        }
        match self.transmitter.as_mut() {
            Some(tx) => tx.on_reset(),
            None => {
                debug!(peer = %self.peer, "reset request with nothing to send");
                Ok(())
            }
        }
    }

    /// Apply everything already queued without waiting
    pub fn drain_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.dispatch(event);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, event: TransportEvent) {
        if let Err(err) = self.handle_event(event) {
            self.report.errors += 1;
            warn!(peer = %self.peer, error = %err, "failed to handle transport event");
        }
    }

    /// Drive the producer once; `None` when this session only receives
    pub fn tick(&mut self, now: Instant) -> Result<Option<TickOutcome>> {
        self.report.ticks += 1;
        match self.transmitter.as_mut() {
            Some(tx) => tx.tick(&self.transport, now).map(Some),
            None => Ok(None),
        }
    }

    /// Pacing interval between producer ticks
    pub fn tick_interval(&self) -> Duration {
        self.config.send_interval()
    }

    /// Run until `stop` is set, the transport goes away, or the transmitter
    /// reports every message delivered
    ///
    /// # Errors
    /// Source failures from the transmitter. Problems with individual
    /// inbound messages are logged and counted in the report.
    pub async fn run(&mut self, stop: Arc<AtomicBool>) -> Result<SessionReport> {
        let mut interval = tokio::time::interval(self.tick_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            peer = %self.peer,
            sending = self.transmitter.is_some(),
            receiving = self.receiver.is_some(),
            interval_ms = self.tick_interval().as_millis() as u64,
            "session started"
        );

        loop {
            tokio::select! {
                at = interval.tick() => {
                    if stop.load(Ordering::Relaxed) {
                        debug!(peer = %self.peer, "stop requested");
                        break;
                    }
                    if let Some(TickOutcome::Finished) = self.tick(at.into_std())? {
                        self.report.finished = true;
                        info!(peer = %self.peer, "all messages delivered");
                        break;
                    }
                }
                event = self.events.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        warn!(peer = %self.peer, "transport event queue closed");
                        break;
                    }
                },
            }
        }

        Ok(self.report.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::config::LinkConfigBuilder;
    use crate::simulator::MemoryLink;
    use crate::sink::LogSink;
    use crate::source::RandomSource;
    use crate::transport::DeliveryOutcome;
    use crate::MSG_ID_RESET;

    fn config() -> LinkConfig {
        LinkConfigBuilder::new()
            .with_window_size(4)
            .with_send_size(64)
            .build()
            .unwrap()
    }

    #[test]
    fn test_pacing_is_clamped() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let raw = LinkConfigBuilder::new()
            .with_send_size(0)
            .with_send_kbps(1_000_000)
            .build()
            .unwrap();
        let session = Session::new("gello", a.transport, a.events, &raw)
            .with_transmitter(Box::new(RandomSource::with_seed(1, 64, Some(1))));

        assert_eq!(session.config().send_size, crate::DEFAULT_SEND_SIZE);
        assert_eq!(session.config().send_kbps, crate::config::DEFAULT_SEND_KBPS);
        assert_eq!(session.tick_interval(), Duration::from_micros(111_111));
    }

    #[test]
    fn test_foreign_events_are_ignored() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let mut session = Session::new("gello", a.transport, a.events, &config())
            .with_transmitter(Box::new(RandomSource::with_seed(1, 64, Some(4))));
        session.tick(Instant::now()).unwrap();

        session
            .handle_event(TransportEvent::DeliveryResult {
                peer: "other".into(),
                message_id: 1,
                outcome: DeliveryOutcome::Delivered,
            })
            .unwrap();
        assert_eq!(session.report().foreign, 1);
        assert!(session.transmitter().unwrap().window().contains(1));
    }

    #[test]
    fn test_drained_results_release_window() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let mut session = Session::new("gello", a.transport, a.events, &config())
            .with_transmitter(Box::new(RandomSource::with_seed(1, 64, Some(2))));
        let now = Instant::now();
        session.tick(now).unwrap();
        session.tick(now).unwrap();

        assert_eq!(session.drain_events(), 2);
        assert!(session.transmitter().unwrap().window().is_empty());
        assert_eq!(session.tick(now).unwrap(), Some(TickOutcome::Finished));
    }

    #[test]
    fn test_inbound_reset_restarts_transmitter() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let mut session = Session::new("gello", a.transport, a.events, &config())
            .with_transmitter(Box::new(RandomSource::with_seed(1, 64, None)));
        let now = Instant::now();
        for _ in 0..3 {
            session.tick(now).unwrap();
        }

        session
            .handle_event(TransportEvent::Data {
                peer: "gello".into(),
                bytes: Message::reset().encode(),
            })
            .unwrap();
        let tx = session.transmitter().unwrap();
        assert!(tx.window().is_empty());
        assert_eq!(tx.stats().resets, 1);
    }

    #[test]
    fn test_receiver_gap_sends_reset_to_peer() {
        let (a, mut b) = MemoryLink::pair("arm", "gello");
        let mut session = Session::new("gello", a.transport, a.events, &config())
            .with_receiver(Box::new(LogSink::new()));

        let gap = Message::new(3, Bytes::from_static(b"x")).unwrap();
        session
            .handle_event(TransportEvent::Data { peer: "gello".into(), bytes: gap.encode() })
            .unwrap();

        match b.events.try_recv().unwrap() {
            TransportEvent::Data { bytes, .. } => {
                assert_eq!(Message::decode(&bytes).unwrap().id, MSG_ID_RESET);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(session.receiver().unwrap().stats().resets_sent, 1);
    }

    #[test]
    fn test_malformed_data_is_counted() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let (tx, events) = crate::transport::event_queue();
        let mut session = Session::new("gello", a.transport, events, &config())
            .with_receiver(Box::new(LogSink::new()));

        tx.send(TransportEvent::Data { peer: "gello".into(), bytes: Bytes::from_static(&[0xFF]) })
            .unwrap();
        assert_eq!(session.drain_events(), 1);
        assert_eq!(session.report().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_flag() {
        let (a, _b) = MemoryLink::pair("arm", "gello");
        let mut session = Session::new("gello", a.transport, a.events, &config())
            .with_receiver(Box::new(LogSink::new()));

        let stop = Arc::new(AtomicBool::new(true));
        let report = session.run(stop).await.unwrap();
        assert!(!report.finished);
        assert_eq!(report.ticks, 0);
    }
}
