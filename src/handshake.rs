/// Resynchronization handshake
///
/// Two identifiers are reserved for control traffic and never enter the send
/// window or the receive sequencer:
/// - `RESET` (`u32::MAX`): the receiver saw a gap; the sender must clear its
///   window, rewind its source and restart numbering at 1
/// - `INFO` (`0`): metadata announced before data, resent after every reset
use tracing::{debug, warn};

use crate::contracts::{FileInfo, Message};
use crate::errors::Result;
use crate::transport::Transport;

/// A decoded control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Reset,
    Info(FileInfo),
}

impl ControlMessage {
    /// `None` for numbered data messages
    pub fn parse(message: &Message) -> Result<Option<Self>> {
        if message.is_reset() {
            return Ok(Some(Self::Reset));
        }
        if message.is_info() {
            return Ok(Some(Self::Info(FileInfo::decode(&message.payload)?)));
        }
        Ok(None)
    }
}

/// Ask the peer's sender to restart from identifier 1
pub fn send_reset<T: Transport + ?Sized>(transport: &T, peer: &str) -> Result<()> {
    let reset = Message::reset();
    debug!(peer, "sending reset");
    transport.send(peer, reset.encode(), reset.id).inspect_err(|err| {
        warn!(peer, error = %err, "reset rejected by transport");
    })
}

/// Announce transfer metadata ahead of numbered data
pub fn send_info<T: Transport + ?Sized>(transport: &T, peer: &str, info: &FileInfo) -> Result<()> {
    let message = Message::info(info)?;
    debug!(peer, name = %info.name, total_size = info.total_size, "sending file info");
    transport.send(peer, message.encode(), message.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use parking_lot::Mutex;

    use crate::{MSG_ID_INFO, MSG_ID_RESET};

    #[derive(Default)]
    struct Capture(Mutex<Vec<(u32, Bytes)>>);

    impl Transport for Capture {
        fn send(&self, _peer: &str, bytes: Bytes, message_id: u32) -> Result<()> {
            self.0.lock().push((message_id, bytes));
            Ok(())
        }
    }

    #[test]
    fn test_reset_round_trip() {
        let transport = Capture::default();
        send_reset(&transport, "peer").unwrap();

        let sent = transport.0.lock();
        assert_eq!(sent[0].0, MSG_ID_RESET);
        let message = Message::decode(&sent[0].1).unwrap();
        assert_eq!(ControlMessage::parse(&message).unwrap(), Some(ControlMessage::Reset));
    }

    #[test]
    fn test_info_round_trip() {
        let transport = Capture::default();
        let info = FileInfo::new(4096, "telemetry.bin");
        send_info(&transport, "peer", &info).unwrap();

        let sent = transport.0.lock();
        assert_eq!(sent[0].0, MSG_ID_INFO);
        let message = Message::decode(&sent[0].1).unwrap();
        assert_eq!(ControlMessage::parse(&message).unwrap(), Some(ControlMessage::Info(info)));
    }

    #[test]
    fn test_data_is_not_control() {
        let message = Message::new(5, Bytes::from_static(b"x")).unwrap();
        assert_eq!(ControlMessage::parse(&message).unwrap(), None);
    }
}
