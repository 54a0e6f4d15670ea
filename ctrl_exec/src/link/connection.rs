//! Connection handle for an active link session.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::sync::{
    mpsc::{Receiver, Sender, SyncSender},
    Arc, Mutex,
};

use comms_if::{eqpt::motor::MotorMessage, net::zmq};

use super::LinkCmd;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A handle to exactly one active wireless session with a motor board.
///
/// The handle owns the receive side of the session (the notice channel) and
/// a send capability. Once the session closes (intentionally, because it
/// was replaced by a new connect, or because the link was lost) every
/// operation fails with the original close reason. Dropping the handle
/// closes the session: handle lifetime is the session lifetime.
pub struct Connection {
    pub(super) cmd_tx: Sender<LinkCmd>,
    pub(super) out_tx: Sender<Outbound>,
    pub(super) notices: Option<Receiver<LinkNotice>>,
    pub(super) shared: Arc<ConnShared>,
    pub(super) max_write_len: usize,

    /// Identifies which session this handle belongs to, so a stale handle
    /// being dropped can never tear down a newer session
    pub(super) epoch: u64,
}

/// State shared between a connection handle and the link manager thread.
#[derive(Default)]
pub(super) struct ConnShared {
    /// Why the session closed. `None` while it is alive; written exactly
    /// once (first writer wins).
    pub closed: Mutex<Option<CloseReason>>,
}

/// A frame queued for transmission, already split into chunks no larger
/// than the negotiated maximum write length.
pub(super) struct Outbound {
    pub chunks: Vec<Vec<u8>>,

    /// For acknowledged sends, where the write result is reported back
    pub ack: Option<SyncSender<Result<(), LinkError>>>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The link dropped unexpectedly
    Lost,

    /// A new connect attempt replaced this session
    Replaced,

    /// The owner closed the session (explicitly or by dropping the handle)
    Closed,
}

/// Items observed on a connection's receive stream. The final item is
/// always the close reason, delivered before the session's resources are
/// torn down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkNotice {
    /// A complete frame arrived from the board
    Message(MotorMessage),

    /// The session is over; no further notices will arrive
    Closed(CloseReason),
}

/// Errors surfaced by the link layer.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Could not load parameters: {0}")]
    ParamLoadError(util::params::LoadError),

    #[error("Socket error: {0}")]
    SocketError(comms_if::net::MonitoredSocketError),

    #[error("The connection is closed ({0})")]
    Closed(CloseReason),

    #[error("Could not write to the link: {0}")]
    SendFailed(zmq::Error),

    #[error("Connect attempt failed: {0}")]
    ConnectFailed(String),

    #[error("The board did not complete the handshake in time")]
    HandshakeTimeout,

    #[error("The link manager is no longer running")]
    MgrUnavailable,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CloseReason::Lost => write!(f, "lost unexpectedly"),
            CloseReason::Replaced => write!(f, "replaced by a new connection"),
            CloseReason::Closed => write!(f, "closed by owner"),
        }
    }
}

impl Connection {
    /// Maximum single-write size negotiated with the board.
    pub fn max_write_len(&self) -> usize {
        self.max_write_len
    }

    /// Claim the notice (receive) channel. Can only be claimed once.
    pub fn take_notices(&mut self) -> Option<Receiver<LinkNotice>> {
        self.notices.take()
    }

    /// The close reason, if the session has closed.
    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.shared.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Send a message without waiting for the write to complete.
    pub fn send(&self, msg: &MotorMessage) -> Result<(), LinkError> {
        self.queue(msg, None)
    }

    /// Send a message and wait for the link write to be acknowledged.
    pub fn send_acked(&self, msg: &MotorMessage) -> Result<(), LinkError> {
        let (ack_tx, ack_rx) = std::sync::mpsc::sync_channel(1);

        self.queue(msg, Some(ack_tx))?;

        match ack_rx.recv() {
            Ok(result) => result,
            // The session closed before the write happened
            Err(_) => Err(LinkError::Closed(
                self.close_reason().unwrap_or(CloseReason::Lost),
            )),
        }
    }

    /// Close the session explicitly.
    pub fn close(&mut self) {
        self.close_with_reason(CloseReason::Closed);
    }

    fn queue(
        &self,
        msg: &MotorMessage,
        ack: Option<SyncSender<Result<(), LinkError>>>,
    ) -> Result<(), LinkError> {
        // A closed session reports its original close reason, not a generic
        // failure
        if let Some(reason) = self.close_reason() {
            return Err(LinkError::Closed(reason));
        }

        let frame = msg.encode();
        let chunks = frame
            .chunks(self.max_write_len.max(1))
            .map(|c| c.to_vec())
            .collect();

        self.out_tx
            .send(Outbound { chunks, ack })
            .map_err(|_| {
                LinkError::Closed(self.close_reason().unwrap_or(CloseReason::Lost))
            })
    }

    fn close_with_reason(&mut self, reason: CloseReason) {
        {
            let mut closed = self.shared.closed.lock().unwrap_or_else(|e| e.into_inner());
            if closed.is_none() {
                *closed = Some(reason);
            } else {
                // Already closed by the link manager side, nothing to do
                return;
            }
        }

        // Ask the manager thread to tear the session down. A dead manager
        // has already torn it down.
        self.cmd_tx
            .send(LinkCmd::Disconnect { epoch: self.epoch })
            .ok();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Losing ownership of the handle closes the session
        self.close_with_reason(CloseReason::Closed);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;

    fn test_connection() -> (
        Connection,
        Receiver<LinkCmd>,
        Receiver<Outbound>,
        Arc<ConnShared>,
    ) {
        let (cmd_tx, cmd_rx) = channel();
        let (out_tx, out_rx) = channel();
        let (_notice_tx, notice_rx) = channel();
        let shared = Arc::new(ConnShared::default());

        let conn = Connection {
            cmd_tx,
            out_tx,
            notices: Some(notice_rx),
            shared: shared.clone(),
            max_write_len: 4,
            epoch: 7,
        };

        (conn, cmd_rx, out_rx, shared)
    }

    #[test]
    fn test_send_chunks_to_max_write_len() {
        let (conn, _cmd_rx, out_rx, _shared) = test_connection();

        conn.send(&MotorMessage::Ping { timestamp_s: 1.0 }).unwrap();

        let out = out_rx.try_recv().unwrap();
        // A 10 byte frame in 4 byte chunks
        assert_eq!(out.chunks.len(), 3);
        assert_eq!(out.chunks[0].len(), 4);
        assert_eq!(out.chunks[2].len(), 2);

        let rejoined: Vec<u8> = out.chunks.concat();
        assert_eq!(
            MotorMessage::decode(&rejoined),
            Ok(MotorMessage::Ping { timestamp_s: 1.0 })
        );
    }

    #[test]
    fn test_send_after_close_reports_original_reason() {
        let (conn, _cmd_rx, _out_rx, shared) = test_connection();

        // The link manager closed the session as lost
        *shared.closed.lock().unwrap() = Some(CloseReason::Lost);

        match conn.send(&MotorMessage::Ping { timestamp_s: 0.0 }) {
            Err(LinkError::Closed(CloseReason::Lost)) => (),
            other => panic!("Expected Closed(Lost), got {:?}", other),
        }
    }

    #[test]
    fn test_drop_requests_disconnect_with_epoch() {
        let (conn, cmd_rx, _out_rx, shared) = test_connection();

        drop(conn);

        match cmd_rx.try_recv() {
            Ok(LinkCmd::Disconnect { epoch }) => assert_eq!(epoch, 7),
            other => panic!("Expected a disconnect command, got {:?}", other),
        }
        assert_eq!(*shared.closed.lock().unwrap(), Some(CloseReason::Closed));
    }

    #[test]
    fn test_drop_after_external_close_is_silent() {
        let (conn, cmd_rx, _out_rx, shared) = test_connection();

        *shared.closed.lock().unwrap() = Some(CloseReason::Replaced);
        drop(conn);

        // The already-closed session is not closed again
        assert!(cmd_rx.try_recv().is_err());
        assert_eq!(*shared.closed.lock().unwrap(), Some(CloseReason::Replaced));
    }
}
