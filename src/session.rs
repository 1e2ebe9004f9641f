//! Per-peer session state: at most one sender half and one receiver half,
//! keyed by the remote [`Peer`](crate::packet::Peer) in the owning socket's
//! session table.
//!
//! A session comes into being the moment either half is created — a local
//! `sendto` creates the sender half and opens a handshake; an inbound SYN
//! creates the receiver half. Either can exist without the other: a socket
//! that only ever receives from a peer has no sender half for it, and vice
//! versa.

use crate::receiver::ReceiverHalf;
use crate::sender::SenderHalf;

#[derive(Default)]
pub struct Session {
    pub sender: Option<SenderHalf>,
    pub receiver: Option<ReceiverHalf>,
}

impl Session {
    pub fn new() -> Self {
        Session::default()
    }

    /// A session is done once every half it actually has is finished; a
    /// half that was never created counts as vacuously finished.
    pub fn is_finished(&self) -> bool {
        self.sender.as_ref().map_or(true, |s| s.finished())
            && self.receiver.as_ref().map_or(true, |r| r.finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_is_finished() {
        assert!(Session::new().is_finished());
    }

    #[test]
    fn session_with_unfinished_sender_is_not_finished() {
        let (sender, _) = SenderHalf::open(0, b"hi".to_vec(), crate::config::ProtocolConfig::default());
        let session = Session { sender: Some(sender), receiver: None };
        assert!(!session.is_finished());
    }
}
