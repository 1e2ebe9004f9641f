//! Receiver half state machine: `OPENING -> OPEN`, plus a terminal
//! `finished` flag once a FIN has been accepted.
//!
//! Like [`crate::sender::SenderHalf`], this is I/O-free: methods return
//! [`ReceiverAction`]s (ack this, deliver that, we're finished) rather than
//! touching a socket directly, so the state machine can be driven and
//! asserted against without a reactor.

use crate::packet::Packet;
use crate::seq::{seq_geq, seq_lt};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Opening,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverAction {
    Ack(Packet),
    /// Payload accepted in order; hand it to the application callback.
    Deliver(Vec<u8>),
    Finished,
}

pub struct ReceiverHalf {
    pub state: ReceiverState,
    expected: u32,
    finished: bool,
    window: usize,
}

impl ReceiverHalf {
    /// A SYN arrived for a peer with no existing receiver half.
    pub fn on_syn(seqno: u32, window: usize) -> (Self, Vec<ReceiverAction>) {
        let expected = seqno.wrapping_add(1);
        let half = ReceiverHalf { state: ReceiverState::Opening, expected, finished: false, window };
        (half, vec![ReceiverAction::Ack(Packet::ack(expected))])
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn expected_seqno(&self) -> u32 {
        self.expected
    }

    /// A SYN arrived for a peer that already has a receiver half. Restarts
    /// the handshake if still OPENING (guards against a lost first ACK);
    /// ignored once OPEN, to protect against spurious restarts — this is
    /// deliberately preserved even though it means a first DATA after such a
    /// stray SYN may land at an unexpected sequence number.
    pub fn on_syn_existing(&mut self, seqno: u32) -> Vec<ReceiverAction> {
        match self.state {
            ReceiverState::Opening => {
                self.expected = seqno.wrapping_add(1);
                vec![ReceiverAction::Ack(Packet::ack(self.expected))]
            }
            ReceiverState::Open => Vec::new(),
        }
    }

    pub fn on_data(&mut self, seqno: u32, payload: Vec<u8>) -> Vec<ReceiverAction> {
        if seqno == self.expected {
            self.state = ReceiverState::Open;
            self.expected = self.expected.wrapping_add(1);
            vec![ReceiverAction::Deliver(payload), ReceiverAction::Ack(Packet::ack(self.expected))]
        } else if self.in_retrospective_window(seqno) {
            vec![ReceiverAction::Ack(Packet::ack(seqno.wrapping_add(1)))]
        } else {
            Vec::new()
        }
    }

    pub fn on_fin(&mut self, seqno: u32) -> Vec<ReceiverAction> {
        if seqno == self.expected {
            self.expected = self.expected.wrapping_add(1);
            self.finished = true;
            vec![ReceiverAction::Ack(Packet::ack(seqno.wrapping_add(1))), ReceiverAction::Finished]
        } else {
            Vec::new()
        }
    }

    /// `seqno in [expected - W, expected)`, computed with wraparound.
    fn in_retrospective_window(&self, seqno: u32) -> bool {
        let low = self.expected.wrapping_sub(self.window as u32);
        seq_geq(seqno, low) && seq_lt(seqno, self.expected)
    }
}
