//! Sender half state machine: `SYN_SENT -> OPEN -> FIN_SENT -> finished`.
//!
//! This module is deliberately I/O-free: every method takes the current
//! event and returns a list of [`SenderAction`]s describing what the caller
//! must do (send a packet, start or cancel a timer, surface a timeout, or
//! note that the half has finished). The glue in `socket.rs` is what turns
//! those actions into real sends and real reactor timers; that split is
//! what lets the state machine itself be unit tested without a reactor or a
//! socket (see the tests below and `tests/scenarios.rs`).

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ProtocolConfig;
use crate::packet::Packet;
use crate::seq::seq_lt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    SynSent,
    Open,
    FinSent,
}

/// Identifies which outstanding timer an action or timer-fire event refers
/// to. `Data` slots are tagged by a token assigned when the packet entered
/// the window, not by window position, so that a shift-on-ACK never
/// confuses one packet's timer for another's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    Syn,
    Fin,
    Data(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderAction {
    Send(Packet),
    StartTimer { slot: TimerSlot, after: Duration },
    CancelTimer { slot: TimerSlot },
    /// Retry ceiling exceeded for `slot`; the socket should emit a TIMEOUT
    /// event naming the peer. The session is not torn down automatically.
    Timeout,
    /// The FIN for this half was acknowledged; the half is now finished.
    Finished,
}

struct WindowEntry {
    token: u64,
    packet: Packet,
    retries: u32,
}

pub struct SenderHalf {
    pub state: SenderState,
    next_seqno: u32,
    syn_seqno: u32,
    syn_retries: u32,
    fin_seqno: u32,
    fin_retries: u32,
    window: VecDeque<WindowEntry>,
    queue: VecDeque<Vec<u8>>,
    close_requested: bool,
    finished: bool,
    next_token: u64,
    cfg: ProtocolConfig,
}

impl SenderHalf {
    /// A peer is being addressed for the first time: choose (the caller
    /// already chose) an initial sequence number, enqueue the first
    /// payload, send SYN, and start the SYN timer.
    pub fn open(initial_seqno: u32, first_payload: Vec<u8>, cfg: ProtocolConfig) -> (Self, Vec<SenderAction>) {
        let mut half = SenderHalf {
            state: SenderState::SynSent,
            next_seqno: initial_seqno,
            syn_seqno: initial_seqno,
            syn_retries: 0,
            fin_seqno: 0,
            fin_retries: 0,
            window: VecDeque::new(),
            queue: VecDeque::new(),
            close_requested: false,
            finished: false,
            next_token: 0,
            cfg,
        };
        half.queue.push_back(first_payload);
        let actions = vec![
            SenderAction::Send(Packet::syn(initial_seqno)),
            SenderAction::StartTimer { slot: TimerSlot::Syn, after: cfg.timeout },
        ];
        (half, actions)
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn is_idle(&self) -> bool {
        self.window.is_empty() && self.queue.is_empty()
    }

    /// Application asked to send more bytes to this peer. Only meaningful
    /// while the half is not already tearing down; the socket gates
    /// `sendto` on a closing socket before ever reaching here.
    pub fn send(&mut self, data: Vec<u8>) -> Vec<SenderAction> {
        self.queue.push_back(data);
        if self.state == SenderState::Open {
            self.refill()
        } else {
            Vec::new()
        }
    }

    /// The application requested an orderly close. If there is nothing
    /// left in flight, the FIN goes out immediately; otherwise it waits
    /// until the outstanding window and queue drain (checked again in
    /// `on_ack`).
    pub fn close(&mut self) -> Vec<SenderAction> {
        self.close_requested = true;
        self.maybe_send_fin()
    }

    fn maybe_send_fin(&mut self) -> Vec<SenderAction> {
        if self.close_requested
            && self.state == SenderState::Open
            && self.window.is_empty()
            && self.queue.is_empty()
        {
            self.next_seqno = self.next_seqno.wrapping_add(1);
            self.fin_seqno = self.next_seqno;
            self.fin_retries = 0;
            self.state = SenderState::FinSent;
            return vec![
                SenderAction::Send(Packet::fin(self.fin_seqno)),
                SenderAction::StartTimer { slot: TimerSlot::Fin, after: self.cfg.timeout },
            ];
        }
        Vec::new()
    }

    /// Drain the outbound queue into free trailing window slots, assigning
    /// consecutive sequence numbers in queue order.
    fn refill(&mut self) -> Vec<SenderAction> {
        let mut actions = Vec::new();
        while self.window.len() < self.cfg.window {
            let Some(data) = self.queue.pop_front() else { break };
            self.next_seqno = self.next_seqno.wrapping_add(1);
            let seqno = self.next_seqno;
            let packet = Packet::data(seqno, data);
            let token = self.next_token;
            self.next_token += 1;

            actions.push(SenderAction::Send(packet.clone()));
            actions.push(SenderAction::StartTimer { slot: TimerSlot::Data(token), after: self.cfg.timeout });

            self.window.push_back(WindowEntry { token, packet, retries: 0 });
        }
        actions
    }

    /// An ACK arrived. Only the ACK whose seqno equals `window[0].seqno + 1`
    /// (or the SYN/FIN equivalent) advances anything: this is a go-back-0
    /// cumulative ACK limited to the head of the window.
    pub fn on_ack(&mut self, ack_seqno: u32) -> Vec<SenderAction> {
        match self.state {
            SenderState::SynSent => {
                if ack_seqno == self.syn_seqno.wrapping_add(1) {
                    let mut actions = vec![SenderAction::CancelTimer { slot: TimerSlot::Syn }];
                    self.state = SenderState::Open;
                    actions.extend(self.refill());
                    actions.extend(self.maybe_send_fin());
                    actions
                } else {
                    Vec::new()
                }
            }
            SenderState::Open => {
                let Some(front) = self.window.front() else { return Vec::new() };
                if ack_seqno != front.packet.seqno.wrapping_add(1) {
                    return Vec::new();
                }
                let popped = self.window.pop_front().expect("checked front above");
                let mut actions = vec![SenderAction::CancelTimer { slot: TimerSlot::Data(popped.token) }];
                actions.extend(self.refill());
                actions.extend(self.maybe_send_fin());
                actions
            }
            SenderState::FinSent => {
                if ack_seqno == self.fin_seqno.wrapping_add(1) {
                    self.finished = true;
                    vec![
                        SenderAction::CancelTimer { slot: TimerSlot::Fin },
                        SenderAction::Finished,
                    ]
                } else {
                    Vec::new()
                }
            }
        }
    }

    /// A retransmission timer fired. `slot` names which one; a `Data` slot
    /// whose token is no longer in the window is stale (the packet was
    /// already acknowledged and popped) and is silently ignored.
    pub fn on_timer_fire(&mut self, slot: TimerSlot) -> Vec<SenderAction> {
        match slot {
            TimerSlot::Syn => {
                if self.state != SenderState::SynSent {
                    return Vec::new();
                }
                if self.syn_retries >= self.cfg.max_retrans {
                    return vec![SenderAction::Timeout];
                }
                self.syn_retries += 1;
                vec![
                    SenderAction::Send(Packet::syn(self.syn_seqno)),
                    SenderAction::StartTimer { slot: TimerSlot::Syn, after: self.cfg.timeout },
                ]
            }
            TimerSlot::Fin => {
                if self.state != SenderState::FinSent {
                    return Vec::new();
                }
                if self.fin_retries >= self.cfg.max_retrans {
                    return vec![SenderAction::Timeout];
                }
                self.fin_retries += 1;
                vec![
                    SenderAction::Send(Packet::fin(self.fin_seqno)),
                    SenderAction::StartTimer { slot: TimerSlot::Fin, after: self.cfg.timeout },
                ]
            }
            TimerSlot::Data(token) => {
                let Some(entry) = self.window.iter_mut().find(|e| e.token == token) else {
                    return Vec::new();
                };
                if entry.retries >= self.cfg.max_retrans {
                    return vec![SenderAction::Timeout];
                }
                entry.retries += 1;
                let resend = entry.packet.clone();
                vec![
                    SenderAction::Send(resend),
                    SenderAction::StartTimer { slot: TimerSlot::Data(token), after: self.cfg.timeout },
                ]
            }
        }
    }

    /// Testable invariant #5: the window is left-packed by construction —
    /// it only ever holds occupied slots, in send order, so there is never
    /// a gap to check for. Exposed for property tests that want to assert
    /// the stronger, explicit property against the window contents.
    pub fn window_seqnos(&self) -> Vec<u32> {
        self.window.iter().map(|e| e.packet.seqno).collect()
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

/// Sanity helper used by the dispatcher: is `ack_seqno` old enough that it
/// could only be a duplicate of something already fully acknowledged?
pub fn is_stale_ack(ack_seqno: u32, window_front_seqno: Option<u32>) -> bool {
    match window_front_seqno {
        Some(front) => seq_lt(ack_seqno, front),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn cfg() -> ProtocolConfig {
        ProtocolConfig { window: 3, max_retrans: 5, timeout: Duration::from_millis(2000) }
    }

    #[test]
    fn open_sends_syn_and_starts_timer() {
        let (sender, actions) = SenderHalf::open(100, b"hello".to_vec(), cfg());
        assert_eq!(sender.state, SenderState::SynSent);
        assert_eq!(
            actions,
            vec![
                SenderAction::Send(Packet::syn(100)),
                SenderAction::StartTimer { slot: TimerSlot::Syn, after: Duration::from_millis(2000) },
            ]
        );
    }

    #[test]
    fn syn_ack_opens_and_drains_first_payload() {
        let (mut sender, _) = SenderHalf::open(100, b"hello".to_vec(), cfg());
        let actions = sender.on_ack(101);
        assert_eq!(sender.state, SenderState::Open);
        assert_eq!(
            actions,
            vec![
                SenderAction::CancelTimer { slot: TimerSlot::Syn },
                SenderAction::Send(Packet::data(101, b"hello".to_vec())),
                SenderAction::StartTimer { slot: TimerSlot::Data(0), after: Duration::from_millis(2000) },
            ]
        );
        assert_eq!(sender.window_seqnos(), vec![101]);
    }

    #[test]
    fn windowed_burst_keeps_one_payload_queued() {
        let (mut sender, _) = SenderHalf::open(0, b"P1".to_vec(), cfg());
        sender.send(b"P2".to_vec());
        sender.send(b"P3".to_vec());
        sender.send(b"P4".to_vec());

        let actions = sender.on_ack(1);
        let sent: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SenderAction::Send(p) => Some(p.seqno),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![1, 2, 3]);
        assert_eq!(sender.window_seqnos(), vec![1, 2, 3]);
        assert_eq!(sender.queue_len(), 1);

        let actions = sender.on_ack(2);
        let sent: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                SenderAction::Send(p) => Some(p.seqno),
                _ => None,
            })
            .collect();
        assert_eq!(sent, vec![4]);
        assert_eq!(sender.window_seqnos(), vec![2, 3, 4]);
    }

    #[test]
    fn ack_for_other_seqno_is_ignored() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1); // opens, sends data seq 1
        assert!(sender.on_ack(99).is_empty());
        assert_eq!(sender.window_seqnos(), vec![1]);
    }

    #[test]
    fn data_timer_retransmits_until_ceiling() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1);
        let token = TimerSlot::Data(0);

        for expected_retry in 1..=5u32 {
            let actions = sender.on_timer_fire(token);
            assert_eq!(
                actions,
                vec![
                    SenderAction::Send(Packet::data(1, b"hi".to_vec())),
                    SenderAction::StartTimer { slot: token, after: Duration::from_millis(2000) },
                ],
                "retry {expected_retry}"
            );
        }

        let actions = sender.on_timer_fire(token);
        assert_eq!(actions, vec![SenderAction::Timeout]);
    }

    #[test]
    fn stale_data_timer_after_ack_is_noop() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1);
        sender.on_ack(2); // acks the only data packet, pops it
        assert!(sender.on_timer_fire(TimerSlot::Data(0)).is_empty());
    }

    #[test]
    fn close_with_empty_window_sends_fin_immediately() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1);
        sender.on_ack(2); // drains queue+window
        let actions = sender.close();
        assert_eq!(sender.state, SenderState::FinSent);
        assert_eq!(
            actions,
            vec![
                SenderAction::Send(Packet::fin(3)),
                SenderAction::StartTimer { slot: TimerSlot::Fin, after: Duration::from_millis(2000) },
            ]
        );
    }

    #[test]
    fn close_with_pending_window_waits_then_sends_fin() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1); // window now has seq 1
        let actions = sender.close();
        assert!(actions.is_empty());
        assert_eq!(sender.state, SenderState::Open);

        let actions = sender.on_ack(2); // drains window, queue already empty
        assert_eq!(sender.state, SenderState::FinSent);
        assert!(actions.iter().any(|a| matches!(a, SenderAction::Send(p) if p.kind == crate::packet::PacketType::Fin)));
    }

    #[test]
    fn fin_ack_marks_finished() {
        let (mut sender, _) = SenderHalf::open(0, b"hi".to_vec(), cfg());
        sender.on_ack(1);
        sender.on_ack(2);
        sender.close();
        let actions = sender.on_ack(4);
        assert!(sender.finished());
        assert_eq!(
            actions,
            vec![SenderAction::CancelTimer { slot: TimerSlot::Fin }, SenderAction::Finished]
        );
    }

    proptest! {
        /// Testable invariant #4/#5: no matter what sequence of sends and
        /// (possibly bogus) ACKs arrives, the window never grows past the
        /// configured size and stays left-packed.
        #[test]
        fn window_never_exceeds_configured_size(
            initial_seqno: u32,
            payload_count in 0usize..12,
            acks in proptest::collection::vec(any::<u32>(), 0..20),
        ) {
            let (mut sender, _) = SenderHalf::open(initial_seqno, b"first".to_vec(), cfg());
            for i in 0..payload_count {
                sender.send(vec![i as u8]);
            }
            for ack in acks {
                sender.on_ack(ack);
                prop_assert!(sender.window_seqnos().len() <= cfg().window);
            }
        }
    }
}
