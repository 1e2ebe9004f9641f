//! A bound UDP socket multiplexing many peer sessions.
//!
//! `Socket` owns the OS socket and the table of per-peer [`Session`]s. It
//! knows how to turn a [`SenderAction`]/[`ReceiverAction`] list into a real
//! send or a real reactor timer, but it does not itself decide what those
//! actions should be — that is [`crate::dispatcher`]'s job for inbound
//! datagrams, and the half's own methods for calls the application makes
//! directly (`sendto`, `close`).
//!
//! Registering a timer needs a callback that, when the reactor fires it
//! later, finds its way back to this exact socket and peer. `Socket` itself
//! has no notion of how it is reached from the reactor loop (that is owned
//! by [`crate::engine`], which holds the shared, `Rc<RefCell<_>>`-guarded
//! table `Socket`s live in) so every method that may start a timer takes a
//! `make_timer_callback` factory supplied by the caller instead of baking
//! that knowledge in here.

use std::collections::HashMap;
use std::net::{Ipv4Addr, UdpSocket};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::config::ProtocolConfig;
use crate::err::Error;
use crate::packet::{Packet, Peer, MAX_PAYLOAD};
use crate::reactor::{PollReactor, TimerId};
use crate::receiver::ReceiverAction;
use crate::sender::{SenderAction, TimerSlot};
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(pub(crate) u64);

/// Events that travel through the application's event callback rather than
/// as a direct `Result` from the call that caused them, because nothing
/// synchronous triggered them: a retry ceiling was hit, or a session quietly
/// finished tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A half's retry ceiling was exceeded; the session is left in place
    /// (it is not torn down automatically).
    Timeout(Peer),
    /// Every half this socket had for `Peer` has finished; the session has
    /// been dropped from the table.
    Closed(Peer),
}

/// Counters for datagrams that were silently dropped rather than routed
/// anywhere, surfaced so an embedder can decide whether that rate is
/// healthy without the library deciding for them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DropStats {
    pub decode_failures: u64,
    pub unknown_type: u64,
    pub unsynced_data: u64,
    pub unsynced_fin: u64,
    pub unsynced_ack: u64,
}

pub(crate) type TimerCallbackFactory<'a> = &'a mut dyn FnMut(Peer, TimerSlot) -> Box<dyn FnOnce()>;

pub struct Socket {
    handle: SocketHandle,
    udp: UdpSocket,
    local_port: u16,
    cfg: ProtocolConfig,
    close_requested: bool,
    sessions: HashMap<Peer, Session>,
    timers: HashMap<(Peer, TimerSlot), TimerId>,
    drop_stats: DropStats,
    /// The most recent peer any session activity (inbound or outbound)
    /// touched, reported as the informational payload of the one `Closed`
    /// event this socket ever fires. `None` if the socket never saw a peer
    /// at all (e.g. opened and closed with no traffic).
    last_peer: Option<Peer>,
    data_handler: Option<Box<dyn FnMut(SocketHandle, Peer, Vec<u8>)>>,
    event_handler: Option<Box<dyn FnMut(SocketHandle, Event)>>,
}

impl Socket {
    pub(crate) fn new(handle: SocketHandle, udp: UdpSocket, local_port: u16, cfg: ProtocolConfig) -> Self {
        Socket {
            handle,
            udp,
            local_port,
            cfg,
            close_requested: false,
            sessions: HashMap::new(),
            timers: HashMap::new(),
            drop_stats: DropStats::default(),
            last_peer: None,
            data_handler: None,
            event_handler: None,
        }
    }

    pub fn handle(&self) -> SocketHandle {
        self.handle
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn raw_fd(&self) -> RawFd {
        self.udp.as_raw_fd()
    }

    pub fn drop_stats(&self) -> DropStats {
        self.drop_stats
    }

    pub fn is_closing(&self) -> bool {
        self.close_requested
    }

    /// True once a requested close has drained every session; the engine
    /// uses this to decide when it is safe to deregister and drop the fd.
    pub fn is_quiescent(&self) -> bool {
        self.close_requested && self.sessions.is_empty()
    }

    pub(crate) fn protocol_window(&self) -> usize {
        self.cfg.window
    }

    pub fn set_data_handler(&mut self, handler: impl FnMut(SocketHandle, Peer, Vec<u8>) + 'static) {
        self.data_handler = Some(Box::new(handler));
    }

    pub fn set_event_handler(&mut self, handler: impl FnMut(SocketHandle, Event) + 'static) {
        self.event_handler = Some(Box::new(handler));
    }

    pub(crate) fn note_peer_activity(&mut self, peer: Peer) {
        self.last_peer = Some(peer);
    }

    /// The peer to name in this socket's one `Closed` event. Falls back to
    /// an unspecified placeholder for a socket that never saw any peer
    /// activity before `close()` was called.
    pub(crate) fn last_peer(&self) -> Peer {
        self.last_peer.unwrap_or(Peer::new(Ipv4Addr::UNSPECIFIED, 0))
    }

    pub(crate) fn session_entry(&mut self, peer: Peer) -> &mut Session {
        self.sessions.entry(peer).or_insert_with(Session::new)
    }

    pub(crate) fn session_mut(&mut self, peer: Peer) -> Option<&mut Session> {
        self.sessions.get_mut(&peer)
    }

    pub(crate) fn record_decode_failure(&mut self) {
        self.drop_stats.decode_failures += 1;
    }
    pub(crate) fn record_unknown_type(&mut self) {
        self.drop_stats.unknown_type += 1;
    }
    pub(crate) fn record_unsynced_data(&mut self) {
        self.drop_stats.unsynced_data += 1;
    }
    pub(crate) fn record_unsynced_fin(&mut self) {
        self.drop_stats.unsynced_fin += 1;
    }
    pub(crate) fn record_unsynced_ack(&mut self) {
        self.drop_stats.unsynced_ack += 1;
    }

    /// Application-initiated send. Opens a new session (and handshake) on
    /// first use of a peer; otherwise queues onto the existing sender half.
    pub fn sendto(
        &mut self,
        peer: Peer,
        data: Vec<u8>,
        initial_seqno: u32,
        reactor: &PollReactor,
        make_timer_callback: TimerCallbackFactory<'_>,
    ) -> Result<(), Error> {
        if data.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge { len: data.len(), max: MAX_PAYLOAD });
        }
        if self.close_requested {
            return Err(Error::SocketClosing);
        }

        self.note_peer_activity(peer);
        let cfg = self.cfg;
        let session = self.session_entry(peer);
        let actions = match session.sender.take() {
            Some(mut sender) => {
                let actions = sender.send(data);
                session.sender = Some(sender);
                actions
            }
            None => {
                let (sender, actions) = crate::sender::SenderHalf::open(initial_seqno, data, cfg);
                session.sender = Some(sender);
                actions
            }
        };
        self.apply_sender_actions(peer, actions, reactor, make_timer_callback);
        Ok(())
    }

    /// Begin an orderly close: every session with a live sender half is
    /// asked to FIN. The socket is not actually done until `is_quiescent`
    /// goes true, which may be immediately or may wait on in-flight data.
    pub fn close(&mut self, reactor: &PollReactor, make_timer_callback: TimerCallbackFactory<'_>) {
        self.close_requested = true;
        let peers: Vec<Peer> = self.sessions.keys().copied().collect();
        for peer in peers {
            let Some(session) = self.sessions.get_mut(&peer) else { continue };
            let Some(mut sender) = session.sender.take() else { continue };
            let actions = sender.close();
            session.sender = Some(sender);
            self.apply_sender_actions(peer, actions, reactor, make_timer_callback);
            self.reap_session_if_finished(peer);
        }
    }

    pub(crate) fn try_recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, std::net::SocketAddr)> {
        self.udp.recv_from(buf)
    }

    fn send_packet(&mut self, peer: Peer, packet: &Packet) {
        let bytes = packet.encode();
        if let Err(err) = self.udp.send_to(&bytes, (peer.ip, peer.port)) {
            tracing::warn!(%peer, port = self.local_port, error = %err, "send_to failed");
        }
    }

    pub(crate) fn apply_sender_actions(
        &mut self,
        peer: Peer,
        actions: Vec<SenderAction>,
        reactor: &PollReactor,
        make_timer_callback: TimerCallbackFactory<'_>,
    ) {
        for action in actions {
            match action {
                SenderAction::Send(packet) => self.send_packet(peer, &packet),
                SenderAction::StartTimer { slot, after } => {
                    let callback = make_timer_callback(peer, slot);
                    let id = reactor.schedule_timer(after, callback);
                    self.timers.insert((peer, slot), id);
                }
                SenderAction::CancelTimer { slot } => {
                    if let Some(id) = self.timers.remove(&(peer, slot)) {
                        reactor.cancel_timer(id);
                    }
                }
                SenderAction::Timeout => {
                    tracing::warn!(%peer, port = self.local_port, "retry ceiling exceeded");
                    if let Some(handler) = self.event_handler.as_mut() {
                        handler(self.handle, Event::Timeout(peer));
                    }
                }
                SenderAction::Finished => {
                    tracing::debug!(%peer, port = self.local_port, "sender half finished");
                }
            }
        }
    }

    pub(crate) fn apply_receiver_actions(&mut self, peer: Peer, actions: Vec<ReceiverAction>) {
        for action in actions {
            match action {
                ReceiverAction::Ack(packet) => self.send_packet(peer, &packet),
                ReceiverAction::Deliver(payload) => {
                    if let Some(handler) = self.data_handler.as_mut() {
                        handler(self.handle, peer, payload);
                    }
                }
                ReceiverAction::Finished => {
                    tracing::debug!(%peer, port = self.local_port, "receiver half finished");
                }
            }
        }
    }

    /// Drop a session from the table once every half it has is finished,
    /// cancelling any timers it still owns. This only prunes per-peer
    /// state; whether the *socket* is done (and so owes the application a
    /// `Closed` event) is a whole-socket question the caller decides by
    /// checking `is_quiescent` afterward (see `engine::maybe_finish_close`).
    pub(crate) fn reap_session_if_finished(&mut self, peer: Peer) {
        let Some(session) = self.sessions.get(&peer) else { return };
        if !session.is_finished() {
            return;
        }
        self.sessions.remove(&peer);

        // A finished half always cancelled its own timer on the way to
        // `Finished` (see sender::on_ack); this just drops any bookkeeping
        // entries for the peer that might otherwise outlive the session.
        self.timers.retain(|(p, _), _| *p != peer);
    }

    /// Fire the socket-wide `Closed` event, naming `peer` as the
    /// last-involved peer (informational only). Called exactly once, from
    /// `engine::maybe_finish_close`, when `is_quiescent()` goes true.
    pub(crate) fn fire_closed(&mut self, peer: Peer) {
        if let Some(handler) = self.event_handler.as_mut() {
            handler(self.handle, Event::Closed(peer));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn make_socket() -> Socket {
        let udp = UdpSocket::bind(("127.0.0.1", 0)).expect("bind ephemeral port for test");
        let port = udp.local_addr().unwrap().port();
        Socket::new(SocketHandle(0), udp, port, ProtocolConfig::default())
    }

    #[test]
    fn sendto_rejects_oversized_payload() {
        let mut socket = make_socket();
        let reactor = PollReactor::new();
        let peer = Peer::new(Ipv4Addr::LOCALHOST, 9000);
        let big = vec![0u8; MAX_PAYLOAD + 1];
        let mut factory = |_: Peer, _: TimerSlot| -> Box<dyn FnOnce()> { Box::new(|| {}) };
        let err = socket.sendto(peer, big, 0, &reactor, &mut factory).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn sendto_after_close_is_rejected() {
        let mut socket = make_socket();
        let reactor = PollReactor::new();
        let peer = Peer::new(Ipv4Addr::LOCALHOST, 9000);
        let mut factory = |_: Peer, _: TimerSlot| -> Box<dyn FnOnce()> { Box::new(|| {}) };
        socket.close(&reactor, &mut factory);
        let err = socket.sendto(peer, b"hi".to_vec(), 0, &reactor, &mut factory).unwrap_err();
        assert!(matches!(err, Error::SocketClosing));
    }

    #[test]
    fn close_with_no_sessions_is_immediately_quiescent() {
        let mut socket = make_socket();
        let reactor = PollReactor::new();
        let mut factory = |_: Peer, _: TimerSlot| -> Box<dyn FnOnce()> { Box::new(|| {}) };
        socket.close(&reactor, &mut factory);
        assert!(socket.is_quiescent());
    }
}
