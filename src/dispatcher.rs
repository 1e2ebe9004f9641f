//! Inbound datagram routing: decode, then hand the packet to whichever
//! half (sender or receiver) of whichever peer's session it belongs to.
//!
//! This is the read-callback entry point the engine registers with the
//! reactor for each socket's fd. It owns none of the state itself — it is
//! the piece of code that knows, for a given [`crate::packet::PacketType`],
//! which half should see the packet and what a missing session means.

use crate::packet::{Packet, PacketType, Peer};
use crate::reactor::PollReactor;
use crate::socket::{Socket, TimerCallbackFactory};

pub fn dispatch_datagram(
    socket: &mut Socket,
    peer: Peer,
    raw: &[u8],
    reactor: &PollReactor,
    make_timer_callback: TimerCallbackFactory<'_>,
) {
    let Some(packet) = Packet::decode(raw) else {
        socket.record_decode_failure();
        tracing::trace!(%peer, "dropping undecodable datagram");
        return;
    };

    socket.note_peer_activity(peer);

    match packet.kind {
        PacketType::Syn => dispatch_syn(socket, peer, packet.seqno),
        PacketType::Ack => dispatch_ack(socket, peer, packet.seqno, reactor, make_timer_callback),
        PacketType::Data => dispatch_data(socket, peer, packet.seqno, packet.payload),
        PacketType::Fin => dispatch_fin(socket, peer, packet.seqno),
        PacketType::Unknown(code) => {
            socket.record_unknown_type();
            tracing::trace!(%peer, code, "dropping packet of unknown type");
        }
    }

    // Prunes the peer's session/timers once every half it has is finished.
    // This never raises the application-visible `Closed` event itself —
    // that is a whole-socket condition the engine checks separately (see
    // `engine::maybe_finish_close`), since a socket can have other peers
    // still live, or never have called `close()` at all.
    socket.reap_session_if_finished(peer);
}

fn dispatch_syn(socket: &mut Socket, peer: Peer, seqno: u32) {
    let window = socket.protocol_window();
    let session = socket.session_entry(peer);
    let actions = match session.receiver.take() {
        Some(mut receiver) => {
            let actions = receiver.on_syn_existing(seqno);
            session.receiver = Some(receiver);
            actions
        }
        None => {
            let (receiver, actions) = crate::receiver::ReceiverHalf::on_syn(seqno, window);
            session.receiver = Some(receiver);
            actions
        }
    };
    socket.apply_receiver_actions(peer, actions);
}

fn dispatch_data(socket: &mut Socket, peer: Peer, seqno: u32, payload: Vec<u8>) {
    let Some(session) = socket.session_mut(peer) else {
        socket.record_unsynced_data();
        tracing::trace!(%peer, seqno, "dropping DATA for peer with no receiver half");
        return;
    };
    let Some(mut receiver) = session.receiver.take() else {
        socket.record_unsynced_data();
        tracing::trace!(%peer, seqno, "dropping DATA before SYN");
        return;
    };
    let actions = receiver.on_data(seqno, payload);
    socket.session_mut(peer).expect("session present above").receiver = Some(receiver);
    socket.apply_receiver_actions(peer, actions);
}

fn dispatch_fin(socket: &mut Socket, peer: Peer, seqno: u32) {
    let Some(session) = socket.session_mut(peer) else {
        socket.record_unsynced_fin();
        tracing::trace!(%peer, seqno, "dropping FIN for peer with no receiver half");
        return;
    };
    let Some(mut receiver) = session.receiver.take() else {
        socket.record_unsynced_fin();
        tracing::trace!(%peer, seqno, "dropping FIN before SYN");
        return;
    };
    let actions = receiver.on_fin(seqno);
    socket.session_mut(peer).expect("session present above").receiver = Some(receiver);
    socket.apply_receiver_actions(peer, actions);
}

fn dispatch_ack(
    socket: &mut Socket,
    peer: Peer,
    seqno: u32,
    reactor: &PollReactor,
    make_timer_callback: TimerCallbackFactory<'_>,
) {
    let Some(session) = socket.session_mut(peer) else {
        socket.record_unsynced_ack();
        tracing::trace!(%peer, seqno, "dropping ACK for peer with no sender half");
        return;
    };
    let Some(mut sender) = session.sender.take() else {
        socket.record_unsynced_ack();
        tracing::trace!(%peer, seqno, "dropping ACK before a local open");
        return;
    };
    let actions = sender.on_ack(seqno);
    socket.session_mut(peer).expect("session present above").sender = Some(sender);
    socket.apply_sender_actions(peer, actions, reactor, make_timer_callback);
}
