//! The engine: owns every bound socket, the shared reactor, and the
//! sequence-number source. This replaces a legacy process-global registry
//! of connections with one object an embedder constructs and holds —
//! nothing here lives in a `static`.
//!
//! Registering a socket's fd with the reactor, and scheduling a half's
//! retransmit timers, both need a callback that can find its way back to
//! the right [`Socket`](crate::socket::Socket) when the reactor fires it
//! later — possibly long after the call that registered it has returned.
//! `Engine` is the only thing that holds both the reactor and the table of
//! sockets, so it is the only thing that can build those callbacks; the
//! table itself lives behind `Rc<RefCell<_>>` so a callback can be handed a
//! clone of the handle instead of a reference tied to this struct's
//! lifetime.

use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::rc::Rc;

use rand::Rng;

use crate::config::ProtocolConfig;
use crate::dispatcher;
use crate::err::Error;
use crate::packet::Peer;
use crate::reactor::PollReactor;
use crate::sender::TimerSlot;
use crate::socket::{Event, Socket, SocketHandle};

struct State {
    sockets: std::collections::HashMap<SocketHandle, Socket>,
    next_handle: u64,
}

pub struct Engine {
    reactor: PollReactor,
    state: Rc<RefCell<State>>,
    rng: rand::rngs::ThreadRng,
}

/// A cheap, `Clone`-able handle that can ask a running [`Engine`] to stop
/// from inside one of its own handlers, where a `&mut Engine` is not
/// available.
#[derive(Clone)]
pub struct EngineHandle(PollReactor);

impl EngineHandle {
    pub fn stop(&self) {
        self.0.stop();
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            reactor: PollReactor::new(),
            state: Rc::new(RefCell::new(State { sockets: std::collections::HashMap::new(), next_handle: 0 })),
            rng: rand::thread_rng(),
        }
    }

    pub fn open(&mut self, port: u16) -> Result<SocketHandle, Error> {
        self.open_with_config(port, ProtocolConfig::default())
    }

    pub fn open_with_config(&mut self, port: u16, cfg: ProtocolConfig) -> Result<SocketHandle, Error> {
        let udp = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(|source| {
            if source.kind() == std::io::ErrorKind::AddrInUse {
                Error::PortInUse(port)
            } else {
                Error::Bind { port, source }
            }
        })?;
        udp.set_nonblocking(true)?;
        let local_port = udp.local_addr()?.port();
        let fd = udp.as_raw_fd();

        let handle = {
            let mut st = self.state.borrow_mut();
            let handle = SocketHandle(st.next_handle);
            st.next_handle += 1;
            st.sockets.insert(handle, Socket::new(handle, udp, local_port, cfg));
            handle
        };

        let state = self.state.clone();
        let reactor = self.reactor.clone();
        self.reactor.on_readable(fd, Box::new(move || on_readable(&state, handle, &reactor)));

        tracing::info!(port = local_port, ?handle, "socket opened");
        Ok(handle)
    }

    pub fn close(&mut self, handle: SocketHandle) -> Result<(), Error> {
        let mut st = self.state.borrow_mut();
        let socket = st.sockets.get_mut(&handle).ok_or(Error::UnknownHandle(handle))?;
        let mut make_cb = timer_callback_factory(&self.state, &self.reactor, handle);
        socket.close(&self.reactor, &mut make_cb);
        drop(st);
        maybe_finish_close(&self.state, handle, &self.reactor);
        Ok(())
    }

    pub fn sendto(&mut self, handle: SocketHandle, peer: Peer, data: Vec<u8>) -> Result<(), Error> {
        let initial_seqno: u32 = self.rng.gen();
        let mut st = self.state.borrow_mut();
        let socket = st.sockets.get_mut(&handle).ok_or(Error::UnknownHandle(handle))?;
        let mut make_cb = timer_callback_factory(&self.state, &self.reactor, handle);
        socket.sendto(peer, data, initial_seqno, &self.reactor, &mut make_cb)
    }

    pub fn set_data_handler(
        &mut self,
        handle: SocketHandle,
        f: impl FnMut(SocketHandle, Peer, Vec<u8>) + 'static,
    ) -> Result<(), Error> {
        let mut st = self.state.borrow_mut();
        let socket = st.sockets.get_mut(&handle).ok_or(Error::UnknownHandle(handle))?;
        socket.set_data_handler(f);
        Ok(())
    }

    pub fn set_event_handler(
        &mut self,
        handle: SocketHandle,
        f: impl FnMut(SocketHandle, Event) + 'static,
    ) -> Result<(), Error> {
        let mut st = self.state.borrow_mut();
        let socket = st.sockets.get_mut(&handle).ok_or(Error::UnknownHandle(handle))?;
        socket.set_event_handler(f);
        Ok(())
    }

    /// Drive the reactor until every socket is closed and drained, or
    /// until `stop()` is called from within a handler.
    pub fn run(&mut self) -> Result<(), Error> {
        self.reactor.run().map_err(Error::Io)
    }

    pub fn stop(&mut self) {
        self.reactor.stop();
    }

    /// A clonable handle that can stop this engine's reactor from a
    /// handler, where only `&self`-style access is possible.
    pub fn handle(&self) -> EngineHandle {
        EngineHandle(self.reactor.clone())
    }

    pub fn local_port(&self, handle: SocketHandle) -> Result<u16, Error> {
        let st = self.state.borrow();
        st.sockets.get(&handle).map(Socket::local_port).ok_or(Error::UnknownHandle(handle))
    }

    pub fn drop_stats(&self, handle: SocketHandle) -> Result<crate::socket::DropStats, Error> {
        let st = self.state.borrow();
        st.sockets.get(&handle).map(Socket::drop_stats).ok_or(Error::UnknownHandle(handle))
    }
}

fn timer_callback_factory(
    state: &Rc<RefCell<State>>,
    reactor: &PollReactor,
    handle: SocketHandle,
) -> impl FnMut(Peer, TimerSlot) -> Box<dyn FnOnce()> {
    let state = state.clone();
    let reactor = reactor.clone();
    move |peer: Peer, slot: TimerSlot| -> Box<dyn FnOnce()> {
        let state = state.clone();
        let reactor = reactor.clone();
        Box::new(move || on_timer_fire(&state, handle, peer, slot, &reactor))
    }
}

fn on_readable(state: &Rc<RefCell<State>>, handle: SocketHandle, reactor: &PollReactor) {
    let mut buf = [0u8; 2048];
    loop {
        let received = {
            let mut st = state.borrow_mut();
            let Some(socket) = st.sockets.get_mut(&handle) else { return };
            match socket.try_recv(&mut buf) {
                Ok(pair) => Some(pair),
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => None,
                Err(err) => {
                    tracing::warn!(?handle, error = %err, "recv_from failed");
                    None
                }
            }
        };
        let Some((n, src)) = received else { return };

        let peer = match src {
            SocketAddr::V4(v4) => Peer::new(*v4.ip(), v4.port()),
            SocketAddr::V6(_) => {
                tracing::warn!(?handle, "dropping datagram from a non-IPv4 peer");
                continue;
            }
        };

        let mut st = state.borrow_mut();
        let Some(socket) = st.sockets.get_mut(&handle) else { return };
        let mut make_cb = timer_callback_factory(state, reactor, handle);
        dispatcher::dispatch_datagram(socket, peer, &buf[..n], reactor, &mut make_cb);
        drop(st);

        maybe_finish_close(state, handle, reactor);
    }
}

fn on_timer_fire(state: &Rc<RefCell<State>>, handle: SocketHandle, peer: Peer, slot: TimerSlot, reactor: &PollReactor) {
    {
        let mut st = state.borrow_mut();
        let Some(socket) = st.sockets.get_mut(&handle) else { return };
        let Some(session) = socket.session_mut(peer) else { return };
        let Some(mut sender) = session.sender.take() else { return };
        let actions = sender.on_timer_fire(slot);
        socket.session_mut(peer).expect("session present above").sender = Some(sender);

        let mut make_cb = timer_callback_factory(state, reactor, handle);
        socket.apply_sender_actions(peer, actions, reactor, &mut make_cb);
        socket.reap_session_if_finished(peer);
    }
    maybe_finish_close(state, handle, reactor);
}

/// Checks the whole-socket condition (`close_requested` and every session
/// drained) and, the single time it goes true, fires the one `Closed`
/// event the socket ever owes the application before tearing the fd down.
fn maybe_finish_close(state: &Rc<RefCell<State>>, handle: SocketHandle, reactor: &PollReactor) {
    let mut st = state.borrow_mut();
    let Some(socket) = st.sockets.get_mut(&handle) else { return };
    if !socket.is_quiescent() {
        return;
    }
    let peer = socket.last_peer();
    socket.fire_closed(peer);
    let fd = socket.raw_fd();
    st.sockets.remove(&handle);
    drop(st);
    reactor.cancel_readable(fd);
    tracing::info!(?handle, "socket closed");
}
