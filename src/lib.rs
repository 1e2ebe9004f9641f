//! A connection-oriented, retransmission-based reliable transport over
//! UDP: fixed 8-byte header, sliding-window pipelining, timeout-driven
//! retransmission with a retry ceiling, and orderly two-way teardown.
//!
//! [`Engine`] owns every bound [`Socket`](socket::Socket) and the single
//! reactor they share; an embedder opens one or more sockets on it, sets a
//! data and/or event callback per socket, and calls [`Engine::run`] to
//! drive everything from one thread.

mod config;
mod dispatcher;
mod engine;
mod err;
mod packet;
mod reactor;
mod receiver;
mod sender;
mod seq;
mod session;
mod socket;

pub use config::ProtocolConfig;
pub use engine::{Engine, EngineHandle};
pub use err::Error;
pub use packet::{Peer, MAX_PAYLOAD};
pub use socket::{DropStats, Event, SocketHandle};
