/// Synchronous API errors. These are returned immediately from the call
/// that triggered them; they never travel through the event callback (see
/// [`crate::Event`] for the errors that do).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to bind UDP socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("payload of {len} bytes exceeds MAX_PAYLOAD ({max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("unknown socket handle {0:?}")]
    UnknownHandle(crate::socket::SocketHandle),

    #[error("socket is closing; sendto is no longer accepted")]
    SocketClosing,

    #[error("port {0} is already in use")]
    PortInUse(u16),
}
