//! `vsftp-client`: pushes a single file to `vsftp-server` over the
//! reliable UDP transport, then waits for the session to drain before
//! exiting.

use std::fs;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;

use clap::Parser;
use rudp::{Engine, Event, Peer, MAX_PAYLOAD};

#[derive(Parser, Debug)]
#[command(name = "vsftp-client", about = "Toy file sender over the reliable UDP transport")]
struct Args {
    #[arg(long)]
    peer: String,

    #[arg(long)]
    file: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let addr = resolve_peer(&args.peer).expect("resolve --peer host:port");
    let ip = match addr.ip() {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => panic!("--peer must resolve to an IPv4 address"),
    };
    let peer = Peer::new(ip, addr.port());

    let data = fs::read(&args.file).expect("read --file");

    let mut engine = Engine::new();
    let handle = engine.open(0).expect("bind ephemeral local port");

    engine
        .set_event_handler(handle, move |_handle, event| match event {
            Event::Closed(peer) => tracing::info!(%peer, "transfer finished"),
            Event::Timeout(peer) => tracing::warn!(%peer, "peer timed out"),
        })
        .expect("handle is still open");

    for chunk in data.chunks(MAX_PAYLOAD) {
        engine.sendto(handle, peer, chunk.to_vec()).expect("send chunk");
    }
    engine.close(handle).expect("begin orderly close");

    tracing::info!(%peer, bytes = data.len(), "uploading");
    engine.run().expect("engine run");
}

fn resolve_peer(spec: &str) -> std::io::Result<SocketAddr> {
    spec.to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved"))
}
