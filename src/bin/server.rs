//! `vsftp-server`: receives files pushed by `vsftp-client` over the
//! reliable UDP transport and writes them under `--root`.
//!
//! Every inbound session gets its own file, named after the sending peer's
//! address, opened lazily on the first payload and appended to as data
//! arrives. There is no per-peer "transfer complete" event: `Closed` is a
//! whole-socket event fired once, only if this server is ever asked to
//! `close()` (it isn't, here — it serves until killed), so completion is
//! simply "no more payloads arrived for that peer."

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::rc::Rc;

use clap::Parser;
use rudp::{Engine, Event, Peer};

#[derive(Parser, Debug)]
#[command(name = "vsftp-server", about = "Toy file receiver over the reliable UDP transport")]
struct Args {
    #[arg(long, default_value_t = 9090)]
    port: u16,

    #[arg(long, default_value = ".")]
    root: PathBuf,
}

fn main() {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    fs::create_dir_all(&args.root).expect("create --root directory");

    let mut engine = Engine::new();
    let handle = engine.open(args.port).expect("bind server port");

    let files: Rc<RefCell<HashMap<Peer, File>>> = Rc::new(RefCell::new(HashMap::new()));
    let root = args.root.clone();

    {
        let files = files.clone();
        engine
            .set_data_handler(handle, move |_handle, peer, payload| {
                let mut files = files.borrow_mut();
                let file = match files.get_mut(&peer) {
                    Some(file) => file,
                    None => {
                        let path = root.join(peer_filename(peer));
                        match File::create(&path) {
                            Ok(file) => {
                                tracing::info!(%peer, path = %path.display(), "receiving file");
                                files.entry(peer).or_insert(file)
                            }
                            Err(err) => {
                                tracing::warn!(%peer, error = %err, "could not create file");
                                return;
                            }
                        }
                    }
                };
                if let Err(err) = file.write_all(&payload) {
                    tracing::warn!(%peer, error = %err, "write failed");
                }
            })
            .expect("handle is still open");
    }

    {
        let files = files.clone();
        engine
            .set_event_handler(handle, move |_handle, event| match event {
                Event::Closed(_) => {
                    tracing::info!(transfers = files.borrow().len(), "server socket closed");
                }
                Event::Timeout(peer) => tracing::warn!(%peer, "peer timed out"),
            })
            .expect("handle is still open");
    }

    tracing::info!(port = args.port, root = %args.root.display(), "vsftp-server listening");
    engine.run().expect("engine run");
}

fn peer_filename(peer: Peer) -> String {
    format!("{}_{}.bin", peer.ip, peer.port)
}
