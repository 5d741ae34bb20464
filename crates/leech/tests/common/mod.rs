//! Mock peers to test the client against real TCP sockets.
//!
//! A [`Seeder`] listens on a random local port and serves the blocks of a
//! file, one piece per connection, the same way the client uses peers. Each
//! seeder can misbehave in a few ways to exercise the failure paths.
#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use leech::{
    bencode::Bencode,
    config::Config,
    metainfo::MetaInfo,
    peer::PeerId,
    tcp_wire::{Bitfield, Block, Core, CoreCodec, Handshake, HandshakeCodec},
};
use rand::Rng;
use tokio::{
    net::{TcpListener, TcpStream},
    spawn,
    time::sleep,
};
use tokio_util::codec::{Framed, FramedParts};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    /// Serve every block correctly.
    Good,
    /// Answer with the handshake of another torrent.
    BadHandshake,
    /// Flip a byte of every block of every piece.
    CorruptBlock,
    /// Flip a byte of the blocks of one piece, serve the others correctly.
    CorruptPiece(u32),
    /// Send `have` where the bitfield is expected.
    WrongMessage,
    /// Handshake and then never send anything.
    Silent,
    /// Wait before answering requests of one piece.
    SlowPiece(u32, Duration),
}

/// Counters shared by one or more seeders.
#[derive(Debug, Default)]
pub struct Stats {
    /// Connections accepted so far.
    pub connections: AtomicUsize,
    /// Connections serving a piece right now.
    pub active: AtomicUsize,
    /// Highest value `active` ever had.
    pub peak: AtomicUsize,
}

/// Decrements `active` when a piece was fully served, or when the
/// connection ends.
struct ActiveGuard(Arc<Stats>);

impl ActiveGuard {
    fn new(stats: Arc<Stats>) -> Self {
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.peak.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Seeder {
    pub addr: SocketAddr,
    pub stats: Arc<Stats>,
}

/// Print the logs of the client in failing tests, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .with_target(false)
        .compact()
        .without_time()
        .try_init();
}

/// Random content of `len` bytes.
pub fn random_content(len: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..len).map(|_| rng.gen()).collect()
}

/// Build the metainfo of `content`, going through the bencoded form like a
/// real `.torrent` file would.
pub fn metainfo(content: &[u8], piece_length: u32) -> MetaInfo {
    let pieces: Vec<u8> = content
        .chunks(piece_length as usize)
        .flat_map(|piece| sha1_smol::Sha1::from(piece).digest().bytes())
        .collect();

    let info: Bencode = [
        ("length", Bencode::from(content.len() as i64)),
        ("name", Bencode::from("file.bin")),
        ("piece length", Bencode::from(piece_length as i64)),
        ("pieces", Bencode::from(pieces)),
    ]
    .into_iter()
    .collect();

    let torrent: Bencode = [
        ("announce", Bencode::from("http://127.0.0.1:1/announce")),
        ("info", info),
    ]
    .into_iter()
    .collect();

    MetaInfo::from_bytes(&torrent.encode()).unwrap()
}

/// A config with short timeouts for tests.
pub fn config(max_in_flight_pieces: usize) -> Config {
    Config {
        max_in_flight_pieces,
        connect_timeout_ms: 1_000,
        read_timeout_ms: 1_000,
        ..Default::default()
    }
}

pub async fn spawn_seeder(
    meta: &MetaInfo,
    content: Arc<Vec<u8>>,
    behaviour: Behaviour,
) -> Seeder {
    spawn_seeder_with_stats(meta, content, behaviour, Arc::default()).await
}

pub async fn spawn_seeder_with_stats(
    meta: &MetaInfo,
    content: Arc<Vec<u8>>,
    behaviour: Behaviour,
    stats: Arc<Stats>,
) -> Seeder {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let meta = Arc::new(meta.clone());
    let seeder_stats = stats.clone();

    spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            stats.connections.fetch_add(1, Ordering::SeqCst);
            let guard = ActiveGuard::new(stats.clone());
            let meta = meta.clone();
            let content = content.clone();
            spawn(async move {
                serve(socket, &meta, &content, behaviour, guard).await;
            });
        }
    });

    Seeder { addr, stats: seeder_stats }
}

async fn serve(
    socket: TcpStream,
    meta: &MetaInfo,
    content: &[u8],
    behaviour: Behaviour,
    guard: ActiveGuard,
) {
    let mut guard = Some(guard);
    let mut socket = Framed::new(socket, HandshakeCodec);

    let Some(Ok(theirs)) = socket.next().await else {
        return;
    };

    let info_hash = if behaviour == Behaviour::BadHandshake {
        [0xff; 20]
    } else {
        theirs.info_hash.0
    };
    let ours = Handshake::new(info_hash, PeerId::generate());
    if socket.send(ours).await.is_err() {
        return;
    }

    let old_parts = socket.into_parts();
    let mut new_parts = FramedParts::new(old_parts.io, CoreCodec);
    new_parts.read_buf = old_parts.read_buf;
    new_parts.write_buf = old_parts.write_buf;
    let mut socket = Framed::from_parts(new_parts);

    match behaviour {
        Behaviour::Silent => {
            // hold the socket open without talking
            sleep(Duration::from_secs(60)).await;
            return;
        }
        Behaviour::WrongMessage => {
            let _ = socket.send(Core::Have(0)).await;
        }
        _ => {
            let bitfield = Bitfield::repeat(true, meta.pieces_count());
            if socket.send(Core::Bitfield(bitfield)).await.is_err() {
                return;
            }
        }
    }

    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Core::Interested => {
                if socket.send(Core::Unchoke).await.is_err() {
                    return;
                }
            }
            Core::Request(info) => {
                if let Behaviour::SlowPiece(index, delay) = behaviour {
                    if index == info.index {
                        sleep(delay).await;
                    }
                }

                let start = info.index as usize * meta.info.piece_length as usize
                    + info.begin as usize;
                let mut block = content[start..start + info.len as usize].to_vec();

                let corrupt = match behaviour {
                    Behaviour::CorruptBlock => true,
                    Behaviour::CorruptPiece(index) => index == info.index,
                    _ => false,
                };
                if corrupt {
                    block[0] ^= 0xff;
                }

                let last_block = info.begin + info.len
                    == meta.piece_len(info.index).unwrap_or_default();

                let block = Block { index: info.index, begin: info.begin, block };
                if socket.send(Core::Piece(block)).await.is_err() {
                    return;
                }

                if last_block {
                    guard.take();
                }
            }
            _ => {}
        }
    }
}
