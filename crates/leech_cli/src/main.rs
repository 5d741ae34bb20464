use std::path::Path;

use clap::Parser;
use leech::{
    bencode,
    config::{Config, Overrides},
    metainfo::MetaInfo,
    peer::PeerSession,
    piece::download_piece_from,
    torrent::Torrent,
    tracker::Tracker,
    utils::to_human_readable,
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

mod args;
mod error;

use args::{Args, Command};
use error::Error;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();

    // must live until the end of main, or buffered logs are lost
    let _guard = init_logging(args.log_file.as_deref())?;

    if let Command::Decode { value } = &args.command {
        let value = bencode::decode_exact(value.as_bytes())?;
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    let config = Config::load(&Overrides::from(&args)).await?;
    let peer_id = config.peer_id()?;

    match args.command {
        Command::Decode { .. } => {}
        Command::Info { torrent } => {
            let meta = read_metainfo(&torrent).await?;
            println!("Tracker URL: {}", meta.announce);
            println!("Length: {}", meta.info.length);
            println!("Info Hash: {}", meta.info_hash);
            println!("Piece Length: {}", meta.info.piece_length);
            println!("Piece Hashes:");
            for hash in &meta.info.pieces {
                println!("{}", hex::encode(hash));
            }
        }
        Command::Peers { torrent } => {
            let meta = read_metainfo(&torrent).await?;
            let res = Tracker::new(&config)?.announce(&meta, &peer_id).await?;
            for peer in res.peers {
                println!("{peer}");
            }
        }
        Command::Handshake { torrent, peer } => {
            let meta = read_metainfo(&torrent).await?;
            let mut session =
                PeerSession::connect(peer, meta.info_hash, peer_id, &config).await?;
            let remote = session.handshake().await?;
            session.close().await;
            println!("Peer ID: {remote}");
        }
        Command::DownloadPiece { output, torrent, index } => {
            let meta = read_metainfo(&torrent).await?;
            let peers = Tracker::new(&config)?.announce(&meta, &peer_id).await?.peers;

            let piece =
                download_piece_from(&meta, index, &peers, &peer_id, &config).await?;
            tokio::fs::write(&output, &piece).await?;

            println!("Piece {index} downloaded to {}.", output.display());
        }
        Command::Download { output, torrent } => {
            let meta = read_metainfo(&torrent).await?;
            let peers = Tracker::new(&config)?.announce(&meta, &peer_id).await?.peers;

            let file = Torrent::new(meta, peers, peer_id, config).download().await?;
            tokio::fs::write(&output, &file).await?;

            info!("wrote {} to {}", to_human_readable(file.len() as u64), output.display());
            println!("Downloaded {} to {}.", torrent.display(), output.display());
        }
    }

    Ok(())
}

async fn read_metainfo(path: &Path) -> Result<MetaInfo, Error> {
    let buf = tokio::fs::read(path).await?;
    Ok(MetaInfo::from_bytes(&buf)?)
}

/// Log to stderr, or to `log_file` through a non-blocking writer. The level
/// comes from `RUST_LOG` and defaults to `info`.
fn init_logging(log_file: Option<&Path>) -> Result<Option<WorkerGuard>, Error> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let Some(path) = log_file else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init();
        return Ok(None);
    };

    let name = path
        .file_name()
        .ok_or_else(|| Error::LogFileInvalid(path.display().to_string()))?;
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(false)
        .with_ansi(false)
        .compact()
        .init();

    Ok(Some(guard))
}
