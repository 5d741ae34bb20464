use std::{net::SocketAddr, path::PathBuf};

use clap::{Parser, Subcommand};
use leech::config::Overrides;

#[derive(Parser, Debug)]
#[clap(name = "leech")]
#[command(author, version, about, long_about = None)]
pub(crate) struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// How many pieces may be downloading at the same time.
    #[clap(long, global = true)]
    pub max_in_flight: Option<usize>,

    /// Time to wait for a TCP connection with a peer, in milliseconds.
    #[clap(long, global = true)]
    pub connect_timeout_ms: Option<u64>,

    /// Time to wait for each message of a peer, in milliseconds.
    #[clap(long, global = true)]
    pub read_timeout_ms: Option<u64>,

    /// Port announced to the tracker.
    #[clap(long, global = true)]
    pub port: Option<u16>,

    /// Write the logs to this file instead of stderr.
    #[clap(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Decode a bencoded value and print it as JSON.
    Decode { value: String },

    /// Print the metainfo of a torrent file.
    Info { torrent: PathBuf },

    /// Ask the tracker for peers and print them.
    Peers { torrent: PathBuf },

    /// Handshake with a peer and print its peer id.
    Handshake { torrent: PathBuf, peer: SocketAddr },

    /// Download and verify one piece.
    #[command(alias = "download_piece")]
    DownloadPiece {
        #[clap(short)]
        output: PathBuf,
        torrent: PathBuf,
        index: u32,
    },

    /// Download the whole file.
    Download {
        #[clap(short)]
        output: PathBuf,
        torrent: PathBuf,
    },
}

impl From<&Args> for Overrides {
    fn from(args: &Args) -> Self {
        Self {
            max_in_flight_pieces: args.max_in_flight,
            connect_timeout_ms: args.connect_timeout_ms,
            read_timeout_ms: args.read_timeout_ms,
            local_peer_port: args.port,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_piece_args() {
        let args = Args::parse_from([
            "leech",
            "download_piece",
            "-o",
            "/tmp/piece-0",
            "sample.torrent",
            "3",
            "--read-timeout-ms",
            "500",
        ]);

        let Command::DownloadPiece { output, torrent, index } = &args.command
        else {
            panic!("wrong subcommand {:?}", args.command);
        };
        assert_eq!(output, &PathBuf::from("/tmp/piece-0"));
        assert_eq!(torrent, &PathBuf::from("sample.torrent"));
        assert_eq!(*index, 3);

        let overrides = Overrides::from(&args);
        assert_eq!(overrides.read_timeout_ms, Some(500));
        assert_eq!(overrides.max_in_flight_pieces, None);
    }

    #[test]
    fn handshake_args() {
        let args = Args::parse_from([
            "leech",
            "--port",
            "7000",
            "handshake",
            "sample.torrent",
            "127.0.0.1:6881",
        ]);
        assert!(matches!(args.command, Command::Handshake { .. }));
        assert_eq!(Overrides::from(&args).local_peer_port, Some(7000));
    }
}
