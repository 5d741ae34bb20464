use std::{fmt, io};

use thiserror::Error;

use crate::tcp_wire::messages::CoreId;

/// A piece that could not be downloaded from any candidate peer.
#[derive(Debug)]
pub struct PieceFailure {
    /// Index of the piece.
    pub index: u32,
    /// How many peers were tried.
    pub attempts: usize,
    /// The error of the last attempt.
    pub last: Error,
}

impl fmt::Display for PieceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "piece {} failed after {} attempts: {}",
            self.index, self.attempts, self.last
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed bencode at offset {offset}: {reason}")]
    Parse { offset: usize, reason: &'static str },

    #[error("The metainfo is missing the field `{0}`")]
    MetadataMissingField(&'static str),

    #[error("The metainfo field `{0}` has the wrong type or value")]
    MetadataInvalidField(&'static str),

    #[error(
        "The `pieces` field has {0} bytes, which is not a multiple of 20"
    )]
    PiecesLength(usize),

    #[error(
        "The metainfo describes {expected} pieces but has {got} piece hashes"
    )]
    PieceCountMismatch { expected: usize, got: usize },

    #[error("The handshake received is not valid")]
    HandshakeInvalid,

    #[error("Expected the message {expected:?} but the peer sent id {got}")]
    UnexpectedMessage { expected: CoreId, got: u8 },

    #[error("The peer sent an unknown message id {0}")]
    UnknownMessageId(u8),

    #[error("The peer announced a message of {0} bytes, above the limit")]
    MessageTooLarge(usize),

    #[error("The message with id {0} has a malformed payload")]
    MessageMalformed(u8),

    #[error(
        "Requested block {index}/{begin}/{len} but the peer answered with \
         {got_index}/{got_begin}/{got_len}"
    )]
    BlockMismatch {
        index: u32,
        begin: u32,
        len: u32,
        got_index: u32,
        got_begin: u32,
        got_len: u32,
    },

    #[error("The block {index}/{begin}/{len} is empty or larger than 16 KiB")]
    BlockInvalid { index: u32, begin: u32, len: u32 },

    #[error("The peer closed the socket")]
    PeerClosedSocket,

    #[error("Operation `{op}` is not allowed in session state {state}")]
    InvalidState { op: &'static str, state: &'static str },

    #[error("IO error: {0}")]
    IO(#[from] io::Error),

    #[error("The peer took to long to accept the connection")]
    ConnectTimeout,

    #[error("The peer took to long to send the handshake")]
    HandshakeTimeout,

    #[error("The message took to long to arrive")]
    MessageTimeout,

    #[error("The piece {0} downloaded does not have a valid hash")]
    PieceInvalid(u32),

    #[error("Piece {piece} failed against all {attempts} peers: {last}")]
    ExhaustedPeers { piece: u32, attempts: usize, last: Box<Error> },

    #[error("{} pieces could not be downloaded: {:?}", .0.len(), failed_indices(.0))]
    DownloadFailed(Vec<PieceFailure>),

    #[error("The tracker returned an error: {0}")]
    Tracker(String),

    #[error("The peer list returned by the announce request is not valid")]
    TrackerCompactPeerList,

    #[error("HTTP request to the tracker failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Error while trying to load configuration: `{0}")]
    FromConfigError(#[from] config::ConfigError),

    #[error("Could not serialize the default configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error(
        "Tried to load $HOME but could not find it. Please make sure you have \
         a $HOME env and that this program has the permission to create dirs."
    )]
    HomeInvalid,

    #[error("The configured peer id must have exactly 20 bytes")]
    PeerIdInvalid,

    #[error("The piece index {0} is out of range for this torrent")]
    PieceIndexInvalid(u32),

    #[error("No peers in the torrent")]
    NoPeers,

    #[error("The worker downloading piece {0} panicked")]
    WorkerPanicked(u32),
}

fn failed_indices(failures: &[PieceFailure]) -> Vec<u32> {
    failures.iter().map(|f| f.index).collect()
}

impl Error {
    /// Whether this error only ends the current peer attempt, so the piece
    /// may be retried against another peer. Malformed metainfo, config, and
    /// aggregate download failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeInvalid
                | Self::UnexpectedMessage { .. }
                | Self::UnknownMessageId(_)
                | Self::MessageTooLarge(_)
                | Self::MessageMalformed(_)
                | Self::BlockMismatch { .. }
                | Self::PeerClosedSocket
                | Self::InvalidState { .. }
                | Self::IO(_)
                | Self::ConnectTimeout
                | Self::HandshakeTimeout
                | Self::MessageTimeout
                | Self::PieceInvalid(_)
        )
    }

    /// Indices of the pieces that failed, if this is a
    /// [`Error::DownloadFailed`] or [`Error::ExhaustedPeers`].
    pub fn failed_pieces(&self) -> Vec<u32> {
        match self {
            Self::DownloadFailed(v) => failed_indices(v),
            Self::ExhaustedPeers { piece, .. } => vec![*piece],
            _ => Vec::new(),
        }
    }
}
