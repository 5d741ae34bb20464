/// State of a connection with a peer. A session walks these states in order,
/// it never skips one, and ends either `Closed` or `Failed`.
#[derive(Clone, Default, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// The TCP connection is open, nothing was sent yet.
    #[default]
    Connecting,

    /// Our handshake was written, waiting for theirs.
    HandshakeSent,

    /// The peer answered with a valid handshake for the same torrent.
    HandshakeVerified,

    /// Waiting for the bitfield of the peer.
    AwaitingBitfield,

    /// We told the peer we are interested in its pieces.
    InterestedSent,

    /// Waiting for the peer to unchoke us.
    AwaitingUnchoke,

    /// The peer unchoked us, blocks can be requested.
    Ready,

    Closed,

    /// An I/O or protocol error ended the session.
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connecting => "Connecting",
            Self::HandshakeSent => "HandshakeSent",
            Self::HandshakeVerified => "HandshakeVerified",
            Self::AwaitingBitfield => "AwaitingBitfield",
            Self::InterestedSent => "InterestedSent",
            Self::AwaitingUnchoke => "AwaitingUnchoke",
            Self::Ready => "Ready",
            Self::Closed => "Closed",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// The core protocol state of the local side. The connection starts off
/// choked.
#[derive(Clone, Copy, Debug)]
pub struct CoreState {
    /// If we're choked, peer doesn't allow us to download pieces from them.
    pub peer_choking: bool,
}

impl Default for CoreState {
    fn default() -> Self {
        Self { peer_choking: true }
    }
}
