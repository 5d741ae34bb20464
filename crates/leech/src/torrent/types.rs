use std::{fmt::Display, net::SocketAddr, ops::Deref};

use crate::error::Error;

/// Messages sent by the workers of a [`Torrent`] to report their outcome.
///
/// [`Torrent`]: super::Torrent
#[derive(Debug)]
pub enum TorrentMsg {
    /// An attempt to download a piece from a peer finished, with the
    /// verified bytes of the piece or the error that ended the attempt.
    PieceAttempt {
        index: u32,
        peer: SocketAddr,
        result: Result<Vec<u8>, Error>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct InfoHash(pub [u8; 20]);

impl Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Deref for InfoHash {
    type Target = [u8; 20];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s[..10])
    }
}

impl From<InfoHash> for [u8; 20] {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for InfoHash {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<Vec<u8>> for InfoHash {
    type Error = &'static str;
    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let buff: [u8; 20] = value
            .try_into()
            .map_err(|_| "The infohash must have exactly 20 bytes")?;
        Ok(InfoHash(buff))
    }
}

/// Download status of a single piece.
#[derive(Debug, Default)]
pub enum PieceStatus {
    /// Waiting for a free slot.
    #[default]
    Pending,
    /// An attempt is running, or the piece waits for a retry. Holds how many
    /// attempts were started so far.
    InFlight(usize),
    /// The verified bytes of the piece.
    Done(Vec<u8>),
    /// Every candidate peer was tried.
    PermanentlyFailed,
}

impl PieceStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Done(_) | Self::PermanentlyFailed)
    }
}

/// Status of every piece of a torrent, indexed by piece.
///
/// Only the orchestrator mutates this table, workers report their outcome
/// through a channel.
#[derive(Debug)]
pub struct DownloadJob {
    pieces: Vec<PieceStatus>,
}

impl DownloadJob {
    /// A job with every piece [`PieceStatus::Pending`].
    pub fn new(pieces_count: usize) -> Self {
        Self {
            pieces: (0..pieces_count).map(|_| PieceStatus::Pending).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    pub fn status(&self, index: u32) -> Option<&PieceStatus> {
        self.pieces.get(index as usize)
    }

    fn slot(&mut self, index: u32) -> Result<&mut PieceStatus, Error> {
        self.pieces
            .get_mut(index as usize)
            .ok_or(Error::PieceIndexInvalid(index))
    }

    /// Mark the start of a new attempt, returns the attempt number, starting
    /// at 1.
    pub fn start_attempt(&mut self, index: u32) -> Result<usize, Error> {
        let slot = self.slot(index)?;
        let attempts = match *slot {
            PieceStatus::Pending => 1,
            PieceStatus::InFlight(n) => n + 1,
            PieceStatus::Done(_) | PieceStatus::PermanentlyFailed => {
                return Err(Error::InvalidState {
                    op: "start_attempt",
                    state: "finished",
                });
            }
        };
        *slot = PieceStatus::InFlight(attempts);
        Ok(attempts)
    }

    /// How many attempts were started for the piece.
    pub fn attempts(&self, index: u32) -> usize {
        match self.status(index) {
            Some(PieceStatus::InFlight(n)) => *n,
            _ => 0,
        }
    }

    pub fn complete(&mut self, index: u32, bytes: Vec<u8>) -> Result<(), Error> {
        *self.slot(index)? = PieceStatus::Done(bytes);
        Ok(())
    }

    pub fn fail(&mut self, index: u32) -> Result<(), Error> {
        *self.slot(index)? = PieceStatus::PermanentlyFailed;
        Ok(())
    }

    pub fn done_count(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| matches!(p, PieceStatus::Done(_)))
            .count()
    }

    pub fn is_finished(&self) -> bool {
        self.pieces.iter().all(PieceStatus::is_finished)
    }

    /// Concatenate the pieces by index, or `None` if any piece is not done.
    pub fn assemble(self) -> Option<Vec<u8>> {
        let total = self
            .pieces
            .iter()
            .map(|p| match p {
                PieceStatus::Done(b) => b.len(),
                _ => 0,
            })
            .sum();
        let mut file = Vec::with_capacity(total);
        for piece in self.pieces {
            let PieceStatus::Done(bytes) = piece else {
                return None;
            };
            file.extend_from_slice(&bytes);
        }
        Some(file)
    }
}
