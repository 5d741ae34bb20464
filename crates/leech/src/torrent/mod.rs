//! Download of a whole torrent from a list of peers.
//!
//! The [`Torrent`] spawns one worker per piece attempt, with at most
//! `max_in_flight_pieces` workers alive at the same time. Workers report
//! their outcome with a [`TorrentMsg`], and the torrent is the only one that
//! mutates the [`DownloadJob`]. A failed attempt is retried with the next
//! peer, until every peer was tried for that piece.
//!
//! The download only ends when every piece is either done or permanently
//! failed, there is no fail-fast.

mod types;

// re-exports
pub use types::*;

use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    net::SocketAddr,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt;
use tokio::{
    select,
    sync::mpsc,
    task::{self, JoinError, JoinSet},
};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{Error, PieceFailure},
    metainfo::MetaInfo,
    peer::PeerId,
    piece,
    utils::to_human_readable,
};

/// Data shared by the torrent and its workers.
#[derive(Debug)]
pub struct TorrentCtx {
    pub meta: MetaInfo,
    pub peers: Vec<SocketAddr>,
    pub local_peer_id: PeerId,
    pub config: Config,
    pub tx: mpsc::Sender<TorrentMsg>,
}

pub struct Torrent {
    pub ctx: Arc<TorrentCtx>,
    rx: mpsc::Receiver<TorrentMsg>,
    job: DownloadJob,
    /// Pieces waiting for a free slot, retries go to the front.
    pending: VecDeque<u32>,
    in_flight: usize,
    max_in_flight: usize,
    failures: Vec<PieceFailure>,
    workers: JoinSet<()>,
    /// Piece of every running worker.
    running: HashMap<task::Id, u32>,
}

impl Torrent {
    pub fn new(
        meta: MetaInfo,
        peers: Vec<SocketAddr>,
        local_peer_id: PeerId,
        config: Config,
    ) -> Self {
        let max_in_flight = config.max_in_flight_pieces.max(1);
        let (tx, rx) = mpsc::channel(max_in_flight);
        let job = DownloadJob::new(meta.pieces_count());

        Self {
            ctx: Arc::new(TorrentCtx { meta, peers, local_peer_id, config, tx }),
            rx,
            job,
            pending: VecDeque::new(),
            in_flight: 0,
            max_in_flight,
            failures: Vec::new(),
            workers: JoinSet::new(),
            running: HashMap::new(),
        }
    }

    /// Download every piece and return the content of the file.
    ///
    /// # Errors
    ///
    /// [`Error::DownloadFailed`] with every piece that failed against all
    /// peers, only after all the other pieces finished.
    pub async fn download(mut self) -> Result<Vec<u8>, Error> {
        let total = self.job.len();

        if total > 0 && self.ctx.peers.is_empty() {
            return Err(Error::NoPeers);
        }

        info!(
            "downloading {:?} {} in {total} pieces from {} peers",
            self.ctx.meta.info.name,
            to_human_readable(self.ctx.meta.info.length),
            self.ctx.peers.len(),
        );

        self.pending = (0..total as u32).collect();
        self.fill_slots();

        while !self.job.is_finished() {
            // nothing running and nothing to schedule, no message can arrive
            if self.in_flight == 0 && self.pending.is_empty() {
                break;
            }

            select! {
                // the torrent holds a sender in the ctx, the channel can't close
                Some(msg) = self.rx.recv() => {
                    match msg {
                        TorrentMsg::PieceAttempt { index, peer, result } => {
                            self.handle_attempt(index, peer, result);
                        }
                    }
                }
                Some(joined) = self.workers.join_next_with_id(), if !self.workers.is_empty() => {
                    self.handle_join(joined);
                }
            }

            self.fill_slots();
        }

        while let Some(joined) = self.workers.join_next_with_id().await {
            self.handle_join(joined);
        }

        if !self.failures.is_empty() {
            self.failures.sort_by_key(|f| f.index);
            return Err(Error::DownloadFailed(self.failures));
        }

        self.job.assemble().ok_or(Error::InvalidState {
            op: "assemble",
            state: "unfinished",
        })
    }

    /// Spawn attempts for pending pieces while there are free slots.
    fn fill_slots(&mut self) {
        while self.in_flight < self.max_in_flight {
            let Some(index) = self.pending.pop_front() else {
                break;
            };
            if let Err(e) = self.spawn_attempt(index) {
                warn!("piece {index} could not be scheduled: {e}");
                self.give_up(index, e);
            }
        }
    }

    fn spawn_attempt(&mut self, index: u32) -> Result<(), Error> {
        let attempt = self.job.start_attempt(index)?;
        let Some(peer) = piece::peer_order(index, self.ctx.peers.len())
            .nth(attempt - 1)
            .map(|i| self.ctx.peers[i])
        else {
            return Err(Error::NoPeers);
        };

        debug!("piece {index} attempt {attempt} with {peer}");
        self.in_flight += 1;

        let ctx = self.ctx.clone();
        let handle = self.workers.spawn(async move {
            let result = catch_panic(
                index,
                piece::download_piece_at(
                    &ctx.meta,
                    index,
                    peer,
                    &ctx.local_peer_id,
                    &ctx.config,
                ),
            )
            .await;
            // only fails if the torrent is gone, nobody wants the result then
            let _ = ctx.tx.send(TorrentMsg::PieceAttempt { index, peer, result }).await;
        });
        self.running.insert(handle.id(), index);

        Ok(())
    }

    fn handle_attempt(
        &mut self,
        index: u32,
        peer: SocketAddr,
        result: Result<Vec<u8>, Error>,
    ) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let peers = self.ctx.peers.len();

        match result {
            Ok(bytes) => {
                let len = bytes.len() as u64;
                if let Err(e) = self.job.complete(index, bytes) {
                    warn!("piece {index} from {peer} was not expected: {e}");
                    return;
                }
                info!(
                    "piece {index} from {peer} [{}/{}] {}",
                    self.job.done_count(),
                    self.job.len(),
                    to_human_readable(len),
                );
            }
            Err(e) => {
                let attempts = self.job.attempts(index);

                if e.is_retryable() && attempts < peers {
                    warn!(
                        "piece {index} failed with {peer}: {e}, retrying \
                         [{attempts}/{peers}]"
                    );
                    self.pending.push_front(index);
                } else {
                    warn!("piece {index} failed after {attempts} attempts: {e}");
                    let last = if e.is_retryable() {
                        Error::ExhaustedPeers {
                            piece: index,
                            attempts,
                            last: Box::new(e),
                        }
                    } else {
                        e
                    };
                    self.give_up(index, last);
                }
            }
        }
    }

    /// A worker that ended without reporting fails its piece, otherwise the
    /// slot would never be freed.
    fn handle_join(&mut self, joined: Result<(task::Id, ()), JoinError>) {
        match joined {
            Ok((id, ())) => {
                self.running.remove(&id);
            }
            Err(e) => {
                let Some(index) = self.running.remove(&e.id()) else {
                    return;
                };
                warn!("worker of piece {index} did not finish: {e}");
                self.in_flight = self.in_flight.saturating_sub(1);
                self.give_up(index, Error::WorkerPanicked(index));
            }
        }
    }

    /// Mark a piece that is not finished yet as permanently failed.
    fn give_up(&mut self, index: u32, last: Error) {
        match self.job.status(index) {
            Some(status) if !status.is_finished() => {}
            _ => return,
        }
        let attempts = self.job.attempts(index);
        if self.job.fail(index).is_ok() {
            self.failures.push(PieceFailure { index, attempts, last });
        }
    }
}

/// Turn a panic of an attempt into an error of its piece, the torrent is
/// always told how the attempt ended.
async fn catch_panic<F>(index: u32, attempt: F) -> Result<Vec<u8>, Error>
where
    F: Future<Output = Result<Vec<u8>, Error>>,
{
    AssertUnwindSafe(attempt)
        .catch_unwind()
        .await
        .unwrap_or(Err(Error::WorkerPanicked(index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::Info;

    fn meta(pieces: usize) -> MetaInfo {
        MetaInfo {
            announce: String::new(),
            info: Info {
                name: "file".into(),
                length: pieces as u64 * 4,
                piece_length: 4,
                pieces: vec![[0; 20]; pieces],
            },
            info_hash: InfoHash([1; 20]),
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn torrent(pieces: usize, peers: usize, max_in_flight: usize) -> Torrent {
        let config = Config { max_in_flight_pieces: max_in_flight, ..Default::default() };
        Torrent::new(
            meta(pieces),
            (0..peers as u16).map(|p| addr(7000 + p)).collect(),
            PeerId::generate(),
            config,
        )
    }

    #[tokio::test]
    async fn no_peers() {
        let torrent = torrent(2, 0, 5);
        assert!(matches!(torrent.download().await, Err(Error::NoPeers)));
    }

    #[tokio::test]
    async fn empty_file_needs_no_peers() {
        let torrent = torrent(0, 0, 5);
        assert_eq!(torrent.download().await.unwrap(), Vec::<u8>::new());
    }

    #[tokio::test]
    async fn retry_until_every_peer_was_tried() {
        let mut torrent = torrent(1, 3, 5);
        torrent.pending.push_back(0);
        torrent.fill_slots();
        assert_eq!(torrent.in_flight, 1);

        torrent.handle_attempt(0, addr(7000), Err(Error::HandshakeInvalid));
        assert_eq!(torrent.pending, [0]);
        torrent.fill_slots();

        torrent.handle_attempt(0, addr(7001), Err(Error::MessageTimeout));
        torrent.fill_slots();
        assert_eq!(torrent.job.attempts(0), 3);

        torrent.handle_attempt(0, addr(7002), Err(Error::PieceInvalid(0)));
        assert!(torrent.pending.is_empty());
        assert!(torrent.job.is_finished());
        assert_eq!(torrent.in_flight, 0);

        let failure = &torrent.failures[0];
        assert_eq!(failure.index, 0);
        assert_eq!(failure.attempts, 3);
        assert!(matches!(
            &failure.last,
            Error::ExhaustedPeers { piece: 0, attempts: 3, last }
                if matches!(**last, Error::PieceInvalid(0))
        ));

        torrent.workers.abort_all();
    }

    #[tokio::test]
    async fn in_flight_is_bounded() {
        let mut torrent = torrent(10, 2, 3);
        torrent.pending = (0..10).collect();
        torrent.fill_slots();
        assert_eq!(torrent.in_flight, 3);
        assert_eq!(torrent.pending.len(), 7);

        torrent.handle_attempt(1, addr(7001), Ok(vec![0; 4]));
        torrent.fill_slots();
        assert_eq!(torrent.in_flight, 3);
        assert_eq!(torrent.pending.len(), 6);
        assert_eq!(torrent.job.done_count(), 1);

        torrent.workers.abort_all();
    }

    async fn broken_attempt() -> Result<Vec<u8>, Error> {
        panic!("attempt blew up")
    }

    #[tokio::test]
    async fn panicking_attempt_is_reported() {
        let r = catch_panic(3, broken_attempt()).await;
        assert!(matches!(r, Err(Error::WorkerPanicked(3))));

        let r = catch_panic(3, async { Ok::<_, Error>(vec![1, 2]) }).await;
        assert_eq!(r.unwrap(), [1, 2]);
    }

    #[tokio::test]
    async fn panicked_piece_fails_without_retry() {
        let mut torrent = torrent(2, 3, 5);
        torrent.pending = (0..2).collect();
        torrent.fill_slots();

        torrent.handle_attempt(0, addr(7000), Err(Error::WorkerPanicked(0)));
        assert!(torrent.pending.is_empty());
        assert_eq!(torrent.job.attempts(0), 1);
        assert!(matches!(torrent.job.status(0), Some(PieceStatus::PermanentlyFailed)));
        assert!(matches!(torrent.failures[0].last, Error::WorkerPanicked(0)));

        // the other piece keeps going
        torrent.handle_attempt(1, addr(7001), Ok(vec![0; 4]));
        assert!(torrent.job.is_finished());
        assert_eq!(torrent.failures.len(), 1);

        torrent.workers.abort_all();
    }

    #[tokio::test]
    async fn done_piece_is_not_scheduled_again() {
        let mut torrent = torrent(2, 2, 5);
        torrent.pending.push_back(0);
        torrent.fill_slots();
        torrent.handle_attempt(0, addr(7000), Ok(vec![7; 4]));

        // scheduling a finished piece fails, but does not undo it
        torrent.pending = [0, 1].into();
        torrent.fill_slots();
        assert!(matches!(torrent.job.status(0), Some(PieceStatus::Done(_))));
        assert!(torrent.failures.is_empty());
        assert_eq!(torrent.in_flight, 1);

        torrent.handle_attempt(1, addr(7001), Ok(vec![8; 4]));
        assert_eq!(torrent.job.assemble().unwrap(), [7, 7, 7, 7, 8, 8, 8, 8]);

        torrent.workers.abort_all();
    }

    #[tokio::test]
    async fn worker_that_never_reports_frees_its_slot() {
        let mut torrent = torrent(2, 2, 1);
        torrent.pending = (0..2).collect();
        torrent.fill_slots();
        assert_eq!(torrent.in_flight, 1);

        torrent.workers.abort_all();
        let joined = torrent.workers.join_next_with_id().await.unwrap();
        torrent.handle_join(joined);

        assert_eq!(torrent.in_flight, 0);
        assert!(torrent.running.is_empty());
        assert!(matches!(torrent.job.status(0), Some(PieceStatus::PermanentlyFailed)));
        assert!(matches!(torrent.failures[0].last, Error::WorkerPanicked(0)));

        // the freed slot goes to the next piece
        torrent.fill_slots();
        assert_eq!(torrent.in_flight, 1);
        assert!(torrent.pending.is_empty());

        torrent.workers.abort_all();
    }
}
