//! Download of a single piece.
//!
//! A piece is split in blocks of [`BLOCK_LEN`] bytes which are requested one
//! at a time from a ready session. The assembled piece is only accepted if
//! its SHA-1 matches the hash in the metainfo.
//!
//! [`BLOCK_LEN`]: crate::tcp_wire::BLOCK_LEN
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::Error,
    metainfo::MetaInfo,
    peer::{PeerId, PeerSession},
    tcp_wire::BlockInfo,
};

/// Request every block of the piece, in order, and verify the result.
pub async fn download_piece<S>(
    session: &mut PeerSession<S>,
    index: u32,
    piece_len: u32,
    hash: &[u8; 20],
) -> Result<Vec<u8>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut piece = Vec::with_capacity(piece_len as usize);

    for block_info in BlockInfo::split_piece(index, piece_len) {
        let block = session.request_block(block_info).await?;
        piece.extend_from_slice(&block.block);
    }

    verify(index, &piece, hash)?;
    Ok(piece)
}

/// Check the SHA-1 of a downloaded piece.
pub fn verify(index: u32, piece: &[u8], hash: &[u8; 20]) -> Result<(), Error> {
    let digest = sha1_smol::Sha1::from(piece).digest().bytes();
    if &digest != hash {
        warn!("piece {index} is corrupted");
        return Err(Error::PieceInvalid(index));
    }
    Ok(())
}

/// One attempt: open a fresh session with `addr`, download the piece and
/// close the session.
pub async fn download_piece_at(
    meta: &MetaInfo,
    index: u32,
    addr: SocketAddr,
    local_peer_id: &PeerId,
    config: &Config,
) -> Result<Vec<u8>, Error> {
    let piece_len = meta.piece_len(index)?;
    let hash = meta.piece_hash(index)?;

    let mut session = PeerSession::connect_ready(
        addr,
        meta.info_hash,
        local_peer_id.clone(),
        config,
    )
    .await?;

    let r = download_piece(&mut session, index, piece_len, hash).await;
    session.close().await;
    r
}

/// Order in which the peers are tried for a piece. Piece `index` starts at
/// peer `index mod n` and wraps around the list, each peer once.
pub fn peer_order(index: u32, n: usize) -> impl Iterator<Item = usize> {
    let start = if n == 0 { 0 } else { index as usize % n };
    (0..n).map(move |k| (start + k) % n)
}

/// Download one piece, retrying against the next peer on every failure.
///
/// Fails with [`Error::ExhaustedPeers`] once every peer failed.
pub async fn download_piece_from(
    meta: &MetaInfo,
    index: u32,
    peers: &[SocketAddr],
    local_peer_id: &PeerId,
    config: &Config,
) -> Result<Vec<u8>, Error> {
    if peers.is_empty() {
        return Err(Error::NoPeers);
    }

    let mut attempts = 0;
    let mut last = Error::NoPeers;

    for i in peer_order(index, peers.len()) {
        let addr = peers[i];
        attempts += 1;
        debug!("piece {index} attempt {attempts} with {addr}");

        match download_piece_at(meta, index, addr, local_peer_id, config).await {
            Ok(piece) => return Ok(piece),
            Err(e) if e.is_retryable() => {
                warn!("piece {index} failed with {addr}: {e}");
                last = e;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::ExhaustedPeers { piece: index, attempts, last: Box::new(last) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sha1(data: &[u8]) -> [u8; 20] {
        sha1_smol::Sha1::from(data).digest().bytes()
    }

    #[test]
    fn verify_piece() {
        let piece: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let hash = sha1(&piece);
        assert!(verify(0, &piece, &hash).is_ok());

        for bit in [0, 7, 8 * 16_384 + 3, piece.len() * 8 - 1] {
            let mut flipped = piece.clone();
            flipped[bit / 8] ^= 1 << (bit % 8);
            assert!(matches!(
                verify(4, &flipped, &hash),
                Err(Error::PieceInvalid(4))
            ));
        }
    }

    #[test]
    fn round_robin_order() {
        assert_eq!(peer_order(0, 3).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(peer_order(1, 3).collect::<Vec<_>>(), vec![1, 2, 0]);
        assert_eq!(peer_order(5, 3).collect::<Vec<_>>(), vec![2, 0, 1]);
        assert_eq!(peer_order(7, 1).collect::<Vec<_>>(), vec![0]);
        assert_eq!(peer_order(7, 0).count(), 0);
    }

    #[tokio::test]
    async fn no_peers() {
        let meta = MetaInfo {
            announce: String::new(),
            info: crate::metainfo::Info {
                name: "x".into(),
                length: 1,
                piece_length: 1,
                pieces: vec![sha1(b"a")],
            },
            info_hash: Default::default(),
        };
        let r = download_piece_from(
            &meta,
            0,
            &[],
            &PeerId::generate(),
            &Config::default(),
        )
        .await;
        assert!(matches!(r, Err(Error::NoPeers)));
    }
}
