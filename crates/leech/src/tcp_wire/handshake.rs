//! Codec for encoding and decoding handshakes.
//!
//! This has to be a separate codec as the handshake has a different
//! structure than the rest of the messages. Moreover, handshakes may only
//! be sent once at the beginning of a connection, preceding all other
//! messages. Thus, after receiving and sending a handshake the codec
//! should be switched to [`CoreCodec`], but care should be taken not to
//! discard the underlying receive and send buffers.
//!
//! [`CoreCodec`]: super::CoreCodec

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::PSTR;
use crate::{error::Error, peer::PeerId, torrent::InfoHash};

/// Size of a handshake on the wire.
pub const HANDSHAKE_LEN: usize = 1 + 19 + 8 + 20 + 20;

#[derive(Debug)]
pub struct HandshakeCodec;

impl Encoder<Handshake> for HandshakeCodec {
    type Error = Error;

    fn encode(
        &mut self,
        handshake: Handshake,
        buf: &mut BytesMut,
    ) -> Result<(), Error> {
        buf.extend_from_slice(&handshake.serialize());
        Ok(())
    }
}

impl Decoder for HandshakeCodec {
    type Item = Handshake;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Handshake>, Error> {
        if buf.is_empty() {
            return Ok(None);
        }

        // peek at the protocol length before the whole handshake arrived, a
        // peer that does not speak the protocol is dropped right away.
        if buf[0] as usize != PSTR.len() {
            warn!("! handshake with wrong pstr_len {}", buf[0]);
            return Err(Error::HandshakeInvalid);
        }

        if buf.len() < HANDSHAKE_LEN {
            buf.reserve(HANDSHAKE_LEN - buf.len());
            return Ok(None);
        }

        let frame = buf.split_to(HANDSHAKE_LEN);
        Handshake::deserialize(&frame).map(Some)
    }
}

/// pstrlen = 19
/// pstr = "BitTorrent protocol"
/// This is the very first message exchanged. If the peer's protocol string
/// (`BitTorrent protocol`) or the info hash differs from ours, the connection
/// is severed. The reserved field is 8 zero bytes. The peer id is usually the
/// client name and version.
#[derive(Clone, Debug, PartialEq)]
pub struct Handshake {
    pub pstr_len: u8,
    pub pstr: [u8; 19],
    pub reserved: [u8; 8],
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(
        info_hash: impl Into<[u8; 20]>,
        peer_id: impl Into<[u8; 20]>,
    ) -> Self {
        Self {
            pstr_len: PSTR.len() as u8,
            pstr: PSTR,
            reserved: [0u8; 8],
            info_hash: InfoHash(info_hash.into()),
            peer_id: PeerId::from(peer_id.into()),
        }
    }

    /// Write the handshake field by field, in network order.
    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(self.pstr_len);
        buf.put_slice(&self.pstr);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash.0);
        buf.put_slice(self.peer_id.as_bytes());

        let mut out = [0u8; HANDSHAKE_LEN];
        out.copy_from_slice(&buf);
        out
    }

    pub fn deserialize(mut buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < HANDSHAKE_LEN {
            return Err(Error::HandshakeInvalid);
        }

        let pstr_len = buf.get_u8();
        let mut pstr = [0; 19];
        buf.copy_to_slice(&mut pstr);
        let mut reserved = [0; 8];
        buf.copy_to_slice(&mut reserved);
        let mut info_hash = [0; 20];
        buf.copy_to_slice(&mut info_hash);
        let mut peer_id = [0; 20];
        buf.copy_to_slice(&mut peer_id);

        Ok(Self {
            pstr_len,
            pstr,
            reserved,
            info_hash: InfoHash(info_hash),
            peer_id: PeerId::from(peer_id),
        })
    }

    /// Check the handshake of the remote peer against ours.
    pub fn validate(&self, target: &Self) -> bool {
        if target.pstr_len != 19 {
            warn!("! handshake with wrong pstr_len, dropping connection");
            return false;
        }
        if target.pstr != PSTR {
            warn!("! handshake with wrong pstr, dropping connection");
            return false;
        }
        if self.info_hash != target.info_hash {
            warn!("! info_hash from receiving handshake does not match ours");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake() {
        let info_hash = [5u8; 20];
        let peer_id = [7u8; 20];
        let our_handshake = Handshake::new(info_hash, peer_id);

        assert_eq!(our_handshake.pstr_len, 19);
        assert_eq!(our_handshake.pstr, PSTR);
        assert_eq!(our_handshake.reserved, [0; 8]);
        assert_eq!(*our_handshake.peer_id.as_bytes(), peer_id);
        assert_eq!(our_handshake.info_hash.0, info_hash);

        let our_handshake = Handshake::new(info_hash, peer_id).serialize();
        assert_eq!(
            our_handshake,
            [
                19, 66, 105, 116, 84, 111, 114, 114, 101, 110, 116, 32, 112,
                114, 111, 116, 111, 99, 111, 108, 0, 0, 0, 0, 0, 0, 0, 0, 5,
                5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 7, 7,
                7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7, 7
            ]
        );
    }

    #[test]
    fn decode_in_fragments() {
        let ours = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = ours.serialize();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&bytes[..30]);
        assert!(HandshakeCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&bytes[30..]);
        // a message that arrived together with the handshake stays in the buf
        buf.extend_from_slice(&[0, 0, 0, 1, 1]);

        let theirs = HandshakeCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(theirs, ours);
        assert_eq!(&buf[..], &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn wrong_pstr_len_is_rejected() {
        let mut bytes = Handshake::new([1u8; 20], [2u8; 20]).serialize();
        bytes[0] = 18;
        let mut buf = BytesMut::from(&bytes[..]);
        assert!(matches!(
            HandshakeCodec.decode(&mut buf),
            Err(Error::HandshakeInvalid)
        ));
    }

    #[test]
    fn validate_info_hash_and_pstr() {
        let ours = Handshake::new([1u8; 20], [2u8; 20]);

        let theirs = Handshake::new([1u8; 20], [9u8; 20]);
        assert!(ours.validate(&theirs));

        let other_torrent = Handshake::new([3u8; 20], [9u8; 20]);
        assert!(!ours.validate(&other_torrent));

        let mut bad_pstr = theirs.clone();
        bad_pstr.pstr[0] = b'b';
        assert!(!ours.validate(&bad_pstr));
    }
}
