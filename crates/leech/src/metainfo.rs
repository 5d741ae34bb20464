//! Metainfo is a .torrent file with information about the Torrent.
//!
//! Only the single-file format is supported. The info hash is computed over
//! the canonical encoding of the `info` dict as it was decoded.

use crate::{
    bencode::{self, Bencode},
    error::Error,
    torrent::InfoHash,
};

/// Metainfo is a .torrent file with information about the Torrent.
#[derive(Debug, PartialEq, Clone)]
pub struct MetaInfo {
    /// URL of the tracker.
    pub announce: String,
    pub info: Info,
    /// SHA-1 of the canonical encoding of the `info` dict.
    pub info_hash: InfoHash,
}

/// File related information (Single-file format)
/// <https://fileformats.fandom.com/wiki/Torrent_file>
#[derive(Debug, PartialEq, Clone)]
pub struct Info {
    /// name of the file
    pub name: String,

    /// length of the file in bytes
    pub length: u64,

    /// length in bytes of each piece, the last piece may have a smaller length
    pub piece_length: u32,

    /// The SHA1 hash of each piece, in piece order.
    pub pieces: Vec<[u8; 20]>,
}

fn field<'a>(dict: &'a Bencode, key: &'static str) -> Result<&'a Bencode, Error> {
    dict.get(key.as_bytes()).ok_or(Error::MetadataMissingField(key))
}

impl MetaInfo {
    /// Decode a whole .torrent file.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, Error> {
        let root = bencode::decode_exact(buf)?;
        Self::from_bencode(&root)
    }

    pub fn from_bencode(root: &Bencode) -> Result<Self, Error> {
        if root.as_dict().is_none() {
            return Err(Error::MetadataInvalidField("root"));
        }

        let announce = field(root, "announce")?
            .as_str()
            .ok_or(Error::MetadataInvalidField("announce"))?
            .to_owned();

        let info_value = field(root, "info")?;
        if info_value.as_dict().is_none() {
            return Err(Error::MetadataInvalidField("info"));
        }
        let info = Info::from_bencode(info_value)?;
        let info_hash = Info::info_hash(&info_value.encode());

        Ok(Self { announce, info, info_hash })
    }

    pub fn pieces_count(&self) -> usize {
        self.info.pieces.len()
    }

    /// Get the size (in bytes) of a piece.
    pub fn piece_len(&self, index: u32) -> Result<u32, Error> {
        self.info.piece_len(index)
    }

    pub fn piece_hash(&self, index: u32) -> Result<&[u8; 20], Error> {
        self.info
            .pieces
            .get(index as usize)
            .ok_or(Error::PieceIndexInvalid(index))
    }
}

impl Info {
    fn from_bencode(info: &Bencode) -> Result<Self, Error> {
        let name = field(info, "name")?
            .as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(Error::MetadataInvalidField("name"))?;

        let length = field(info, "length")?
            .as_int()
            .and_then(|v| u64::try_from(v).ok())
            .ok_or(Error::MetadataInvalidField("length"))?;

        let piece_length = field(info, "piece length")?
            .as_int()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or(Error::MetadataInvalidField("piece length"))?;

        let raw = field(info, "pieces")?
            .as_bytes()
            .ok_or(Error::MetadataInvalidField("pieces"))?;

        if raw.len() % 20 != 0 {
            return Err(Error::PiecesLength(raw.len()));
        }

        let pieces: Vec<[u8; 20]> = raw
            .chunks_exact(20)
            .map(|c| {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(c);
                hash
            })
            .collect();

        let expected = length.div_ceil(piece_length as u64) as usize;
        if pieces.len() != expected {
            return Err(Error::PieceCountMismatch {
                expected,
                got: pieces.len(),
            });
        }

        Ok(Self { name, length, piece_length, pieces })
    }

    pub(crate) fn info_hash(buf: &[u8]) -> InfoHash {
        InfoHash(sha1_smol::Sha1::from(buf).digest().bytes())
    }

    /// Get the size (in bytes) of a piece. Every piece has `piece_length`
    /// bytes, except the last one which has the remainder.
    pub fn piece_len(&self, index: u32) -> Result<u32, Error> {
        let count = self.pieces.len();
        if index as usize >= count {
            return Err(Error::PieceIndexInvalid(index));
        }
        if index as usize == count - 1 {
            let remainder = (self.length % self.piece_length as u64) as u32;
            Ok(if remainder == 0 { self.piece_length } else { remainder })
        } else {
            Ok(self.piece_length)
        }
    }
}
