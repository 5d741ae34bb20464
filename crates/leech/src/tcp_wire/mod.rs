//! Documentation of the "TCP Wire" protocol between Peers in the network.
//! Peers will follow this protocol to exchange information about torrents.
//!
//! The client only speaks the leeching side of the protocol:
//!
//! ```text
//! c <-handshake-> p
//! c <-bitfield-   p
//! c -interested-> p
//! c <-unchoke-    p
//! c -request->    p
//! c <-piece-      p
//! ```
pub mod handshake;
pub mod messages;

pub use handshake::*;
pub use messages::*;

use bitvec::{order::Msb0, vec::BitVec};
use bytes::{BufMut, BytesMut};

/// The default block_len that most clients support, some clients drop
/// the connection on blocks larger than this value.
///
/// Tha last block of a piece might be smallar.
pub const BLOCK_LEN: u32 = 16384;

/// Protocol String
/// String identifier of the string "BitTorrent protocol", in bytes.
pub const PSTR: [u8; 19] = *b"BitTorrent protocol";

/// Bitfield where index = piece.
pub type Bitfield = BitVec<u8, Msb0>;

/// A Block is a subset of a Piece,
/// pieces are subsets of the entire Torrent data.
///
/// When peers send data (seed) to us, they send us Blocks.
/// This happens on the "Piece" message of the peer wire protocol.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
    /// The index of the piece this block belongs to.
    pub index: u32,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's data. 16 KiB most of the times,
    /// but the last block of a piece *might* be smaller.
    pub block: Vec<u8>,
}

impl Block {
    /// Encodes the block in the network binary protocol's format into the
    /// given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.extend_from_slice(&self.block);
    }

    /// The [`BlockInfo`] that describes this block.
    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            index: self.index,
            begin: self.begin,
            len: self.block.len() as u32,
        }
    }
}

/// The representation of a [`Block`].
///
/// When we ask a peer to give us a [`Block`], we send this struct,
/// using the "Request" message of the tcp wire protocol.
///
/// This is almost identical to the [`Block`] struct,
/// the only difference is that instead of having a `block`,
/// we have a `len` representing the len of the block.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockInfo {
    /// The index of the piece of which this is a block.
    pub index: u32,
    /// The zero-based byte offset into the piece.
    pub begin: u32,
    /// The block's length in bytes. <= 16 KiB
    pub len: u32,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self { index: 0, begin: 0, len: BLOCK_LEN }
    }
}

impl From<Block> for BlockInfo {
    fn from(val: Block) -> Self {
        val.info()
    }
}

impl BlockInfo {
    /// Encodes the block info in the network binary protocol's format into the
    /// given buffer.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.index);
        buf.put_u32(self.begin);
        buf.put_u32(self.len);
    }

    /// Validate the [`BlockInfo`]. Like most clients, we only support
    /// data <= 16kiB.
    pub fn is_valid(&self) -> bool {
        self.len <= BLOCK_LEN && self.len > 0
    }

    /// Split a piece of `piece_len` bytes into consecutive blocks of at most
    /// [`BLOCK_LEN`] bytes, the last block takes the remainder.
    pub fn split_piece(index: u32, piece_len: u32) -> Vec<BlockInfo> {
        (0..piece_len)
            .step_by(BLOCK_LEN as usize)
            .map(|begin| BlockInfo {
                index,
                begin,
                len: BLOCK_LEN.min(piece_len - begin),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_piece_into_blocks() {
        let blocks = BlockInfo::split_piece(3, BLOCK_LEN * 2 + 100);
        assert_eq!(
            blocks,
            vec![
                BlockInfo { index: 3, begin: 0, len: BLOCK_LEN },
                BlockInfo { index: 3, begin: BLOCK_LEN, len: BLOCK_LEN },
                BlockInfo { index: 3, begin: BLOCK_LEN * 2, len: 100 },
            ]
        );
        assert!(blocks.iter().all(BlockInfo::is_valid));

        // exact multiple, no empty trailing block
        let blocks = BlockInfo::split_piece(0, BLOCK_LEN * 4);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks.last().unwrap().len, BLOCK_LEN);

        let blocks = BlockInfo::split_piece(0, 10);
        assert_eq!(blocks, vec![BlockInfo { index: 0, begin: 0, len: 10 }]);

        assert!(BlockInfo::split_piece(0, 0).is_empty());
    }

    #[test]
    fn block_info_of_block() {
        let block = Block { index: 1, begin: BLOCK_LEN, block: vec![0; 7] };
        assert_eq!(
            BlockInfo::from(block),
            BlockInfo { index: 1, begin: BLOCK_LEN, len: 7 }
        );
    }
}
