use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use super::{Bitfield, Block, BlockInfo};
use crate::error::Error;

/// Largest message a peer may announce. A piece message carries one block
/// of at most 16 KiB, so anything near this limit is already bogus.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Core messages exchanged after a successful handshake.
/// These are from the vanilla protocol, with no extensions.
#[derive(Debug, Clone, PartialEq)]
pub enum Core {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Bitfield),
    Request(BlockInfo),
    Piece(Block),
    Cancel(BlockInfo),
}

/// The IDs of the [`Core`] messages.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CoreId {
    Choke = 0,
    Unchoke = 1,
    Interested = 2,
    NotInterested = 3,
    Have = 4,
    Bitfield = 5,
    Request = 6,
    Piece = 7,
    Cancel = 8,
}

impl TryFrom<u8> for CoreId {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        use CoreId::*;
        Ok(match value {
            0 => Choke,
            1 => Unchoke,
            2 => Interested,
            3 => NotInterested,
            4 => Have,
            5 => Bitfield,
            6 => Request,
            7 => Piece,
            8 => Cancel,
            v => return Err(Error::UnknownMessageId(v)),
        })
    }
}

impl Core {
    /// The id of the message, keep-alives have none.
    pub fn id(&self) -> Option<CoreId> {
        Some(match self {
            Core::KeepAlive => return None,
            Core::Choke => CoreId::Choke,
            Core::Unchoke => CoreId::Unchoke,
            Core::Interested => CoreId::Interested,
            Core::NotInterested => CoreId::NotInterested,
            Core::Have(_) => CoreId::Have,
            Core::Bitfield(_) => CoreId::Bitfield,
            Core::Request(_) => CoreId::Request,
            Core::Piece(_) => CoreId::Piece,
            Core::Cancel(_) => CoreId::Cancel,
        })
    }

    /// Length of the message on the wire, including the length prefix.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        use Core::*;
        match self {
            KeepAlive => 4,
            Choke | Unchoke | Interested | NotInterested => 4 + 1,
            Cancel(_) | Request(_) => 4 + 1 + 4 + 4 + 4,
            Have(_) => 4 + 1 + 4,
            Bitfield(b) => 4 + 1 + b.as_raw_slice().len(),
            Piece(b) => 4 + 1 + 4 + 4 + b.block.len(),
        }
    }
}

impl From<Core> for BytesMut {
    fn from(val: Core) -> Self {
        let mut dst = BytesMut::with_capacity(val.len());
        // encoding into a BytesMut cannot fail
        let _ = CoreCodec.encode(val, &mut dst);
        dst
    }
}

#[derive(Debug, Clone)]
pub struct CoreCodec;

impl Encoder<Core> for CoreCodec {
    type Error = Error;

    fn encode(&mut self, item: Core, buf: &mut BytesMut) -> Result<(), Error> {
        buf.reserve(item.len());
        match item {
            Core::KeepAlive => {
                buf.put_u32(0);
            }
            Core::Bitfield(bitfield) => {
                let v = bitfield.into_vec();
                buf.put_u32(1 + v.len() as u32);
                buf.put_u8(CoreId::Bitfield as u8);
                buf.extend_from_slice(&v);
            }
            Core::Choke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Choke as u8);
            }
            Core::Unchoke => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Unchoke as u8);
            }
            Core::Interested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::Interested as u8);
            }
            Core::NotInterested => {
                buf.put_u32(1);
                buf.put_u8(CoreId::NotInterested as u8);
            }
            Core::Have(piece_index) => {
                buf.put_u32(1 + 4);
                buf.put_u8(CoreId::Have as u8);
                buf.put_u32(piece_index);
            }
            // <len=0013><id=6><index><begin><length>
            Core::Request(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Request as u8);
                block.encode(buf);
            }
            // <len=0009+X><id=7><index><begin><block>
            Core::Piece(block) => {
                buf.put_u32(1 + 4 + 4 + block.block.len() as u32);
                buf.put_u8(CoreId::Piece as u8);
                block.encode(buf);
            }
            Core::Cancel(block) => {
                buf.put_u32(1 + 4 + 4 + 4);
                buf.put_u8(CoreId::Cancel as u8);
                block.encode(buf);
            }
        }
        Ok(())
    }
}

impl Decoder for CoreCodec {
    type Item = Core;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Core>, Error> {
        // the message length header must be present at the minimum, otherwise
        // we can't determine the message type
        if buf.len() < 4 {
            return Ok(None);
        }

        // peek at length prefix without consuming
        let size =
            u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;

        if size == 0 {
            buf.advance(4);
            return Ok(Some(Core::KeepAlive));
        }

        if size > MAX_MESSAGE_SIZE {
            warn!("! peer announced a message of {size} bytes");
            return Err(Error::MessageTooLarge(size));
        }

        // incomplete message, if the packet is to large to fit the MTU (~1,500
        // bytes) the packet will be split into many packets. The decoder will
        // be called each time a packet arrive, but if the buffer is not
        // full yet, we don't avance the cursor and just wait.
        if buf.len() < 4 + size {
            buf.reserve(4 + size - buf.len());
            return Ok(None);
        }

        buf.advance(4);
        let mut payload = buf.split_to(size);
        let raw_id = payload.get_u8();
        let msg_id = CoreId::try_from(raw_id)?;

        // the frame is complete, a payload of the wrong size for its id is
        // a protocol violation and not a partial read.
        let expect = |ok: bool| {
            if ok {
                Ok(())
            } else {
                Err(Error::MessageMalformed(raw_id))
            }
        };

        let msg = match msg_id {
            // <len=0001><id=0>
            CoreId::Choke => {
                expect(payload.is_empty())?;
                Core::Choke
            }
            // <len=0001><id=1>
            CoreId::Unchoke => {
                expect(payload.is_empty())?;
                Core::Unchoke
            }
            // <len=0001><id=2>
            CoreId::Interested => {
                expect(payload.is_empty())?;
                Core::Interested
            }
            // <len=0001><id=3>
            CoreId::NotInterested => {
                expect(payload.is_empty())?;
                Core::NotInterested
            }
            // <len=0005><id=4><piece index>
            CoreId::Have => {
                expect(payload.len() == 4)?;
                Core::Have(payload.get_u32())
            }
            // <len=0001+X><id=5><bitfield>
            CoreId::Bitfield => Core::Bitfield(Bitfield::from_vec(payload.to_vec())),
            // <len=0013><id=6><index><begin><length>
            CoreId::Request => {
                expect(payload.len() == 12)?;
                Core::Request(BlockInfo {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    len: payload.get_u32(),
                })
            }
            // <len=0009+X><id=7><index><begin><block>
            CoreId::Piece => {
                expect(payload.len() >= 8)?;
                let index = payload.get_u32();
                let begin = payload.get_u32();
                Core::Piece(Block { index, begin, block: payload.to_vec() })
            }
            // <len=0013><id=8><index><begin><length>
            CoreId::Cancel => {
                expect(payload.len() == 12)?;
                Core::Cancel(BlockInfo {
                    index: payload.get_u32(),
                    begin: payload.get_u32(),
                    len: payload.get_u32(),
                })
            }
        };

        Ok(Some(msg))
    }
}
