//! A session with one remote peer.
//!
//! The session drives the leeching side of the wire protocol over one TCP
//! connection: handshake, wait for the bitfield, send interested, wait for
//! unchoke, and then request blocks one at a time. It is owned by the task
//! that drives it and never shared.
mod session;
mod types;

pub use session::*;
pub use types::*;

use std::{net::SocketAddr, time::Duration};

use futures::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    time::timeout,
};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::Error,
    tcp_wire::{Block, BlockInfo, Core, CoreCodec, CoreId, Handshake, HandshakeCodec},
    torrent::InfoHash,
};

/// The socket of the session. It starts with the handshake codec and is
/// switched to the core codec once the handshake is verified.
enum Socket<S> {
    Handshake(Framed<S, HandshakeCodec>),
    Core(Framed<S, CoreCodec>),
    /// Only observable if switching codecs failed halfway.
    Gone,
}

pub struct PeerSession<S = TcpStream> {
    pub addr: SocketAddr,
    state: SessionState,
    core: CoreState,
    our_handshake: Handshake,
    remote_peer_id: Option<PeerId>,
    read_timeout: Duration,
    socket: Socket<S>,
}

impl PeerSession<TcpStream> {
    /// Open a TCP connection with the peer, the session starts in
    /// [`SessionState::Connecting`].
    pub async fn connect(
        addr: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        config: &Config,
    ) -> Result<Self, Error> {
        debug!("{addr} connecting");

        let stream = timeout(config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)??;

        Ok(Self::new(stream, addr, info_hash, local_peer_id, config.read_timeout()))
    }

    /// Connect, handshake and negotiate, returning a [`SessionState::Ready`]
    /// session.
    pub async fn connect_ready(
        addr: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        config: &Config,
    ) -> Result<Self, Error> {
        let mut session =
            Self::connect(addr, info_hash, local_peer_id, config).await?;
        session.handshake().await?;
        session.negotiate().await?;
        Ok(session)
    }
}

impl<S> PeerSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Start a session over an already connected stream.
    pub fn new(
        stream: S,
        addr: SocketAddr,
        info_hash: InfoHash,
        local_peer_id: PeerId,
        read_timeout: Duration,
    ) -> Self {
        Self {
            addr,
            state: SessionState::Connecting,
            core: CoreState::default(),
            our_handshake: Handshake::new(info_hash, local_peer_id),
            remote_peer_id: None,
            read_timeout,
            socket: Socket::Handshake(Framed::new(stream, HandshakeCodec)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn remote_peer_id(&self) -> Option<&PeerId> {
        self.remote_peer_id.as_ref()
    }

    pub fn is_unchoked(&self) -> bool {
        !self.core.peer_choking
    }

    /// Exchange handshakes with the peer and return its peer id.
    ///
    /// Leaves the session in [`SessionState::HandshakeVerified`].
    pub async fn handshake(&mut self) -> Result<PeerId, Error> {
        self.expect_state("handshake", SessionState::Connecting)?;
        let r = self.exchange_handshakes().await;
        self.track(r)
    }

    /// Receive the bitfield, send interested and wait for unchoke.
    ///
    /// Leaves the session in [`SessionState::Ready`].
    pub async fn negotiate(&mut self) -> Result<(), Error> {
        self.expect_state("negotiate", SessionState::HandshakeVerified)?;
        let r = self.wait_unchoke().await;
        self.track(r)
    }

    /// Request one block and wait for it. The peer must answer with a piece
    /// message for the same index, offset and length.
    pub async fn request_block(&mut self, info: BlockInfo) -> Result<Block, Error> {
        self.expect_state("request_block", SessionState::Ready)?;
        if !info.is_valid() {
            return Err(Error::BlockInvalid {
                index: info.index,
                begin: info.begin,
                len: info.len,
            });
        }
        let r = self.exchange_block(info).await;
        self.track(r)
    }

    /// Flush and shutdown the socket.
    pub async fn close(&mut self) {
        let r = match &mut self.socket {
            Socket::Handshake(framed) => framed.close().await,
            Socket::Core(framed) => framed.close().await,
            Socket::Gone => Ok(()),
        };
        if let Err(e) = r {
            debug!("{} error while closing: {e}", self.addr);
        }
        if !self.state.is_terminal() {
            self.state = SessionState::Closed;
        }
    }

    async fn exchange_handshakes(&mut self) -> Result<PeerId, Error> {
        let Socket::Handshake(framed) = &mut self.socket else {
            return Err(invalid_state("handshake", self.state));
        };

        debug!("{} > handshake", self.addr);
        framed.send(self.our_handshake.clone()).await?;
        self.state = SessionState::HandshakeSent;

        let theirs = match timeout(self.read_timeout, framed.next()).await {
            Err(_) => return Err(Error::HandshakeTimeout),
            Ok(None) => return Err(Error::PeerClosedSocket),
            Ok(Some(r)) => r?,
        };
        debug!("{} < handshake {}", self.addr, theirs.peer_id);

        if !self.our_handshake.validate(&theirs) {
            return Err(Error::HandshakeInvalid);
        }

        self.switch_to_core()?;
        self.remote_peer_id = Some(theirs.peer_id.clone());
        self.state = SessionState::HandshakeVerified;

        Ok(theirs.peer_id)
    }

    async fn wait_unchoke(&mut self) -> Result<(), Error> {
        self.state = SessionState::AwaitingBitfield;
        match self.recv().await? {
            Core::Bitfield(bitfield) => {
                debug!(
                    "{} < bitfield len: {} ones: {}",
                    self.addr,
                    bitfield.len(),
                    bitfield.count_ones()
                );
            }
            msg => return Err(unexpected(CoreId::Bitfield, &msg)),
        }

        debug!("{} > interested", self.addr);
        self.send(Core::Interested).await?;
        self.state = SessionState::InterestedSent;

        self.state = SessionState::AwaitingUnchoke;
        match self.recv().await? {
            Core::Unchoke => {
                debug!("{} < unchoke", self.addr);
                self.core.peer_choking = false;
            }
            msg => return Err(unexpected(CoreId::Unchoke, &msg)),
        }

        self.state = SessionState::Ready;
        Ok(())
    }

    async fn exchange_block(&mut self, info: BlockInfo) -> Result<Block, Error> {
        debug!("{} > request {info:?}", self.addr);
        self.send(Core::Request(info.clone())).await?;

        let block = match self.recv().await? {
            Core::Piece(block) => block,
            msg => return Err(unexpected(CoreId::Piece, &msg)),
        };

        if block.index != info.index
            || block.begin != info.begin
            || block.block.len() != info.len as usize
        {
            return Err(Error::BlockMismatch {
                index: info.index,
                begin: info.begin,
                len: info.len,
                got_index: block.index,
                got_begin: block.begin,
                got_len: block.block.len() as u32,
            });
        }

        debug!("{} < piece {:?}", self.addr, block.info());
        Ok(block)
    }

    async fn send(&mut self, msg: Core) -> Result<(), Error> {
        let Socket::Core(framed) = &mut self.socket else {
            return Err(invalid_state("send", self.state));
        };
        framed.send(msg).await
    }

    /// Read the next message that is not a keep-alive.
    async fn recv(&mut self) -> Result<Core, Error> {
        let Socket::Core(framed) = &mut self.socket else {
            return Err(invalid_state("recv", self.state));
        };
        loop {
            match timeout(self.read_timeout, framed.next()).await {
                Err(_) => return Err(Error::MessageTimeout),
                Ok(None) => return Err(Error::PeerClosedSocket),
                Ok(Some(Err(e))) => return Err(e),
                Ok(Some(Ok(Core::KeepAlive))) => {
                    debug!("{} < keepalive", self.addr);
                }
                Ok(Some(Ok(msg))) => return Ok(msg),
            }
        }
    }

    /// Switch the codec of the socket without losing the bytes that arrived
    /// together with the handshake.
    fn switch_to_core(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.socket, Socket::Gone) {
            Socket::Handshake(framed) => {
                let old_parts = framed.into_parts();
                let mut new_parts = FramedParts::new(old_parts.io, CoreCodec);
                new_parts.read_buf = old_parts.read_buf;
                new_parts.write_buf = old_parts.write_buf;
                self.socket = Socket::Core(Framed::from_parts(new_parts));
                Ok(())
            }
            other => {
                self.socket = other;
                Err(invalid_state("switch_to_core", self.state))
            }
        }
    }

    fn expect_state(
        &self,
        op: &'static str,
        expected: SessionState,
    ) -> Result<(), Error> {
        if self.state != expected {
            return Err(invalid_state(op, self.state));
        }
        Ok(())
    }

    /// Any error ends the session.
    fn track<T>(&mut self, r: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &r {
            warn!("{} failed in state {}: {e}", self.addr, self.state.name());
            self.state = SessionState::Failed;
        }
        r
    }
}

fn invalid_state(op: &'static str, state: SessionState) -> Error {
    Error::InvalidState { op, state: state.name() }
}

fn unexpected(expected: CoreId, msg: &Core) -> Error {
    Error::UnexpectedMessage {
        expected,
        got: msg.id().map(|id| id as u8).unwrap_or_default(),
    }
}
