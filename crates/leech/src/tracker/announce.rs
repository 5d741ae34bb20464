use std::net::SocketAddr;

use crate::{
    bencode::{self, Bencode},
    error::Error,
    peer::PeerId,
    torrent::InfoHash,
};

use super::parse_compact_peer_list;

/// Query parameters of an HTTP announce.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
}

impl Request {
    /// Request for a download that did not start yet.
    pub fn new(info_hash: InfoHash, peer_id: PeerId, port: u16, left: u64) -> Self {
        Self { info_hash, peer_id, port, uploaded: 0, downloaded: 0, left }
    }

    /// Append the query to the announce url.
    pub fn to_url(&self, announce: &str) -> String {
        let sep = if announce.contains('?') { '&' } else { '?' };
        format!(
            "{announce}{sep}info_hash={}&peer_id={}&port={}&uploaded={}\
             &downloaded={}&left={}&compact=1",
            urlencoding::encode_binary(&self.info_hash.0),
            urlencoding::encode_binary(self.peer_id.as_bytes()),
            self.port,
            self.uploaded,
            self.downloaded,
            self.left,
        )
    }
}

/// Bencoded body of an announce response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Seconds to wait before the next announce.
    pub interval: u32,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
}

impl Response {
    pub fn deserialize(buf: &[u8]) -> Result<Self, Error> {
        let root = bencode::decode_exact(buf)?;

        if root.as_dict().is_none() {
            return Err(Error::Tracker("the response is not a dict".into()));
        }

        if let Some(reason) = root.get(b"failure reason") {
            let reason = reason
                .as_bytes()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default();
            return Err(Error::Tracker(reason));
        }

        let count = |key: &[u8]| {
            root.get(key)
                .and_then(Bencode::as_int)
                .and_then(|v| u32::try_from(v).ok())
        };

        let interval = count(b"interval")
            .ok_or_else(|| Error::Tracker("missing `interval`".into()))?;

        let peers = root
            .get(b"peers")
            .and_then(Bencode::as_bytes)
            .ok_or_else(|| Error::Tracker("missing compact `peers`".into()))?;

        Ok(Self {
            interval,
            complete: count(b"complete"),
            incomplete: count(b"incomplete"),
            peers: parse_compact_peer_list(peers)?,
        })
    }
}
