//! HTTP tracker client.
//!
//! A single announce is made to get the peers of a torrent, the response
//! must use the compact peer list of BEP23.
pub mod announce;

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use tracing::{debug, info};

use crate::{config::Config, error::Error, metainfo::MetaInfo, peer::PeerId};

pub struct Tracker {
    client: reqwest::Client,
    local_peer_port: u16,
}

impl Tracker {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.read_timeout())
            .build()?;

        Ok(Self { client, local_peer_port: config.local_peer_port })
    }

    /// Announce to the tracker of the torrent, nothing downloaded yet.
    pub async fn announce(
        &self,
        meta: &MetaInfo,
        peer_id: &PeerId,
    ) -> Result<announce::Response, Error> {
        let req = announce::Request::new(
            meta.info_hash,
            peer_id.clone(),
            self.local_peer_port,
            meta.info.length,
        );
        self.announce_with(&meta.announce, &req).await
    }

    pub async fn announce_with(
        &self,
        announce: &str,
        req: &announce::Request,
    ) -> Result<announce::Response, Error> {
        let url = req.to_url(announce);
        debug!("> announce {url}");

        let res = self.client.get(&url).send().await?;
        if !res.status().is_success() {
            return Err(Error::Tracker(format!(
                "tracker returned status {}",
                res.status()
            )));
        }

        let body = res.bytes().await?;
        let res = announce::Response::deserialize(&body)?;

        info!(
            "< announce interval {} peers {}",
            res.interval,
            res.peers.len()
        );

        Ok(res)
    }
}

/// Support for BEP23, each peer is 4 bytes of ip and 2 bytes of port, both
/// in network order.
pub fn parse_compact_peer_list(buf: &[u8]) -> Result<Vec<SocketAddr>, Error> {
    let chunks = buf.chunks_exact(6);
    if !chunks.remainder().is_empty() {
        return Err(Error::TrackerCompactPeerList);
    }

    Ok(chunks
        .map(|hostport| {
            let ip = Ipv4Addr::new(hostport[0], hostport[1], hostport[2], hostport[3]);
            let port = u16::from_be_bytes([hostport[4], hostport[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect())
}
