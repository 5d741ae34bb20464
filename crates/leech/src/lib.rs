//! A library to leech single-file torrents with the BitTorrent protocol V1.
//!
//! This is the library of the `leech` client. It has the building blocks to
//! read a metainfo file, ask a tracker for peers, talk the wire protocol with
//! a peer, and download a whole file from a swarm.
//!
//! The client only downloads. It never uploads, never accepts incoming
//! connections, and keeps the whole file in memory until it is written.
//!
//! # Example
//!
//! Download a torrent with the peers of its tracker:
//!
//! ```no_run
//! use leech::{
//!     config::{Config, Overrides},
//!     metainfo::MetaInfo,
//!     torrent::Torrent,
//!     tracker::Tracker,
//! };
//!
//! # async fn run() -> Result<(), leech::error::Error> {
//! let config = Config::load(&Overrides::default()).await?;
//! let peer_id = config.peer_id()?;
//!
//! let buf = tokio::fs::read("debian.iso.torrent").await?;
//! let meta = MetaInfo::from_bytes(&buf)?;
//!
//! let tracker = Tracker::new(&config)?;
//! let peers = tracker.announce(&meta, &peer_id).await?.peers;
//!
//! let file = Torrent::new(meta, peers, peer_id, config).download().await?;
//! tokio::fs::write("debian.iso", file).await?;
//! # Ok(())
//! # }
//! ```

pub mod bencode;
pub mod config;
pub mod error;
pub mod metainfo;
pub mod peer;
pub mod piece;
pub mod tcp_wire;
pub mod torrent;
pub mod tracker;
pub mod utils;
