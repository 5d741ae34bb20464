//! Configuration of the client.
//!
//! Values are resolved in order of priority:
//!
//! CLI flags --overrides--> `LEECH_*` env --overrides--> file --> defaults
//!
//! The file is `config.toml` inside the user's config folder, it is created
//! with the default values the first time the configuration is loaded.
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use ::config::{Environment, File, FileFormat};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::{fs::create_dir_all, io::AsyncWriteExt};
use tracing::debug;

use crate::{error::Error, peer::PeerId};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    /// How many pieces may be downloading at the same time.
    pub max_in_flight_pieces: usize,

    /// Time to wait for a TCP connection with a peer.
    pub connect_timeout_ms: u64,

    /// Time to wait for the handshake and for each message of a peer.
    pub read_timeout_ms: u64,

    /// Port announced to the tracker.
    pub local_peer_port: u16,

    /// A fixed peer id of exactly 20 bytes, random when not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_in_flight_pieces: 5,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 30_000,
            local_peer_port: 6881,
            peer_id: None,
        }
    }
}

/// Values given on the command line, they win over every other source.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub max_in_flight_pieces: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub local_peer_port: Option<u16>,
}

impl Config {
    /// Returns the path of the configuration file.
    ///
    /// If it doesn't exist, we try to create a default configuration file
    /// at the user's config folder.
    ///
    /// # Errors
    ///
    /// This fn can fail if the user has no home folder, or if the program
    /// does not have permission to create the folder or the file.
    pub async fn config_file() -> Result<PathBuf, Error> {
        // errors if the user does not have a home folder
        let dotfile =
            ProjectDirs::from("", "", "leech").ok_or(Error::HomeInvalid)?;
        let mut config_path = dotfile.config_dir().to_path_buf();

        if !config_path.exists() {
            create_dir_all(&config_path).await?;
        }

        config_path.push("config.toml");

        if !config_path.exists() {
            debug!("writing default config to {config_path:?}");
            let default_config = toml::to_string(&Config::default())?;
            let mut file = tokio::fs::File::create(&config_path).await?;
            file.write_all(default_config.as_bytes()).await?;
        }

        Ok(config_path)
    }

    /// Load the configuration file, the environment and the CLI overrides,
    /// and merge them.
    pub async fn load(overrides: &Overrides) -> Result<Self, Error> {
        let path = Self::config_file().await?;
        Self::load_from(
            Some(&path),
            Environment::with_prefix("LEECH"),
            overrides,
        )
    }

    /// Resolve the configuration from the given sources, `file` may be
    /// missing.
    pub fn load_from(
        file: Option<&Path>,
        env: Environment,
        overrides: &Overrides,
    ) -> Result<Self, Error> {
        let d = Config::default();

        let mut builder = ::config::Config::builder()
            .set_default("max_in_flight_pieces", d.max_in_flight_pieces as u64)?
            .set_default("connect_timeout_ms", d.connect_timeout_ms)?
            .set_default("read_timeout_ms", d.read_timeout_ms)?
            .set_default("local_peer_port", d.local_peer_port as u64)?;

        if let Some(file) = file {
            builder = builder.add_source(
                File::from(file).format(FileFormat::Toml).required(false),
            );
        }

        let config = builder
            .add_source(env)
            .set_override_option(
                "max_in_flight_pieces",
                overrides.max_in_flight_pieces.map(|v| v as u64),
            )?
            .set_override_option("connect_timeout_ms", overrides.connect_timeout_ms)?
            .set_override_option("read_timeout_ms", overrides.read_timeout_ms)?
            .set_override_option(
                "local_peer_port",
                overrides.local_peer_port.map(|v| v as u64),
            )?
            .build()?
            .try_deserialize::<Config>()?;

        Ok(config)
    }

    /// The configured peer id, or a random one.
    pub fn peer_id(&self) -> Result<PeerId, Error> {
        match &self.peer_id {
            Some(id) => PeerId::try_from(id.as_bytes().to_vec())
                .map_err(|_| Error::PeerIdInvalid),
            None => Ok(PeerId::generate()),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
