use std::fmt::Display;

use rand::Rng;

/// Prefix of the peer ids generated by this client, in the Azureus style.
pub const PEER_ID_PREFIX: &[u8; 8] = b"-LC0001-";

#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Generate a random peer id, prefixed with [`PEER_ID_PREFIX`].
    pub fn generate() -> Self {
        let mut id = [0u8; 20];
        id[..8].copy_from_slice(PEER_ID_PREFIX);
        rand::thread_rng().fill(&mut id[8..]);
        Self(id)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.to_string();
        f.write_str(&s)
    }
}

impl From<PeerId> for [u8; 20] {
    fn from(value: PeerId) -> Self {
        value.0
    }
}

impl From<[u8; 20]> for PeerId {
    fn from(value: [u8; 20]) -> Self {
        Self(value)
    }
}

impl TryFrom<Vec<u8>> for PeerId {
    type Error = &'static str;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        let buff: [u8; 20] = value
            .try_into()
            .map_err(|_| "The PeerId must have exactly 20 bytes")?;
        Ok(PeerId(buff))
    }
}
