#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    // presharedKey
    pub preshared_key: Option<String>,

    // endpoint, host:port
    pub endpoint: Option<String>,

    // allowedIPs
    pub allowed_ips: Vec<String>,

    // keepInterval, seconds
    pub keep_interval: Option<u16>,

    // Read-only, filled in by device queries
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub last_handshake: u64,
}

/// One entry of a device's peer map, keyed by the peer's public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Peer {
    /// `removeMe`: drop the peer from the device.
    Remove,
    Configure(PeerConfig),
}

impl Peer {
    pub fn is_removal(&self) -> bool {
        matches!(self, Peer::Remove)
    }

    pub fn config(&self) -> Option<&PeerConfig> {
        match self {
            Peer::Remove => None,
            Peer::Configure(cfg) => Some(cfg),
        }
    }
}

impl Default for Peer {
    fn default() -> Self {
        Peer::Configure(PeerConfig::default())
    }
}

impl From<PeerConfig> for Peer {
    fn from(cfg: PeerConfig) -> Self {
        Peer::Configure(cfg)
    }
}
