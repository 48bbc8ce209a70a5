use std::collections::{BTreeMap, BTreeSet};

use super::peer::{Peer, PeerConfig};

/// One interface's configuration, built fresh for a single configure or
/// query call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    // Interface name
    pub name: String,

    // privateKey
    pub private_key: Option<String>,

    // publicKey
    pub public_key: Option<String>,

    // portListen
    pub listen_port: Option<u16>,

    // fwmark
    pub fwmark: Option<u32>,

    // Address
    pub addresses: Vec<String>,

    // replacePeers
    pub replace_peers: bool,

    // peers, keyed by public key
    pub peers: BTreeMap<String, Peer>,
}

/// A single peer change a backend has to apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerOp<'a> {
    Remove(&'a str),
    Upsert(&'a str, &'a PeerConfig),
}

impl DeviceConfig {
    pub fn builder(name: impl Into<String>) -> DeviceConfigBuilder {
        DeviceConfigBuilder {
            inner: DeviceConfig {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Peer changes needed to bring a device holding `existing` peers in
    /// line with this configuration. Removals come first, keys sorted.
    pub fn plan_peers<'a>(&'a self, existing: &'a [String]) -> Vec<PeerOp<'a>> {
        let mut removals = BTreeSet::new();

        if self.replace_peers {
            removals.extend(
                existing
                    .iter()
                    .filter(|key| !self.peers.contains_key(key.as_str()))
                    .map(String::as_str),
            );
        }

        let mut upserts = Vec::new();
        for (key, peer) in &self.peers {
            match peer {
                Peer::Remove => {
                    removals.insert(key.as_str());
                }
                Peer::Configure(cfg) => upserts.push(PeerOp::Upsert(key.as_str(), cfg)),
            }
        }

        removals
            .into_iter()
            .map(PeerOp::Remove)
            .chain(upserts)
            .collect()
    }
}

/// Exclusively owned while a description is being decoded, then frozen
/// into a [`DeviceConfig`].
#[derive(Debug)]
pub struct DeviceConfigBuilder {
    inner: DeviceConfig,
}

impl DeviceConfigBuilder {
    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.inner.private_key = Some(key.into());
        self
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.inner.public_key = Some(key.into());
        self
    }

    pub fn listen_port(mut self, port: u16) -> Self {
        self.inner.listen_port = Some(port);
        self
    }

    pub fn fwmark(mut self, fwmark: u32) -> Self {
        self.inner.fwmark = Some(fwmark);
        self
    }

    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.inner.addresses.push(address.into());
        self
    }

    pub fn replace_peers(mut self, replace: bool) -> Self {
        self.inner.replace_peers = replace;
        self
    }

    /// Later entries for the same key win.
    pub fn peer(mut self, public_key: impl Into<String>, peer: impl Into<Peer>) -> Self {
        self.inner.peers.insert(public_key.into(), peer.into());
        self
    }

    pub fn build(self) -> DeviceConfig {
        self.inner
    }
}
