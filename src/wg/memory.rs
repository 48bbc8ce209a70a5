use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{
    Key, WireguardApi,
    device::{DeviceConfig, PeerOp},
    peer::{Peer, PeerConfig},
};
use crate::error::DeviceError;

pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;

#[derive(Debug, Default, Clone)]
struct MemoryDevice {
    private_key: Option<Key>,
    listen_port: u16,
    fwmark: u32,
    addresses: Vec<String>,
    peers: BTreeMap<String, PeerConfig>,
}

/// Device API backed by a map in process memory. Interfaces have to be
/// added up front, just as real ones are created outside this crate.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    devices: Mutex<BTreeMap<String, MemoryDevice>>,
    enumeration_failure: Mutex<Option<DeviceError>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interfaces<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let backend = Self::new();
        for name in names {
            backend.add_interface(name);
        }
        backend
    }

    pub fn add_interface(&self, name: impl Into<String>) {
        self.devices.lock().entry(name.into()).or_default();
    }

    /// Makes every following `list_devices` call fail with `err`, or
    /// succeed again with `None`.
    pub fn set_enumeration_failure(&self, err: Option<DeviceError>) {
        *self.enumeration_failure.lock() = err;
    }

    pub fn simulate_traffic(
        &self,
        iface: &str,
        peer: &str,
        rx_bytes: u64,
        tx_bytes: u64,
    ) -> Result<(), DeviceError> {
        self.with_peer(iface, peer, |cfg| {
            cfg.rx_bytes = cfg.rx_bytes.saturating_add(rx_bytes);
            cfg.tx_bytes = cfg.tx_bytes.saturating_add(tx_bytes);
        })
    }

    pub fn simulate_handshake(&self, iface: &str, peer: &str, timestamp: u64) -> Result<(), DeviceError> {
        self.with_peer(iface, peer, |cfg| cfg.last_handshake = timestamp)
    }

    fn with_peer(
        &self,
        iface: &str,
        peer: &str,
        f: impl FnOnce(&mut PeerConfig),
    ) -> Result<(), DeviceError> {
        let mut devices = self.devices.lock();
        let device = devices.get_mut(iface).ok_or_else(|| no_device(iface))?;
        let cfg = device
            .peers
            .get_mut(peer)
            .ok_or_else(|| DeviceError::new(EINVAL, format!("no such peer: {peer}")))?;
        f(cfg);
        Ok(())
    }
}

fn no_device(iface: &str) -> DeviceError {
    DeviceError::new(ENODEV, format!("no such device: {iface}"))
}

fn parse_key(what: &str, key: &str) -> Result<Key, DeviceError> {
    key.parse()
        .map_err(|err| DeviceError::new(EINVAL, format!("invalid {what} {key:?}: {err}")))
}

/// Rejects the whole update before anything is applied.
fn check_keys(config: &DeviceConfig) -> Result<Option<Key>, DeviceError> {
    let private_key = config
        .private_key
        .as_deref()
        .map(|key| parse_key("private key", key))
        .transpose()?;

    for (public_key, peer) in &config.peers {
        parse_key("peer public key", public_key)?;

        if let Some(psk) = peer.config().and_then(|cfg| cfg.preshared_key.as_deref()) {
            parse_key("preshared key", psk)?;
        }
    }

    Ok(private_key)
}

impl WireguardApi for MemoryBackend {
    fn list_devices(&self) -> Result<Vec<String>, DeviceError> {
        if let Some(err) = self.enumeration_failure.lock().clone() {
            return Err(err);
        }

        Ok(self.devices.lock().keys().cloned().collect())
    }

    fn get_device(&self, iface: &str) -> Result<DeviceConfig, DeviceError> {
        let devices = self.devices.lock();
        let device = devices.get(iface).ok_or_else(|| no_device(iface))?;

        Ok(DeviceConfig {
            name: iface.to_string(),
            private_key: device.private_key.map(|key| key.to_string()),
            public_key: device.private_key.map(|key| key.public_key().to_string()),
            listen_port: Some(device.listen_port),
            fwmark: Some(device.fwmark),
            addresses: device.addresses.clone(),
            replace_peers: false,
            peers: device
                .peers
                .iter()
                .map(|(key, cfg)| (key.clone(), Peer::Configure(cfg.clone())))
                .collect(),
        })
    }

    fn set_device(&self, iface: &str, config: &DeviceConfig) -> Result<(), DeviceError> {
        let private_key = check_keys(config)?;

        let mut devices = self.devices.lock();
        let current = devices.get(iface).ok_or_else(|| no_device(iface))?;
        let mut next = current.clone();

        if private_key.is_some() {
            next.private_key = private_key;
        }
        if let Some(port) = config.listen_port {
            next.listen_port = port;
        }
        if let Some(fwmark) = config.fwmark {
            next.fwmark = fwmark;
        }
        for address in &config.addresses {
            if !next.addresses.contains(address) {
                next.addresses.push(address.clone());
            }
        }

        let existing: Vec<String> = current.peers.keys().cloned().collect();
        for op in config.plan_peers(&existing) {
            match op {
                PeerOp::Remove(key) => {
                    next.peers.remove(key);
                }
                PeerOp::Upsert(key, wanted) => {
                    let entry = next.peers.entry(key.to_string()).or_default();
                    merge_peer(entry, wanted, config.replace_peers);
                }
            }
        }

        log::debug!(
            "memory backend: {iface} now has {} peer(s)",
            next.peers.len()
        );
        devices.insert(iface.to_string(), next);
        Ok(())
    }
}

/// Applies the configured fields of `wanted`; with `replace` every
/// configurable field is overwritten, set or not. Counters are kept.
fn merge_peer(entry: &mut PeerConfig, wanted: &PeerConfig, replace: bool) {
    if replace || wanted.preshared_key.is_some() {
        entry.preshared_key = wanted.preshared_key.clone();
    }
    if replace || wanted.endpoint.is_some() {
        entry.endpoint = wanted.endpoint.clone();
    }
    if replace || wanted.keep_interval.is_some() {
        entry.keep_interval = wanted.keep_interval;
    }
    if replace || !wanted.allowed_ips.is_empty() {
        entry.allowed_ips = wanted.allowed_ips.clone();
    }
}
