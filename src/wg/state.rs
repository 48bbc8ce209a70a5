use serde_json::{Map, Value};

use super::{
    device::DeviceConfig,
    peer::{Peer, PeerConfig},
};

/// Renders a device as a description. Empty strings, zero numbers and
/// empty lists are left out entirely, so a zero `fwmark` or `portListen`
/// reads the same as an unset one. `peers` is always present.
pub fn encode(device: &DeviceConfig) -> Value {
    let mut out = Map::new();

    put_str(&mut out, "publicKey", device.public_key.as_deref());
    put_str(&mut out, "privateKey", device.private_key.as_deref());
    put_uint(&mut out, "portListen", device.listen_port.map(u64::from));
    put_uint(&mut out, "fwmark", device.fwmark.map(u64::from));
    put_strings(&mut out, "Address", &device.addresses);

    if device.replace_peers {
        out.insert("replacePeers".to_string(), Value::Bool(true));
    }

    let peers = device
        .peers
        .iter()
        .map(|(public_key, peer)| (public_key.clone(), encode_peer(peer)))
        .collect();
    out.insert("peers".to_string(), Value::Object(peers));

    Value::Object(out)
}

fn encode_peer(peer: &Peer) -> Value {
    let mut out = Map::new();

    match peer {
        Peer::Remove => {
            out.insert("removeMe".to_string(), Value::Bool(true));
        }
        Peer::Configure(cfg) => encode_peer_config(&mut out, cfg),
    }

    Value::Object(out)
}

fn encode_peer_config(out: &mut Map<String, Value>, cfg: &PeerConfig) {
    put_str(out, "presharedKey", cfg.preshared_key.as_deref());
    put_uint(out, "keepInterval", cfg.keep_interval.map(u64::from));
    put_str(out, "endpoint", cfg.endpoint.as_deref());
    put_strings(out, "allowedIPs", &cfg.allowed_ips);
    put_uint(out, "rxBytes", Some(cfg.rx_bytes));
    put_uint(out, "txBytes", Some(cfg.tx_bytes));
    put_uint(out, "lastHandshake", Some(cfg.last_handshake));
}

fn put_str(out: &mut Map<String, Value>, field: &str, value: Option<&str>) {
    if let Some(value) = value.filter(|v| !v.is_empty()) {
        out.insert(field.to_string(), Value::from(value));
    }
}

fn put_uint(out: &mut Map<String, Value>, field: &str, value: Option<u64>) {
    if let Some(value) = value.filter(|v| *v > 0) {
        out.insert(field.to_string(), Value::from(value));
    }
}

fn put_strings(out: &mut Map<String, Value>, field: &str, values: &[String]) {
    if !values.is_empty() {
        out.insert(field.to_string(), Value::from(values.to_vec()));
    }
}
