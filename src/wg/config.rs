use serde_json::{Map, Value};

use super::{
    device::DeviceConfig,
    peer::{Peer, PeerConfig},
    validate_name,
};
use crate::error::ValidationError;

/// Turns a loosely typed description into a [`DeviceConfig`] for `name`.
///
/// Every field except `privateKey` is optional, and a field carrying the
/// wrong type is treated as if it were absent. A missing or non-string
/// `privateKey` (or a bad interface name) is the only way this fails.
pub fn decode(name: &str, description: &Value) -> Result<DeviceConfig, ValidationError> {
    validate_name(name)?;

    let empty = Map::new();
    let fields = description.as_object().unwrap_or(&empty);

    let private_key = string(fields.get("privateKey")).ok_or(ValidationError::MissingPrivateKey)?;
    let mut builder = DeviceConfig::builder(name).private_key(private_key);

    if let Some(key) = string(fields.get("publicKey")) {
        builder = builder.public_key(key);
    }

    if let Some(port) = positive::<u16>(fields.get("portListen")) {
        builder = builder.listen_port(port);
    }

    if let Some(fwmark) = uint(fields.get("fwmark")).and_then(|v| u32::try_from(v).ok()) {
        builder = builder.fwmark(fwmark);
    }

    let addresses = strings(fields.get("Address")).or_else(|| strings(fields.get("addresses")));
    for address in addresses.unwrap_or_default() {
        builder = builder.address(address);
    }

    if let Some(replace) = fields.get("replacePeers").and_then(Value::as_bool) {
        builder = builder.replace_peers(replace);
    }

    if let Some(peers) = fields.get("peers").and_then(Value::as_object) {
        for (public_key, entry) in peers {
            if let Some(entry) = entry.as_object() {
                builder = builder.peer(public_key.as_str(), decode_peer(entry));
            }
        }
    }

    Ok(builder.build())
}

fn decode_peer(entry: &Map<String, Value>) -> Peer {
    if entry.get("removeMe").and_then(Value::as_bool) == Some(true) {
        return Peer::Remove;
    }

    Peer::Configure(PeerConfig {
        preshared_key: string(entry.get("presharedKey")),
        endpoint: string(entry.get("endpoint")),
        allowed_ips: strings(entry.get("allowedIPs")).unwrap_or_default(),
        keep_interval: positive::<u16>(entry.get("keepInterval")),
        ..Default::default()
    })
}

fn string(value: Option<&Value>) -> Option<String> {
    value?.as_str().map(str::to_string)
}

// Non-string items are skipped
fn strings(value: Option<&Value>) -> Option<Vec<String>> {
    let items = value?.as_array()?;
    Some(
        items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
    )
}

/// Non-negative number, fractional part dropped.
fn uint(value: Option<&Value>) -> Option<u64> {
    let Value::Number(number) = value? else {
        return None;
    };

    number.as_u64().or_else(|| {
        number
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.trunc() as u64)
    })
}

fn positive<T: TryFrom<u64>>(value: Option<&Value>) -> Option<T> {
    uint(value)
        .filter(|v| *v > 0)
        .and_then(|v| T::try_from(v).ok())
}
