use std::{
    ffi::{OsStr, OsString},
    io::Write,
    num::ParseIntError,
    path::PathBuf,
    str::FromStr,
};

use tempfile::NamedTempFile;

use super::{
    WireguardApi,
    device::{DeviceConfig, PeerOp},
    peer::{Peer, PeerConfig},
};
use crate::error::DeviceError;

const DEFAULT_WG: &str = "wg";
const DEFAULT_IP: &str = "ip";
const NONE: &str = "(none)";
const OFF: &str = "off";

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("empty dump")]
    Empty,

    #[error("expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },

    #[error("int parse error: {0}")]
    ParseIntError(#[from] ParseIntError),
}

impl From<DumpError> for DeviceError {
    fn from(err: DumpError) -> Self {
        DeviceError::new(-1, format!("unexpected wg output: {err}"))
    }
}

/// Drives the kernel through the `wg(8)` and `ip(8)` tools.
#[derive(Debug, Clone)]
pub struct WgCmdBackend {
    wg: String,
    ip: String,
}

impl Default for WgCmdBackend {
    fn default() -> Self {
        Self::with_paths(
            std::env::var("WG_BRIDGE_WG").unwrap_or_else(|_| DEFAULT_WG.into()),
            std::env::var("WG_BRIDGE_IP").unwrap_or_else(|_| DEFAULT_IP.into()),
        )
    }
}

impl WgCmdBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_paths(wg: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            wg: wg.into(),
            ip: ip.into(),
        }
    }

    fn run<I, S>(&self, program: &str, args: I) -> Result<String, DeviceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
        log::debug!("running {program} {args:?}");

        let out = std::process::Command::new(program).args(&args).output()?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{program} exited with {}", out.status)
            } else {
                stderr
            };
            return Err(DeviceError::new(out.status.code().unwrap_or(-1), message));
        }

        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    fn peer_keys(&self, iface: &str) -> Result<Vec<String>, DeviceError> {
        let out = self.run(&self.wg, ["show", iface, "peers"])?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }
}

impl WireguardApi for WgCmdBackend {
    fn list_devices(&self) -> Result<Vec<String>, DeviceError> {
        let out = self.run(&self.wg, ["show", "interfaces"])?;
        Ok(out.split_whitespace().map(str::to_string).collect())
    }

    fn get_device(&self, iface: &str) -> Result<DeviceConfig, DeviceError> {
        let dump = self.run(&self.wg, ["show", iface, "dump"])?;
        let mut device = parse_dump(iface, &dump)?;

        let addrs = self.run(&self.ip, ["-o", "address", "show", "dev", iface])?;
        device.addresses = parse_addresses(&addrs);

        Ok(device)
    }

    fn set_device(&self, iface: &str, config: &DeviceConfig) -> Result<(), DeviceError> {
        let existing = if config.replace_peers {
            self.peer_keys(iface)?
        } else {
            Vec::new()
        };

        // Key files have to outlive the `wg set` call.
        let mut key_files = Vec::new();
        let args = set_args(iface, config, &existing, &mut |secret| {
            let file = key_file(secret)?;
            let path = file.path().to_path_buf();
            key_files.push(file);
            Ok(path)
        })?;

        self.run(&self.wg, &args)?;
        drop(key_files);

        for address in &config.addresses {
            self.run(&self.ip, ["address", "replace", address.as_str(), "dev", iface])?;
        }

        Ok(())
    }
}

fn key_file(secret: &str) -> Result<NamedTempFile, DeviceError> {
    let mut file = NamedTempFile::new()?;
    writeln!(file, "{secret}")?;
    file.flush()?;
    Ok(file)
}

/// Arguments for a single `wg set` call. `secret_path` stores a key
/// somewhere `wg` can read it and returns that path.
fn set_args(
    iface: &str,
    config: &DeviceConfig,
    existing: &[String],
    secret_path: &mut dyn FnMut(&str) -> Result<PathBuf, DeviceError>,
) -> Result<Vec<OsString>, DeviceError> {
    let mut args: Vec<OsString> = vec!["set".into(), iface.into()];

    if let Some(key) = &config.private_key {
        args.push("private-key".into());
        args.push(secret_path(key)?.into());
    }
    if let Some(port) = config.listen_port {
        args.push("listen-port".into());
        args.push(port.to_string().into());
    }
    if let Some(fwmark) = config.fwmark {
        args.push("fwmark".into());
        args.push(fwmark.to_string().into());
    }

    let replace = config.replace_peers;
    for op in config.plan_peers(existing) {
        match op {
            PeerOp::Remove(key) => {
                args.push("peer".into());
                args.push(key.into());
                args.push("remove".into());
            }
            PeerOp::Upsert(key, peer) => {
                args.push("peer".into());
                args.push(key.into());

                let psk = match &peer.preshared_key {
                    Some(psk) => Some(secret_path(psk)?.into()),
                    None if replace => Some("/dev/null".into()),
                    None => None,
                };
                if let Some(psk) = psk {
                    args.push("preshared-key".into());
                    args.push(psk);
                }

                if let Some(endpoint) = &peer.endpoint {
                    args.push("endpoint".into());
                    args.push(endpoint.into());
                }

                let keepalive = match peer.keep_interval {
                    Some(secs) => Some(secs.to_string()),
                    None if replace => Some(OFF.to_string()),
                    None => None,
                };
                if let Some(keepalive) = keepalive {
                    args.push("persistent-keepalive".into());
                    args.push(keepalive.into());
                }

                if replace || !peer.allowed_ips.is_empty() {
                    args.push("allowed-ips".into());
                    args.push(peer.allowed_ips.join(",").into());
                }
            }
        }
    }

    Ok(args)
}

fn optional(field: &str) -> Option<String> {
    match field {
        "" | NONE | OFF => None,
        value => Some(value.to_string()),
    }
}

// `off` and empty fields read as zero
fn number<T>(field: &str) -> Result<T, DumpError>
where
    T: FromStr<Err = ParseIntError> + Default,
{
    match field {
        "" | OFF => Ok(T::default()),
        value => Ok(value.parse()?),
    }
}

// `wg` prints a set fwmark as hex
fn fwmark(field: &str) -> Result<u32, DumpError> {
    match field.strip_prefix("0x") {
        Some(hex) => Ok(u32::from_str_radix(hex, 16)?),
        None => number(field),
    }
}

fn fields(line: &str, expected: usize) -> Result<Vec<&str>, DumpError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != expected {
        return Err(DumpError::FieldCount {
            expected,
            got: fields.len(),
        });
    }
    Ok(fields)
}

/// Parses `wg show <iface> dump`: one interface line, then one line per
/// peer, all tab separated.
pub fn parse_dump(iface: &str, dump: &str) -> Result<DeviceConfig, DumpError> {
    let mut lines = dump.lines().filter(|line| !line.trim().is_empty());
    let head = fields(lines.next().ok_or(DumpError::Empty)?, 4)?;

    let mut device = DeviceConfig {
        name: iface.to_string(),
        private_key: optional(head[0]),
        public_key: optional(head[1]),
        listen_port: Some(number(head[2])?),
        fwmark: Some(fwmark(head[3])?),
        ..Default::default()
    };

    for line in lines {
        let f = fields(line, 8)?;
        let allowed_ips: Vec<String> = optional(f[3])
            .map(|ips| ips.split(',').map(|ip| ip.trim().to_string()).collect())
            .unwrap_or_default();

        let peer = PeerConfig {
            preshared_key: optional(f[1]),
            endpoint: optional(f[2]),
            allowed_ips,
            last_handshake: number(f[4])?,
            rx_bytes: number(f[5])?,
            tx_bytes: number(f[6])?,
            keep_interval: Some(number::<u16>(f[7])?).filter(|secs| *secs > 0),
        };

        device.peers.insert(f[0].to_string(), Peer::Configure(peer));
    }

    Ok(device)
}

/// Picks the CIDRs out of `ip -o address show` output.
pub fn parse_addresses(out: &str) -> Vec<String> {
    out.lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            tokens.find(|t| *t == "inet" || *t == "inet6")?;
            tokens.next().map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "cHJpdmF0ZQ==\tcHVibGlj\t51820\toff
cGVlckE=\t(none)\t203.0.113.5:51820\t10.0.0.2/32,192.168.0.0/24\t1659054870\t1024\t2048\t25
cGVlckI=\tcHNr\t(none)\t(none)\t0\t0\t0\toff
";

    #[test]
    fn test_parse_dump() {
        let device = parse_dump("wg0", DUMP).unwrap();

        assert_eq!(device.name, "wg0");
        assert_eq!(device.private_key.as_deref(), Some("cHJpdmF0ZQ=="));
        assert_eq!(device.public_key.as_deref(), Some("cHVibGlj"));
        assert_eq!(device.listen_port, Some(51820));
        assert_eq!(device.fwmark, Some(0));
        assert_eq!(device.peers.len(), 2);

        assert_eq!(
            device.peers["cGVlckE="],
            Peer::Configure(PeerConfig {
                preshared_key: None,
                endpoint: Some("203.0.113.5:51820".to_string()),
                allowed_ips: vec!["10.0.0.2/32".to_string(), "192.168.0.0/24".to_string()],
                keep_interval: Some(25),
                rx_bytes: 1024,
                tx_bytes: 2048,
                last_handshake: 1659054870,
            })
        );
        assert_eq!(
            device.peers["cGVlckI="],
            Peer::Configure(PeerConfig {
                preshared_key: Some("cHNr".to_string()),
                ..Default::default()
            })
        );
    }

    #[test]
    fn test_parse_dump_unprivileged() {
        let device = parse_dump("wg0", "(none)\tcHVibGlj\t0\t0x1234\n").unwrap();
        assert_eq!(device.private_key, None);
        assert_eq!(device.fwmark, Some(4660));
        assert!(device.peers.is_empty());
    }

    #[test]
    fn test_parse_dump_malformed() {
        assert!(matches!(parse_dump("wg0", ""), Err(DumpError::Empty)));
        assert!(matches!(
            parse_dump("wg0", "a\tb\tport\toff\n"),
            Err(DumpError::ParseIntError(_))
        ));
        assert!(matches!(
            parse_dump("wg0", "a\tb\n"),
            Err(DumpError::FieldCount { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn test_parse_addresses() {
        let out = "5: wg0    inet 10.0.0.1/24 scope global wg0\\       valid_lft forever preferred_lft forever
5: wg0    inet6 fd00::1/64 scope global \\       valid_lft forever preferred_lft forever
";
        assert_eq!(parse_addresses(out), vec!["10.0.0.1/24", "fd00::1/64"]);
        assert!(parse_addresses("").is_empty());
    }

    fn args_of(config: &DeviceConfig, existing: &[String]) -> Vec<String> {
        let mut n = 0;
        set_args("wg0", config, existing, &mut |_| {
            n += 1;
            Ok(PathBuf::from(format!("/tmp/key{n}")))
        })
        .unwrap()
        .into_iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
    }

    #[test]
    fn test_set_args_merge() {
        let config = DeviceConfig::builder("wg0")
            .private_key("priv")
            .listen_port(51820)
            .peer("gone", Peer::Remove)
            .peer(
                "peerA",
                PeerConfig {
                    preshared_key: Some("psk".to_string()),
                    endpoint: Some("1.2.3.4:51820".to_string()),
                    allowed_ips: vec!["10.0.0.2/32".to_string(), "10.0.1.0/24".to_string()],
                    keep_interval: Some(25),
                    ..Default::default()
                },
            )
            .peer("peerB", PeerConfig::default())
            .build();

        assert_eq!(
            args_of(&config, &[]),
            vec![
                "set", "wg0", "private-key", "/tmp/key1", "listen-port", "51820", "peer", "gone",
                "remove", "peer", "peerA", "preshared-key", "/tmp/key2", "endpoint",
                "1.2.3.4:51820", "persistent-keepalive", "25", "allowed-ips",
                "10.0.0.2/32,10.0.1.0/24", "peer", "peerB",
            ]
        );
    }

    #[test]
    fn test_set_args_replace() {
        let config = DeviceConfig::builder("wg0")
            .private_key("priv")
            .fwmark(0)
            .replace_peers(true)
            .peer("keep", PeerConfig::default())
            .build();
        let existing = vec!["keep".to_string(), "old".to_string()];

        assert_eq!(
            args_of(&config, &existing),
            vec![
                "set", "wg0", "private-key", "/tmp/key1", "fwmark", "0", "peer", "old", "remove",
                "peer", "keep", "preshared-key", "/dev/null", "persistent-keepalive", "off",
                "allowed-ips", "",
            ]
        );
    }
}
