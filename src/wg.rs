use base64::prelude::*;
use std::str::FromStr;

use device::DeviceConfig;

use crate::error::{DeviceError, ValidationError};

pub mod cmd;
pub mod config;
pub mod device;
pub mod memory;
pub mod peer;
pub mod state;

pub const KEY_LEN: usize = 32;

/// Linux `IFNAMSIZ` minus the trailing NUL.
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("key must be 32 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl FromStr for Key {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = BASE64_STANDARD.decode(s.trim())?;
        let inner: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|bytes: Vec<u8>| KeyError::Length(bytes.len()))?;

        Ok(Key(inner))
    }
}

impl Key {
    pub fn random() -> Key {
        Key(rand::random())
    }

    /// Fresh Curve25519 private key, clamped the way `wg genkey` stores it.
    pub fn generate_private() -> Key {
        let mut key = Self::random();
        key.0[0] &= 248;
        key.0[31] &= 127;
        key.0[31] |= 64;
        key
    }

    /// Public half of this key, treating it as a private key.
    pub fn public_key(&self) -> Key {
        let secret = x25519_dalek::StaticSecret::from(self.0);
        Key(x25519_dalek::PublicKey::from(&secret).to_bytes())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

/// Checks an interface name against the platform's naming rules.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ValidationError::NameTooLong {
            name: name.to_string(),
            max: MAX_INTERFACE_NAME_LEN,
        });
    }

    if name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace())
    {
        return Err(ValidationError::InvalidName(name.to_string()));
    }

    Ok(())
}

/// Device control surface. Every call may block for as long as the
/// kernel or userspace implementation takes.
pub trait WireguardApi: Send + Sync + 'static {
    fn list_devices(&self) -> Result<Vec<String>, DeviceError>;
    fn get_device(&self, iface: &str) -> Result<DeviceConfig, DeviceError>;
    fn set_device(&self, iface: &str, device: &DeviceConfig) -> Result<(), DeviceError>;
}
