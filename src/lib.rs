//! Marshals loosely typed WireGuard descriptions to and from devices,
//! running each device call off the caller's context.

pub mod bridge;
pub mod error;
pub mod task;
pub mod wg;

pub use bridge::Bridge;
pub use error::{DeviceError, Error, ValidationError};
pub use task::{Stage, Task};
pub use wg::{
    Key, MAX_INTERFACE_NAME_LEN, WireguardApi,
    cmd::WgCmdBackend,
    config::decode,
    device::{DeviceConfig, DeviceConfigBuilder, PeerOp},
    memory::MemoryBackend,
    peer::{Peer, PeerConfig},
    state::encode,
};
