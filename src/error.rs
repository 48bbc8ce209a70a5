/// Problems found in a description before anything reaches the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing privateKey")]
    MissingPrivateKey,

    #[error("interface name is required")]
    EmptyName,

    #[error("interface name is too long: {name} (max {max})")]
    NameTooLong { name: String, max: usize },

    #[error("interface name is invalid: {0:?}")]
    InvalidName(String),
}

/// Failure reported by the device control surface, carried as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct DeviceError {
    pub code: i32,
    pub message: String,
}

impl DeviceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for DeviceError {
    fn from(err: std::io::Error) -> Self {
        DeviceError::new(err.raw_os_error().unwrap_or(-1), err.to_string())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("device operation failed: {0}")]
    ExternalOperation(DeviceError),

    #[error("interface enumeration failed: {0}")]
    Enumeration(DeviceError),

    #[error("worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl Error {
    /// Code reported by the device API, if the failure came from there.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::ExternalOperation(err) | Error::Enumeration(err) => Some(err.code),
            _ => None,
        }
    }
}
