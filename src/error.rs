//! Error types for the printer bridge

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// No candidate device at all. The count is whatever the host
    /// enumerated, so an empty bus reports zero.
    #[error("no printer found ({scanned} USB devices present)")]
    NoDevicesFound { scanned: usize },

    #[error("no interface with a bulk OUT endpoint on this device")]
    NoEndpointFound,

    /// Every claim strategy failed. At this point only a physical
    /// replug reliably frees the interface.
    #[error("could not claim printer interface; unplug and reconnect the device")]
    ClaimFailed,

    #[error("USB permission denied")]
    PermissionDenied,

    #[error("printer not connected")]
    NotConnected,

    #[error("bulk transfer failed (code {code})")]
    TransferFailed { code: i32 },

    #[error("printer was detached")]
    DeviceDetached,

    #[error("failed to open USB device")]
    OpenFailed,

    #[error("connection failed after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("another connect is already in progress")]
    Busy,

    #[error("text encoding failed: {0}")]
    Encoding(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
