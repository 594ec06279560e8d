//! Error types for the arduscope library.

use thiserror::Error;

/// The main error type for arduscope operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation was cancelled through its slot.
    #[error("I/O operation cancelled")]
    Cancelled,

    /// Operation did not complete in time.
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Low-level communication fault reported by the transport.
    #[error("transport fault: {message}")]
    Transport { message: String },

    /// No device handle is open.
    #[error("not connected")]
    NotConnected,

    /// Device selector string could not be parsed.
    #[error("invalid device selector: {selector}")]
    InvalidSelector { selector: String },

    /// Channel receive error.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns true for faults raised by the serial line itself.
    #[must_use]
    pub const fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            Self::Serial(_) | Self::Io(_) | Self::Timeout { .. } | Self::Transport { .. }
        )
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Why a device could not be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpenFailure {
    /// The user blocked access to the device.
    #[error("access was blocked by the user")]
    DeniedByUser,

    /// The system refused access (usually missing permissions).
    #[error("access was blocked by the system")]
    DeniedBySystem,

    /// Anything else, most commonly the device is open in another process.
    #[error("unknown error, the device may be open in another application")]
    Unknown,
}

/// Result type alias for arduscope operations.
pub type Result<T> = std::result::Result<T, Error>;
