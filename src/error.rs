//! Error types for the messenger core.

use thiserror::Error;

/// Errors that can occur in the messaging and dispatch core.
#[derive(Error, Debug)]
pub enum MessengerError {
    /// Failed to serialize or deserialize a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A frame exceeds the maximum allowed size.
    #[error("frame too large: {size} bytes (max {max} bytes)")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Transport-level I/O error.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Could not establish the outbound link to a peer.
    #[error("connection failed to peer {peer} at {addr}: {reason}")]
    ConnectionFailed {
        /// The peer the link was meant for.
        peer: usize,
        /// The address that was dialed.
        addr: String,
        /// Last I/O failure observed.
        reason: String,
    },

    /// A delivery queue's consumer side is gone.
    #[error("dispatch channel closed")]
    ChannelClosed,

    /// An unrecognised scenario name in configuration.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
}

/// Convenience result type for messenger operations.
pub type Result<T> = std::result::Result<T, MessengerError>;

/// Terminate the process after logging the cause.
///
/// Wire I/O and decode errors on the hot path are protocol-level bugs, not
/// Byzantine noise, and the process does not attempt to outlive them.
pub(crate) fn fatal(context: &str, err: &MessengerError) -> ! {
    log::error!("{context}: {err}");
    std::process::exit(1);
}
