//! Error types for the TRACON environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The transport has been closed (locally or by the remote end)
    #[error("Transport closed")]
    TransportClosed,

    /// The bounded hand-off channel has no room left
    #[error("Channel full: {0}")]
    ChannelFull(String),

    /// Underlying stream I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a channel-full error.
    pub fn channel_full(line: impl Into<String>) -> Self {
        Self::ChannelFull(line.into())
    }
}
