//! Common types for the TRACON environment abstraction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One decoded line received from the wire.
///
/// The transport strips the line terminator; field splitting is left to
/// the message dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireLine {
    /// Raw UTF-8 contents, without the trailing newline
    pub contents: String,

    /// Context wall time at which the line was handed off
    pub received_at: Duration,
}

impl WireLine {
    /// Creates a line received at the given wall time.
    pub fn new(contents: impl Into<String>, received_at: Duration) -> Self {
        Self {
            contents: contents.into(),
            received_at,
        }
    }

    /// Returns the contents length in bytes.
    pub fn len(&self) -> usize {
        self.contents.len()
    }

    /// Returns true for a line with no contents.
    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

impl std::fmt::Display for WireLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.contents)
    }
}
