//! Command and protocol errors.

use crate::model::Squawk;
use thiserror::Error;

/// Reasons a control command was refused.
///
/// A command that returns one of these has not changed any state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtcError {
    #[error("No aircraft exists with callsign {0}")]
    NoAircraftForCallsign(String),

    #[error("Another controller is already tracking the aircraft")]
    OtherControllerHasTrack,

    #[error("Aircraft is not being handed off to you")]
    NotBeingHandedOffToMe,

    #[error("No controller known with callsign {0}")]
    NoController(String),

    #[error("Cannot hand off to your own position")]
    HandoffToSelf,

    #[error("No flight plan has been filed for the aircraft")]
    NoFlightPlanFiled,

    #[error("Scratchpad may be at most 3 characters")]
    ScratchpadTooLong,

    #[error("Aircraft was cleared for an approach it was not expecting")]
    ClearedForUnexpectedApproach,

    #[error("Unknown approach {0}")]
    UnknownApproach(String),

    #[error("Arrival airport {0} is not known")]
    ArrivalAirportUnknown(String),

    #[error("Unable: {0}")]
    UnableCommand(String),

    #[error("Only signed-in controllers may issue that command")]
    NotController,

    #[error("Automatic squawk codes are only assigned to IFR flights")]
    NonIfrSquawk,

    #[error("No squawk code range is assigned to this position")]
    NoSquawkRange,

    #[error("No free squawk codes between {low} and {high}")]
    NoFreeSquawk { low: Squawk, high: Squawk },

    #[error("Fix {0} is not in the aircraft's route")]
    FixNotInRoute(String),

    #[error("Broadcast messages require a supervisor rating")]
    BroadcastNotPermitted,

    #[error("Not connected")]
    NotConnected,

    #[error("Unknown scenario {0}")]
    UnknownScenario(String),
}

/// A wire line that matched a message tag but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("malformed {tag} message: expected at least {expected} fields, got {got}")]
    MissingField {
        tag: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("malformed {tag} message: bad number {value:?} in {field}")]
    BadNumber {
        tag: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("malformed {tag} message: {reason}")]
    MalformedMessage { tag: &'static str, reason: String },
}

impl ProtocolError {
    pub fn malformed(tag: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            tag,
            reason: reason.into(),
        }
    }
}
