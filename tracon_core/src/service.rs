//! The ATC command surface shared by both session backends.
//!
//! `LocalSim` applies commands to its own simulated traffic;
//! `ProtocolAdapter` applies them to traffic mirrored from a network
//! server and forwards them on the wire. Both gate commands with the
//! ownership predicates below, so the same sequence of commands leaves the
//! same tracking and handoff state on either backend.

use crate::clock::SimTime;
use crate::error::AtcError;
use crate::model::{Aircraft, Controller, FlightPlan, Metar, Squawk, TurnDirection, MAX_SCRATCHPAD_LEN};

/// Commands a signed-in controller can issue, and the state they act on.
///
/// The requester of every command is the session's own controller
/// (`callsign()`).
pub trait CommandService {
    /// The session's signed-in controller.
    fn callsign(&self) -> &str;

    fn get_aircraft(&self, callsign: &str) -> Option<&Aircraft>;
    fn get_all_aircraft(&self) -> Vec<&Aircraft>;
    fn get_controller(&self, callsign: &str) -> Option<&Controller>;
    fn get_all_controllers(&self) -> Vec<&Controller>;
    fn get_metar(&self, airport: &str) -> Option<&Metar>;

    fn initiate_track(&mut self, callsign: &str) -> Result<(), AtcError>;
    fn drop_track(&mut self, callsign: &str) -> Result<(), AtcError>;
    fn handoff(&mut self, callsign: &str, controller: &str) -> Result<(), AtcError>;
    fn accept_handoff(&mut self, callsign: &str) -> Result<(), AtcError>;
    fn reject_handoff(&mut self, callsign: &str) -> Result<(), AtcError>;
    fn cancel_handoff(&mut self, callsign: &str) -> Result<(), AtcError>;

    fn set_squawk(&mut self, callsign: &str, squawk: Squawk) -> Result<(), AtcError>;
    fn set_squawk_automatic(&mut self, callsign: &str) -> Result<Squawk, AtcError>;
    fn set_scratchpad(&mut self, callsign: &str, scratchpad: &str) -> Result<(), AtcError>;
    fn set_temporary_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError>;
    fn amend_flight_plan(&mut self, callsign: &str, plan: FlightPlan) -> Result<(), AtcError>;

    /// Sends text to `to`, or to everyone when `to` is `None`.
    fn send_text_message(&mut self, to: Option<&str>, message: &str) -> Result<(), AtcError>;

    fn connected(&self) -> bool;
    fn disconnect(&mut self);
    fn current_time(&self) -> SimTime;

    /// Runs one session tick; called from the host loop.
    fn update(&mut self);
}

/// Instructions spoken to simulated pilots.
pub trait PilotControl {
    fn assign_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError>;

    /// Heading `None` cancels the assignment and resumes the route.
    fn assign_heading(
        &mut self,
        callsign: &str,
        heading: Option<i32>,
        turn: Option<TurnDirection>,
    ) -> Result<(), AtcError>;

    fn turn_left(&mut self, callsign: &str, degrees: i32) -> Result<(), AtcError>;
    fn turn_right(&mut self, callsign: &str, degrees: i32) -> Result<(), AtcError>;

    /// Speed 0 cancels speed restrictions.
    fn assign_speed(&mut self, callsign: &str, speed: i32) -> Result<(), AtcError>;

    fn direct_fix(&mut self, callsign: &str, fix: &str) -> Result<(), AtcError>;
    fn expect_approach(&mut self, callsign: &str, approach: &str) -> Result<(), AtcError>;

    /// Returns `Ok(false)` when the pilot needs a heading or direct routing
    /// before accepting the clearance.
    fn cleared_approach(&mut self, callsign: &str, approach: &str) -> Result<bool, AtcError>;

    fn delete_aircraft(&mut self, callsign: &str) -> Result<(), AtcError>;

    /// Human-readable summary of the aircraft's state and assignments.
    fn describe(&self, callsign: &str) -> Result<String, AtcError>;
}

impl<S: CommandService + ?Sized> CommandService for Box<S> {
    fn callsign(&self) -> &str {
        (**self).callsign()
    }
    fn get_aircraft(&self, callsign: &str) -> Option<&Aircraft> {
        (**self).get_aircraft(callsign)
    }
    fn get_all_aircraft(&self) -> Vec<&Aircraft> {
        (**self).get_all_aircraft()
    }
    fn get_controller(&self, callsign: &str) -> Option<&Controller> {
        (**self).get_controller(callsign)
    }
    fn get_all_controllers(&self) -> Vec<&Controller> {
        (**self).get_all_controllers()
    }
    fn get_metar(&self, airport: &str) -> Option<&Metar> {
        (**self).get_metar(airport)
    }
    fn initiate_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        (**self).initiate_track(callsign)
    }
    fn drop_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        (**self).drop_track(callsign)
    }
    fn handoff(&mut self, callsign: &str, controller: &str) -> Result<(), AtcError> {
        (**self).handoff(callsign, controller)
    }
    fn accept_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        (**self).accept_handoff(callsign)
    }
    fn reject_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        (**self).reject_handoff(callsign)
    }
    fn cancel_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        (**self).cancel_handoff(callsign)
    }
    fn set_squawk(&mut self, callsign: &str, squawk: Squawk) -> Result<(), AtcError> {
        (**self).set_squawk(callsign, squawk)
    }
    fn set_squawk_automatic(&mut self, callsign: &str) -> Result<Squawk, AtcError> {
        (**self).set_squawk_automatic(callsign)
    }
    fn set_scratchpad(&mut self, callsign: &str, scratchpad: &str) -> Result<(), AtcError> {
        (**self).set_scratchpad(callsign, scratchpad)
    }
    fn set_temporary_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError> {
        (**self).set_temporary_altitude(callsign, altitude)
    }
    fn amend_flight_plan(&mut self, callsign: &str, plan: FlightPlan) -> Result<(), AtcError> {
        (**self).amend_flight_plan(callsign, plan)
    }
    fn send_text_message(&mut self, to: Option<&str>, message: &str) -> Result<(), AtcError> {
        (**self).send_text_message(to, message)
    }
    fn connected(&self) -> bool {
        (**self).connected()
    }
    fn disconnect(&mut self) {
        (**self).disconnect()
    }
    fn current_time(&self) -> SimTime {
        (**self).current_time()
    }
    fn update(&mut self) {
        (**self).update()
    }
}

// ============================================================================
// OWNERSHIP PREDICATES
// ============================================================================

pub(crate) fn lookup<'a>(
    aircraft: Option<&'a Aircraft>,
    callsign: &str,
) -> Result<&'a Aircraft, AtcError> {
    aircraft.ok_or_else(|| AtcError::NoAircraftForCallsign(callsign.to_string()))
}

/// Only untracked aircraft can be picked up.
pub fn check_untracked(ac: &Aircraft) -> Result<(), AtcError> {
    match ac.tracking_controller {
        None => Ok(()),
        Some(_) => Err(AtcError::OtherControllerHasTrack),
    }
}

pub fn check_tracked_by(ac: &Aircraft, me: &str) -> Result<(), AtcError> {
    if ac.is_tracked_by(me) {
        Ok(())
    } else {
        Err(AtcError::OtherControllerHasTrack)
    }
}

pub fn check_offered_to(ac: &Aircraft, me: &str) -> Result<(), AtcError> {
    if ac.is_offered_to(me) {
        Ok(())
    } else {
        Err(AtcError::NotBeingHandedOffToMe)
    }
}

pub fn check_scratchpad(scratchpad: &str) -> Result<(), AtcError> {
    if scratchpad.chars().count() > MAX_SCRATCHPAD_LEN {
        Err(AtcError::ScratchpadTooLong)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tracked(by: Option<&str>) -> Aircraft {
        let mut ac = Aircraft::new("ASA12", SimTime::ZERO);
        ac.tracking_controller = by.map(str::to_string);
        ac
    }

    #[test]
    fn test_untracked_predicate() {
        assert!(check_untracked(&tracked(None)).is_ok());
        assert_eq!(
            check_untracked(&tracked(Some("SEA_CTR"))),
            Err(AtcError::OtherControllerHasTrack)
        );
    }

    #[test]
    fn test_tracked_by_predicate() {
        let ac = tracked(Some("SEA_APP"));
        assert!(check_tracked_by(&ac, "SEA_APP").is_ok());
        assert_eq!(check_tracked_by(&ac, "SEA_DEP"), Err(AtcError::OtherControllerHasTrack));
        assert!(check_tracked_by(&tracked(None), "SEA_APP").is_err());
    }

    #[test]
    fn test_offered_predicate() {
        let mut ac = tracked(Some("SEA_CTR"));
        assert_eq!(check_offered_to(&ac, "SEA_APP"), Err(AtcError::NotBeingHandedOffToMe));
        ac.inbound_handoff_controller = Some("SEA_APP".into());
        assert!(check_offered_to(&ac, "SEA_APP").is_ok());
        assert!(check_offered_to(&ac, "SEA_DEP").is_err());
    }

    proptest! {
        #[test]
        fn test_scratchpad_length_limit(s in "\\PC{0,8}") {
            let result = check_scratchpad(&s);
            if s.chars().count() > MAX_SCRATCHPAD_LEN {
                prop_assert_eq!(result, Err(AtcError::ScratchpadTooLong));
            } else {
                prop_assert!(result.is_ok());
            }
        }
    }
}
