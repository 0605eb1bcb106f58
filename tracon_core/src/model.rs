//! Session data model: aircraft, flight plans, controllers and feeds.

use crate::clock::SimTime;
use crate::scenario::{AircraftPerformance, Approach, Waypoint};
use geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Longest scratchpad a data tag can show.
pub const MAX_SCRATCHPAD_LEN: usize = 3;

/// Radar history kept per aircraft.
pub const MAX_RADAR_TRACKS: usize = 10;

// ============================================================================
// SQUAWK
// ============================================================================

/// Transponder code, shown as four octal digits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Squawk(pub u16);

impl Squawk {
    pub const MAX: Squawk = Squawk(0o7777);
}

impl fmt::Display for Squawk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl FromStr for Squawk {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = u16::from_str_radix(s, 8).map_err(|e| format!("{}: {}", s, e))?;
        if code > Squawk::MAX.0 {
            return Err(format!("{}: out of range", s));
        }
        Ok(Squawk(code))
    }
}

// ============================================================================
// FLIGHT PLAN
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlightRules {
    #[default]
    Ifr,
    Vfr,
}

impl FlightRules {
    pub fn wire_code(&self) -> &'static str {
        match self {
            FlightRules::Ifr => "I",
            FlightRules::Vfr => "V",
        }
    }

    pub fn from_wire(code: &str) -> Option<Self> {
        match code {
            "I" => Some(FlightRules::Ifr),
            "V" => Some(FlightRules::Vfr),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightPlan {
    pub rules: FlightRules,

    /// Type with optional weight-class prefix, e.g. `H/B77W`
    pub aircraft_type: String,

    /// Filed true airspeed (knots)
    pub tas: i32,

    pub departure_airport: String,

    /// Filed cruise altitude (feet)
    pub altitude: i32,

    pub arrival_airport: String,
    pub alternate_airport: String,
    pub route: String,
    pub remarks: String,
}

impl FlightPlan {
    /// Aircraft type with weight-class prefix and equipment suffix removed.
    pub fn base_type(&self) -> &str {
        let ty = match self.aircraft_type.split_once('/') {
            Some((prefix, rest)) if prefix.len() == 1 => rest,
            _ => &self.aircraft_type,
        };
        ty.split('/').next().unwrap_or(ty)
    }
}

// ============================================================================
// CONTROLLERS, PILOTS, WEATHER
// ============================================================================

/// Network controller rating.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NetworkRating {
    Observer = 1,
    Student1 = 2,
    Student2 = 3,
    Student3 = 4,
    #[default]
    Controller1 = 5,
    Controller2 = 6,
    Controller3 = 7,
    Instructor1 = 8,
    Instructor2 = 9,
    Instructor3 = 10,
    Supervisor = 11,
    Administrator = 12,
}

impl NetworkRating {
    pub fn from_wire(value: u8) -> Option<Self> {
        use NetworkRating::*;
        Some(match value {
            1 => Observer,
            2 => Student1,
            3 => Student2,
            4 => Student3,
            5 => Controller1,
            6 => Controller2,
            7 => Controller3,
            8 => Instructor1,
            9 => Instructor2,
            10 => Instructor3,
            11 => Supervisor,
            12 => Administrator,
            _ => return None,
        })
    }

    pub fn wire_value(&self) -> u8 {
        *self as u8
    }

    pub fn can_broadcast(&self) -> bool {
        *self >= NetworkRating::Supervisor
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Controller {
    pub callsign: String,
    pub name: String,
    pub cid: String,
    pub rating: NetworkRating,
    pub facility: String,
    pub frequency: String,

    /// Visibility range (nm)
    pub scope_range: i32,

    pub sector_id: String,

    /// Squawk codes handed out are in `[low_squawk, high_squawk)`.
    /// Equal bounds mean no range is assigned.
    pub low_squawk: Squawk,
    pub high_squawk: Squawk,

    pub location: Option<Point<f64>>,
}

impl Controller {
    pub fn new(callsign: impl Into<String>) -> Self {
        Self {
            callsign: callsign.into(),
            ..Default::default()
        }
    }

    pub fn has_squawk_range(&self) -> bool {
        self.low_squawk < self.high_squawk
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pilot {
    pub callsign: String,
    pub name: String,
    pub cid: String,
    pub rating: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metar {
    pub airport: String,

    /// e.g. `17008G15KT`
    pub wind: String,

    /// e.g. `A3001`
    pub altimeter: String,

    pub raw: String,
}

impl Metar {
    /// Picks the station, wind and altimeter groups out of a raw report.
    ///
    /// Returns `None` if the report has no station identifier.
    pub fn parse(raw: &str) -> Option<Metar> {
        let mut tokens = raw.split_whitespace();
        let airport = tokens.next()?.to_string();
        let mut metar = Metar {
            airport,
            raw: raw.trim().to_string(),
            ..Default::default()
        };
        for token in tokens {
            if token.ends_with("KT") && metar.wind.is_empty() {
                metar.wind = token.to_string();
            } else if token.len() == 5
                && token.starts_with('A')
                && token[1..].bytes().all(|b| b.is_ascii_digit())
            {
                metar.altimeter = token.to_string();
            }
        }
        Some(metar)
    }
}

// ============================================================================
// AIRCRAFT
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransponderMode {
    Standby,
    #[default]
    Charlie,
    Ident,
}

impl TransponderMode {
    pub fn wire_code(&self) -> char {
        match self {
            TransponderMode::Standby => 'S',
            TransponderMode::Charlie => 'N',
            TransponderMode::Ident => 'Y',
        }
    }

    pub fn from_wire(code: char) -> Option<Self> {
        match code {
            'S' => Some(TransponderMode::Standby),
            'N' => Some(TransponderMode::Charlie),
            'Y' => Some(TransponderMode::Ident),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnDirection {
    Left,
    Right,
}

/// One radar return.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarTrack {
    pub position: Point<f64>,
    pub altitude: i32,
    pub groundspeed: i32,
    pub heading: f64,
    pub time: SimTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aircraft {
    pub callsign: String,

    // Kinematic state
    pub position: Point<f64>,
    /// Feet MSL
    pub altitude: f64,
    /// Magnetic heading (degrees)
    pub heading: f64,
    /// Indicated airspeed (knots)
    pub ias: f64,
    /// Ground speed (knots)
    pub gs: f64,

    // Assignments and restrictions
    pub assigned_altitude: Option<i32>,
    pub assigned_speed: Option<i32>,
    pub assigned_heading: Option<i32>,
    pub turn_direction: Option<TurnDirection>,
    pub crossing_altitude: Option<i32>,
    pub crossing_speed: Option<i32>,
    /// Altitude to assign once the pending speed is reached
    pub altitude_after_speed: Option<i32>,
    /// Speed to assign once the pending altitude is reached
    pub speed_after_altitude: Option<i32>,
    pub temporary_altitude: Option<i32>,

    pub flight_plan: Option<FlightPlan>,

    // Control state
    pub tracking_controller: Option<String>,
    /// Controller the aircraft is being handed off to by its tracker
    pub outbound_handoff_controller: Option<String>,
    /// Controller the aircraft is being offered to
    pub inbound_handoff_controller: Option<String>,

    pub approach: Option<Approach>,
    pub cleared_approach: bool,
    pub on_final: bool,

    pub assigned_squawk: Squawk,
    pub squawk: Squawk,
    pub mode: TransponderMode,
    pub scratchpad: String,

    /// Remaining route, next fix first
    pub waypoints: Vec<Waypoint>,

    pub performance: AircraftPerformance,

    /// Most recent first
    pub tracks: VecDeque<RadarTrack>,

    /// Last time anything was heard from the aircraft
    pub last_heard: SimTime,
}

impl Aircraft {
    pub fn new(callsign: impl Into<String>, now: SimTime) -> Self {
        Self {
            callsign: callsign.into(),
            position: Point::new(0.0, 0.0),
            altitude: 0.0,
            heading: 0.0,
            ias: 0.0,
            gs: 0.0,
            assigned_altitude: None,
            assigned_speed: None,
            assigned_heading: None,
            turn_direction: None,
            crossing_altitude: None,
            crossing_speed: None,
            altitude_after_speed: None,
            speed_after_altitude: None,
            temporary_altitude: None,
            flight_plan: None,
            tracking_controller: None,
            outbound_handoff_controller: None,
            inbound_handoff_controller: None,
            approach: None,
            cleared_approach: false,
            on_final: false,
            assigned_squawk: Squawk::default(),
            squawk: Squawk::default(),
            mode: TransponderMode::default(),
            scratchpad: String::new(),
            waypoints: Vec::new(),
            performance: AircraftPerformance::default(),
            tracks: VecDeque::with_capacity(MAX_RADAR_TRACKS),
            last_heard: now,
        }
    }

    pub fn is_tracked_by(&self, controller: &str) -> bool {
        self.tracking_controller.as_deref() == Some(controller)
    }

    pub fn is_offered_to(&self, controller: &str) -> bool {
        self.inbound_handoff_controller.as_deref() == Some(controller)
    }

    pub fn arrival_airport(&self) -> Option<&str> {
        self.flight_plan.as_ref().map(|fp| fp.arrival_airport.as_str())
    }

    /// Records a radar return; the newest defines "last heard from".
    pub fn add_track(&mut self, track: RadarTrack) {
        self.last_heard = track.time;
        self.tracks.push_front(track);
        self.tracks.truncate(MAX_RADAR_TRACKS);
    }

    /// An altitude assignment the aircraft has not reached yet.
    pub fn altitude_pending(&self) -> bool {
        self.assigned_altitude
            .map_or(false, |alt| (self.altitude - alt as f64).abs() > 50.0)
    }

    /// A speed assignment the aircraft has not reached yet.
    pub fn speed_pending(&self) -> bool {
        self.assigned_speed
            .map_or(false, |spd| (self.ias - spd as f64).abs() > 1.0)
    }
}
