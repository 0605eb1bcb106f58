//! Scenario reference data.
//!
//! Everything here is loaded once (by an external loader, or from
//! `crate::builtin`) and shared immutably for the session.

use crate::geodesy;
use crate::model::Controller;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// ROUTES
// ============================================================================

/// An action triggered when an aircraft passes a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WaypointCommand {
    /// Offer the aircraft to the session's controller
    Handoff,
    /// Remove the aircraft (landed or left the airspace)
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub fix: String,
    pub location: Point<f64>,
    #[serde(default)]
    pub altitude: Option<i32>,
    #[serde(default)]
    pub speed: Option<i32>,
    #[serde(default)]
    pub heading: Option<i32>,
    #[serde(default)]
    pub commands: Vec<WaypointCommand>,
}

impl Waypoint {
    pub fn new(fix: impl Into<String>, lat: f64, lon: f64) -> Self {
        Self {
            fix: fix.into(),
            location: Point::new(lon, lat),
            altitude: None,
            speed: None,
            heading: None,
            commands: Vec::new(),
        }
    }

    pub fn altitude(mut self, altitude: i32) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn speed(mut self, speed: i32) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn command(mut self, command: WaypointCommand) -> Self {
        self.commands.push(command);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApproachType {
    Ils,
    Rnav,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Approach {
    pub id: String,
    pub full_name: String,
    pub approach_type: ApproachType,

    /// Alternative fix sequences, each ending at the runway
    pub waypoints: Vec<Vec<Waypoint>>,
}

impl Approach {
    /// Finds the first approach fix named `fix`: (sequence, index).
    pub fn find_fix(&self, fix: &str) -> Option<(usize, usize)> {
        self.waypoints.iter().enumerate().find_map(|(seq, wps)| {
            wps.iter().position(|wp| wp.fix == fix).map(|idx| (seq, idx))
        })
    }

    /// The final approach course (magnetic) of the first sequence.
    pub fn course(&self, magnetic_variation: f64) -> Option<f64> {
        let seq = self.waypoints.first()?;
        let n = seq.len();
        if n < 2 {
            return None;
        }
        Some(geodesy::magnetic_heading(
            seq[n - 2].location,
            seq[n - 1].location,
            magnetic_variation,
        ))
    }
}

// ============================================================================
// TRAFFIC DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalAirline {
    pub icao: String,
    #[serde(default)]
    pub fleet: Option<String>,
    /// Origin airport
    pub airport: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Arrival {
    pub waypoints: Vec<Waypoint>,
    /// Replacement routes keyed by arrival airport then runway
    #[serde(default)]
    pub runway_waypoints: BTreeMap<String, BTreeMap<String, Vec<Waypoint>>>,
    pub route: String,
    #[serde(default)]
    pub cruise_altitude: Option<i32>,
    pub initial_controller: String,
    pub initial_altitude: i32,
    #[serde(default)]
    pub cleared_altitude: Option<i32>,
    pub initial_speed: i32,
    #[serde(default)]
    pub speed_restriction: Option<i32>,
    #[serde(default)]
    pub expect_approach: Option<String>,
    #[serde(default)]
    pub scratchpad: String,
    /// Airlines flying the arrival, keyed by destination airport
    pub airlines: BTreeMap<String, Vec<ArrivalAirline>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureAirline {
    pub icao: String,
    #[serde(default)]
    pub fleet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Departure {
    /// Exit fix
    pub exit: String,
    pub route: String,
    pub destination: String,
    #[serde(default)]
    pub altitude: Option<i32>,
    pub airlines: Vec<DepartureAirline>,
    #[serde(default)]
    pub route_waypoints: Vec<Waypoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitRoute {
    pub initial_route: String,
    pub cleared_altitude: i32,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub icao: String,
    pub location: Point<f64>,
    pub elevation: i32,
    pub departure_controller: String,
    #[serde(default)]
    pub approaches: BTreeMap<String, Approach>,
    #[serde(default)]
    pub departures: Vec<Departure>,
    /// Exit fix to category name
    #[serde(default)]
    pub exit_categories: BTreeMap<String, String>,
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepartureRunway {
    pub airport: String,
    pub runway: String,
    /// Empty for "all departures"
    #[serde(default)]
    pub category: String,
    pub default_rate: u32,
    /// Keyed by exit fix
    pub exit_routes: BTreeMap<String, ExitRoute>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalRunway {
    pub airport: String,
    pub runway: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wind {
    pub direction: i32,
    pub speed: i32,
    #[serde(default)]
    pub gust: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    /// The position the user signs in as
    pub callsign: String,
    /// Other positions staffed during the scenario
    #[serde(default)]
    pub controllers: Vec<String>,
    #[serde(default)]
    pub departure_runways: Vec<DepartureRunway>,
    #[serde(default)]
    pub arrival_runways: Vec<ArrivalRunway>,
    /// Group to airport to aircraft per hour
    #[serde(default)]
    pub arrival_group_default_rates: BTreeMap<String, BTreeMap<String, u32>>,
    #[serde(default)]
    pub wind: Wind,
}

impl Scenario {
    pub fn departure_runway(&self, airport: &str, runway: &str) -> Option<&DepartureRunway> {
        self.departure_runways
            .iter()
            .find(|r| r.airport == airport && r.runway == runway)
    }

    pub fn arrival_runway(&self, airport: &str) -> Option<&ArrivalRunway> {
        self.arrival_runways.iter().find(|r| r.airport == airport)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioGroup {
    pub name: String,
    pub airports: BTreeMap<String, Airport>,
    /// Keyed by controller callsign
    pub control_positions: BTreeMap<String, Controller>,
    pub arrival_groups: BTreeMap<String, Vec<Arrival>>,
    #[serde(default)]
    pub fixes: BTreeMap<String, Point<f64>>,
    /// Exit fix to the scratchpad departing controllers expect
    #[serde(default)]
    pub scratchpads: BTreeMap<String, String>,
    /// Degrees east
    #[serde(default)]
    pub magnetic_variation: f64,
    pub scenarios: BTreeMap<String, Scenario>,
    pub default_scenario: String,
}

impl ScenarioGroup {
    /// Deserializes a group from its JSON form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Resolves an airport or fix name to a position.
    pub fn locate(&self, name: &str) -> Option<Point<f64>> {
        self.airports
            .get(name)
            .map(|ap| ap.location)
            .or_else(|| self.fixes.get(name).copied())
    }

    /// Looks a position up by callsign, then by sector id.
    pub fn controller(&self, id: &str) -> Option<&Controller> {
        self.control_positions
            .get(id)
            .or_else(|| self.control_positions.values().find(|c| c.sector_id == id))
    }
}

// ============================================================================
// DATABASE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetAircraft {
    pub icao: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airline {
    pub icao: String,
    /// `#` is a digit, `@` a letter, anything else is literal
    pub callsign_formats: Vec<String>,
    /// Fleet name to types flown
    pub fleets: BTreeMap<String, Vec<FleetAircraft>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClimbRates {
    /// Feet per minute
    pub climb: f64,
    pub descent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeedLimits {
    pub min: f64,
    pub landing: f64,
    pub cruise: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AircraftPerformance {
    pub icao: String,
    /// `L`, `M`, `H` or `J`
    pub weight_class: String,
    pub rate: ClimbRates,
    pub speed: SpeedLimits,
}

impl Default for AircraftPerformance {
    fn default() -> Self {
        Self {
            icao: String::new(),
            weight_class: "M".to_string(),
            rate: ClimbRates {
                climb: 2000.0,
                descent: 1500.0,
            },
            speed: SpeedLimits {
                min: 120.0,
                landing: 135.0,
                cruise: 450.0,
                max: 340.0,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Database {
    pub airlines: BTreeMap<String, Airline>,
    /// Keyed by aircraft type
    pub aircraft_performance: BTreeMap<String, AircraftPerformance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_minimal_group() {
        let json = r#"{
            "name": "Test",
            "airports": {
                "KSEA": {
                    "icao": "KSEA",
                    "location": {"x": -122.309, "y": 47.449},
                    "elevation": 433,
                    "departure_controller": "SEA_APP"
                }
            },
            "control_positions": {
                "SEA_APP": {"callsign": "SEA_APP", "sector_id": "46", "low_squawk": 2177, "high_squawk": 2239}
            },
            "arrival_groups": {},
            "fixes": {"HAWKZ": {"x": -122.1, "y": 47.0}},
            "scenarios": {
                "Demo": {"name": "Demo", "callsign": "SEA_APP"}
            },
            "default_scenario": "Demo"
        }"#;

        let group = ScenarioGroup::from_json(json).unwrap();
        assert_eq!(group.airports["KSEA"].elevation, 433);
        assert!(group.control_positions["SEA_APP"].has_squawk_range());
        assert_eq!(group.controller("46").map(|c| c.callsign.as_str()), Some("SEA_APP"));
        assert!(group.locate("HAWKZ").is_some());
        assert!(group.locate("KXXX").is_none());
        assert!(group.scenarios["Demo"].departure_runways.is_empty());
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(ScenarioGroup::from_json("{\"name\": 3}").is_err());
    }

    #[test]
    fn test_approach_find_fix() {
        let approach = Approach {
            id: "I16R".into(),
            full_name: "ILS Runway 16R".into(),
            approach_type: ApproachType::Ils,
            waypoints: vec![
                vec![Waypoint::new("A", 47.8, -122.3), Waypoint::new("RW16R", 47.46, -122.31)],
                vec![Waypoint::new("B", 47.7, -122.4), Waypoint::new("RW16R", 47.46, -122.31)],
            ],
        };
        assert_eq!(approach.find_fix("B"), Some((1, 0)));
        assert_eq!(approach.find_fix("RW16R"), Some((0, 1)));
        assert_eq!(approach.find_fix("Z"), None);
    }
}
