//! Built-in training scenario: Seattle south flow.
//!
//! Stands in for an external scenario loader so a session can start with
//! no files on disk.

use crate::model::{Controller, NetworkRating, Squawk};
use crate::scenario::{
    AircraftPerformance, Airline, Airport, Approach, ApproachType, Arrival, ArrivalAirline,
    ArrivalRunway, ClimbRates, Database, Departure, DepartureAirline, DepartureRunway, ExitRoute,
    FleetAircraft, Scenario, ScenarioGroup, SpeedLimits, Waypoint, WaypointCommand, Wind,
};
use geo::Point;
use std::collections::BTreeMap;

pub const GROUP_NAME: &str = "Seattle";
pub const DEFAULT_SCENARIO: &str = "South Flow";
pub const MIXED_SCENARIO: &str = "South Flow Mixed";

pub const APPROACH: &str = "SEA_APP";
pub const DEPARTURE: &str = "SEA_DEP";
pub const CENTER: &str = "SEA_CTR";
pub const TOWER: &str = "SEA_TWR";

fn fix(name: &str, lat: f64, lon: f64) -> Waypoint {
    Waypoint::new(name, lat, lon)
}

fn position(
    callsign: &str,
    name: &str,
    sector: &str,
    facility: &str,
    frequency: &str,
    scope_range: i32,
    squawks: (u16, u16),
) -> (String, Controller) {
    let controller = Controller {
        callsign: callsign.to_string(),
        name: name.to_string(),
        rating: NetworkRating::Controller1,
        facility: facility.to_string(),
        frequency: frequency.to_string(),
        scope_range,
        sector_id: sector.to_string(),
        low_squawk: Squawk(squawks.0),
        high_squawk: Squawk(squawks.1),
        location: Some(Point::new(-122.3093, 47.4490)),
        ..Default::default()
    };
    (callsign.to_string(), controller)
}

fn approaches() -> BTreeMap<String, Approach> {
    let rw16r = || fix("_KSEA_16R", 47.4638, -122.3178).command(WaypointCommand::Delete);
    let rw16c = || fix("_KSEA_16C", 47.4638, -122.3108).command(WaypointCommand::Delete);

    let ils16r = Approach {
        id: "I16R".into(),
        full_name: "ILS Runway 16R".into(),
        approach_type: ApproachType::Ils,
        waypoints: vec![
            vec![
                fix("JAWBN", 47.7600, -122.3180).altitude(5000),
                fix("FOURT", 47.6300, -122.3180).altitude(3000),
                rw16r(),
            ],
            vec![
                fix("ZOOMR", 47.7000, -122.5000).altitude(5000),
                fix("FOURT", 47.6300, -122.3180).altitude(3000),
                rw16r(),
            ],
        ],
    };
    let rnav16c = Approach {
        id: "R16C".into(),
        full_name: "RNAV (GPS) Runway 16C".into(),
        approach_type: ApproachType::Rnav,
        waypoints: vec![vec![
            fix("KARFO", 47.7500, -122.3108).altitude(5000),
            fix("SUNED", 47.6300, -122.3108).altitude(3000).speed(170),
            rw16c(),
        ]],
    };

    [ils16r, rnav16c]
        .into_iter()
        .map(|ap| (ap.id.clone(), ap))
        .collect()
}

fn departures() -> Vec<Departure> {
    let dep = |exit: &str, route: &str, destination: &str, lat: f64, lon: f64, airlines: &[&str]| {
        Departure {
            exit: exit.into(),
            route: route.into(),
            destination: destination.into(),
            altitude: None,
            airlines: airlines
                .iter()
                .map(|icao| DepartureAirline {
                    icao: icao.to_string(),
                    fleet: None,
                })
                .collect(),
            route_waypoints: vec![fix(exit, lat, lon).command(WaypointCommand::Delete)],
        }
    };
    vec![
        dep("BANGR", "BANGR9 YKM J70 GEG", "KORD", 47.9500, -121.6000, &["ASA", "UAL"]),
        dep("HAROB", "HAROB5 YZT J523 ANC", "KANC", 48.3000, -122.4000, &["ASA", "FDX"]),
        dep("SUMMA", "SUMMA2 LMT J65 OAK", "KSFO", 46.6000, -122.2000, &["ASA", "UAL", "QXE"]),
        dep("ELMAA", "ELMAA3 OED J3 LAX", "KLAX", 46.8500, -123.1000, &["ASA", "FDX"]),
    ]
}

fn exit_routes() -> BTreeMap<String, ExitRoute> {
    ["BANGR", "HAROB", "SUMMA", "ELMAA"]
        .into_iter()
        .map(|exit| {
            let route = ExitRoute {
                initial_route: "SEA9".into(),
                cleared_altitude: 10000,
                waypoints: vec![
                    fix("_KSEA_16L", 47.4638, -122.3030),
                    fix("_KSEA_16L_DER", 47.4300, -122.3030),
                    fix("SEA", 47.3800, -122.3030),
                ],
            };
            (exit.to_string(), route)
        })
        .collect()
}

fn arrivals() -> BTreeMap<String, Vec<Arrival>> {
    let airlines = |list: &[(&str, &str)]| {
        let mut by_airport = BTreeMap::new();
        by_airport.insert(
            "KSEA".to_string(),
            list.iter()
                .map(|(icao, origin)| ArrivalAirline {
                    icao: icao.to_string(),
                    fleet: None,
                    airport: origin.to_string(),
                })
                .collect::<Vec<_>>(),
        );
        by_airport
    };

    let glasr = Arrival {
        waypoints: vec![
            fix("GLASR", 48.0500, -121.7000),
            fix("CHINS", 47.9000, -122.1000).command(WaypointCommand::Handoff),
            fix("JAWBN", 47.7600, -122.3180).altitude(5000),
        ],
        runway_waypoints: BTreeMap::new(),
        route: "GLASR3".into(),
        cruise_altitude: None,
        initial_controller: CENTER.into(),
        initial_altitude: 12000,
        cleared_altitude: Some(10000),
        initial_speed: 280,
        speed_restriction: Some(250),
        expect_approach: Some("I16R".into()),
        scratchpad: String::new(),
        airlines: airlines(&[("ASA", "KGEG"), ("QXE", "KGEG"), ("UAL", "KORD"), ("ASA", "KANC")]),
    };

    let mut hawkz_16c = BTreeMap::new();
    hawkz_16c.insert(
        "16C".to_string(),
        vec![
            fix("HAWKZ", 46.9500, -122.5500).command(WaypointCommand::Handoff),
            fix("KARFO", 47.7500, -122.3108).altitude(5000),
        ],
    );
    let mut hawkz_runways = BTreeMap::new();
    hawkz_runways.insert("KSEA".to_string(), hawkz_16c);

    let hawkz = Arrival {
        waypoints: vec![
            fix("HAWKZ", 46.9500, -122.5500).command(WaypointCommand::Handoff),
            fix("ZOOMR", 47.7000, -122.5000).altitude(6000),
        ],
        runway_waypoints: hawkz_runways,
        route: "HAWKZ7".into(),
        cruise_altitude: Some(35000),
        initial_controller: CENTER.into(),
        initial_altitude: 13000,
        cleared_altitude: Some(11000),
        initial_speed: 290,
        speed_restriction: None,
        expect_approach: None,
        scratchpad: "HWK".into(),
        airlines: airlines(&[("ASA", "KSFO"), ("UAL", "KDEN"), ("FDX", "KLAX")]),
    };

    let mut groups = BTreeMap::new();
    groups.insert("GLASR".to_string(), vec![glasr]);
    groups.insert("HAWKZ".to_string(), vec![hawkz]);
    groups
}

fn scenarios() -> BTreeMap<String, Scenario> {
    let rates = |glasr: u32, hawkz: u32| {
        let mut table: BTreeMap<String, BTreeMap<String, u32>> = BTreeMap::new();
        table.insert("GLASR".to_string(), [("KSEA".to_string(), glasr)].into_iter().collect());
        table.insert("HAWKZ".to_string(), [("KSEA".to_string(), hawkz)].into_iter().collect());
        table
    };

    let south = Scenario {
        name: DEFAULT_SCENARIO.into(),
        callsign: APPROACH.into(),
        controllers: vec![CENTER.into(), DEPARTURE.into(), TOWER.into()],
        departure_runways: vec![DepartureRunway {
            airport: "KSEA".into(),
            runway: "16L".into(),
            category: String::new(),
            default_rate: 20,
            exit_routes: exit_routes(),
        }],
        arrival_runways: vec![ArrivalRunway {
            airport: "KSEA".into(),
            runway: "16R".into(),
        }],
        arrival_group_default_rates: rates(12, 10),
        wind: Wind {
            direction: 170,
            speed: 8,
            gust: 0,
        },
    };

    let mixed = Scenario {
        name: MIXED_SCENARIO.into(),
        callsign: APPROACH.into(),
        controllers: vec![CENTER.into(), TOWER.into()],
        departure_runways: vec![DepartureRunway {
            airport: "KSEA".into(),
            runway: "16L".into(),
            category: "North".into(),
            default_rate: 12,
            exit_routes: exit_routes(),
        }],
        arrival_runways: vec![ArrivalRunway {
            airport: "KSEA".into(),
            runway: "16C".into(),
        }],
        arrival_group_default_rates: rates(8, 14),
        wind: Wind {
            direction: 190,
            speed: 14,
            gust: 24,
        },
    };

    [south, mixed].into_iter().map(|s| (s.name.clone(), s)).collect()
}

/// The built-in scenario group.
pub fn scenario_group() -> ScenarioGroup {
    let ksea = Airport {
        icao: "KSEA".into(),
        location: Point::new(-122.3093, 47.4490),
        elevation: 433,
        departure_controller: APPROACH.into(),
        approaches: approaches(),
        departures: departures(),
        exit_categories: [
            ("BANGR", "North"),
            ("HAROB", "North"),
            ("SUMMA", "South"),
            ("ELMAA", "South"),
        ]
        .into_iter()
        .map(|(exit, cat)| (exit.to_string(), cat.to_string()))
        .collect(),
    };

    let mut airports = BTreeMap::new();
    airports.insert(ksea.icao.clone(), ksea);

    let fixes = [
        ("KGEG", 47.6199, -117.5338),
        ("KORD", 41.9786, -87.9048),
        ("KANC", 61.1743, -149.9962),
        ("KSFO", 37.6190, -122.3750),
        ("KDEN", 39.8561, -104.6737),
        ("KLAX", 33.9416, -118.4085),
        ("GLASR", 48.0500, -121.7000),
        ("CHINS", 47.9000, -122.1000),
        ("HAWKZ", 46.9500, -122.5500),
        ("JAWBN", 47.7600, -122.3180),
        ("ZOOMR", 47.7000, -122.5000),
        ("FOURT", 47.6300, -122.3180),
        ("KARFO", 47.7500, -122.3108),
        ("SUNED", 47.6300, -122.3108),
        ("SEA", 47.3800, -122.3030),
    ]
    .into_iter()
    .map(|(name, lat, lon)| (name.to_string(), Point::new(lon, lat)))
    .collect();

    let scratchpads = [("BANGR", "BAN"), ("HAROB", "HAR"), ("SUMMA", "SUM"), ("ELMAA", "ELM")]
        .into_iter()
        .map(|(exit, sp)| (exit.to_string(), sp.to_string()))
        .collect();

    ScenarioGroup {
        name: GROUP_NAME.into(),
        airports,
        control_positions: [
            position(APPROACH, "Seattle Approach", "46", "APP", "119.200", 60, (0o4201, 0o4277)),
            position(DEPARTURE, "Seattle Departure", "21", "DEP", "120.400", 60, (0o4301, 0o4377)),
            position(CENTER, "Seattle Center", "S", "CTR", "133.650", 250, (0o2501, 0o2577)),
            position(TOWER, "Seattle Tower", "T", "TWR", "119.900", 20, (0, 0)),
        ]
        .into_iter()
        .collect(),
        arrival_groups: arrivals(),
        fixes,
        scratchpads,
        magnetic_variation: 15.5,
        scenarios: scenarios(),
        default_scenario: DEFAULT_SCENARIO.into(),
    }
}

fn performance(icao: &str, weight_class: &str, rate: (f64, f64), speed: [f64; 4]) -> (String, AircraftPerformance) {
    let perf = AircraftPerformance {
        icao: icao.to_string(),
        weight_class: weight_class.to_string(),
        rate: ClimbRates {
            climb: rate.0,
            descent: rate.1,
        },
        speed: SpeedLimits {
            min: speed[0],
            landing: speed[1],
            cruise: speed[2],
            max: speed[3],
        },
    };
    (icao.to_string(), perf)
}

fn airline(icao: &str, formats: &[&str], fleet: &[(&str, u32)]) -> (String, Airline) {
    let mut fleets = BTreeMap::new();
    fleets.insert(
        "default".to_string(),
        fleet
            .iter()
            .map(|(ty, count)| FleetAircraft {
                icao: ty.to_string(),
                count: *count,
            })
            .collect(),
    );
    let airline = Airline {
        icao: icao.to_string(),
        callsign_formats: formats.iter().map(|f| f.to_string()).collect(),
        fleets,
    };
    (icao.to_string(), airline)
}

/// Airline and aircraft-type data for the built-in scenarios.
pub fn database() -> Database {
    Database {
        airlines: [
            airline("ASA", &["###", "####"], &[("B738", 4), ("B739", 3)]),
            airline("QXE", &["####"], &[("E75L", 5), ("DH8D", 2)]),
            airline("UAL", &["###", "####"], &[("A320", 2), ("B739", 3), ("B772", 1)]),
            airline("FDX", &["#", "###", "####"], &[("B752", 2), ("B763", 2)]),
        ]
        .into_iter()
        .collect(),
        aircraft_performance: [
            performance("B738", "M", (2500.0, 2000.0), [130.0, 145.0, 450.0, 340.0]),
            performance("B739", "M", (2500.0, 2000.0), [135.0, 150.0, 450.0, 340.0]),
            performance("E75L", "M", (2500.0, 2000.0), [120.0, 130.0, 430.0, 320.0]),
            performance("DH8D", "M", (2000.0, 1500.0), [110.0, 120.0, 300.0, 280.0]),
            performance("A320", "M", (2500.0, 2000.0), [130.0, 140.0, 450.0, 340.0]),
            performance("B772", "H", (2000.0, 2000.0), [140.0, 150.0, 490.0, 340.0]),
            performance("B752", "M", (3000.0, 2000.0), [130.0, 140.0, 460.0, 340.0]),
            performance("B763", "H", (2200.0, 2000.0), [140.0, 150.0, 470.0, 340.0]),
        ]
        .into_iter()
        .collect(),
    }
}
