//! Synthesis of individual aircraft from airline and fleet data.

use crate::clock::SimTime;
use crate::model::{Aircraft, FlightPlan, FlightRules, Squawk, TransponderMode};
use crate::rates::sample_rate_map;
use crate::scenario::{Airline, Database};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::warn;

const DEFAULT_FLEET: &str = "default";

/// Attempts at drawing an unused callsign before giving up.
const CALLSIGN_ATTEMPTS: usize = 100;

/// Callsigns associated with accidents and incidents; never generated.
pub fn disallowed_callsigns() -> &'static HashSet<&'static str> {
    static DISALLOWED: OnceLock<HashSet<&'static str>> = OnceLock::new();
    DISALLOWED.get_or_init(|| {
        [
            "AAL11", "UAL175", "AAL77", "UAL93", "MAS17", "MAS370", "GWI18G", "GWI9525",
            "MSR990", "FDX705", "AFR8969", "PAA1736", "KLM4805", "JAL123", "AIC182", "AAL191",
            "PAA103", "KAL007", "AAL587", "CAL140", "TWA800", "SWR111", "KAL801", "AFR447",
            "CAL611", "LOT5055", "ICE001",
        ]
        .into_iter()
        .collect()
    })
}

/// Expands a flight-number template: `#` is a digit, `@` an uppercase
/// letter, anything else is copied.
pub fn expand_format<R: Rng + ?Sized>(format: &str, rng: &mut R) -> String {
    format
        .chars()
        .map(|ch| match ch {
            '#' => char::from(b'0' + rng.gen_range(0..10)),
            '@' => char::from(b'A' + rng.gen_range(0..26)),
            other => other,
        })
        .collect()
}

/// Draws a callsign for `airline` that is neither disallowed nor taken.
pub fn random_callsign<R: Rng + ?Sized>(
    airline: &Airline,
    rng: &mut R,
    taken: &dyn Fn(&str) -> bool,
) -> Option<String> {
    for _ in 0..CALLSIGN_ATTEMPTS {
        let format = airline.callsign_formats.choose(rng)?;
        let id = expand_format(format, rng);
        if id == "0" {
            continue;
        }
        let callsign = format!("{}{}", airline.icao, id);
        if disallowed_callsigns().contains(callsign.as_str()) || taken(&callsign) {
            continue;
        }
        return Some(callsign);
    }
    None
}

/// Builds an aircraft flown by `airline_icao` from one of its fleets.
///
/// The type is drawn in proportion to its count in the fleet. Missing
/// airline, fleet or performance data is logged and yields `None`.
pub fn sample_aircraft<R: Rng + ?Sized>(
    database: &Database,
    airline_icao: &str,
    fleet: Option<&str>,
    now: SimTime,
    rng: &mut R,
    taken: &dyn Fn(&str) -> bool,
) -> Option<Aircraft> {
    let Some(airline) = database.airlines.get(airline_icao) else {
        warn!("{}: unknown airline", airline_icao);
        return None;
    };

    let fleet_name = fleet.unwrap_or(DEFAULT_FLEET);
    let Some(fleet) = airline.fleets.get(fleet_name) else {
        warn!("{}: unknown fleet {}", airline_icao, fleet_name);
        return None;
    };

    let counts: BTreeMap<&str, u32> = fleet.iter().map(|ac| (ac.icao.as_str(), ac.count)).collect();
    let (Some(&aircraft_type), _) = sample_rate_map(&counts, rng) else {
        warn!("{}: fleet {} is empty", airline_icao, fleet_name);
        return None;
    };

    let Some(performance) = database.aircraft_performance.get(aircraft_type) else {
        warn!("{}: no performance data for {}", airline_icao, aircraft_type);
        return None;
    };

    let Some(callsign) = random_callsign(airline, rng, taken) else {
        warn!("{}: could not find a free callsign", airline_icao);
        return None;
    };

    let type_code = match performance.weight_class.as_str() {
        "H" => format!("H/{}", aircraft_type),
        "J" => format!("J/{}", aircraft_type),
        _ => aircraft_type.to_string(),
    };

    let mut ac = Aircraft::new(callsign, now);
    ac.squawk = Squawk(rng.gen_range(0..0o7000));
    ac.mode = TransponderMode::Charlie;
    ac.flight_plan = Some(FlightPlan {
        rules: FlightRules::Ifr,
        aircraft_type: type_code,
        tas: performance.speed.cruise as i32,
        ..Default::default()
    });
    ac.performance = performance.clone();
    Some(ac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_expand_format() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let id = expand_format("#@X#", &mut rng);
        let bytes = id.as_bytes();
        assert_eq!(bytes.len(), 4);
        assert!(bytes[0].is_ascii_digit());
        assert!(bytes[1].is_ascii_uppercase());
        assert_eq!(bytes[2], b'X');
        assert!(bytes[3].is_ascii_digit());
    }

    #[test]
    fn test_callsign_never_disallowed_or_taken() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let airline = Airline {
            icao: "AAL".into(),
            callsign_formats: vec!["##".into()],
            fleets: BTreeMap::new(),
        };
        let taken = |cs: &str| cs.ends_with('5');
        for _ in 0..500 {
            let cs = random_callsign(&airline, &mut rng, &taken).unwrap();
            assert_ne!(cs, "AAL11");
            assert_ne!(cs, "AAL77");
            assert!(!cs.ends_with('5'));
        }
    }

    #[test]
    fn test_callsign_gives_up_when_exhausted() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let airline = Airline {
            icao: "KAL".into(),
            callsign_formats: vec!["007".into()],
            fleets: BTreeMap::new(),
        };
        assert_eq!(random_callsign(&airline, &mut rng, &|_| false), None);
    }

    #[test]
    fn test_sample_aircraft_heavy_prefix() {
        let db = builtin::database();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let mut heavy = 0;
        for _ in 0..50 {
            let ac = sample_aircraft(&db, "FDX", None, SimTime::ZERO, &mut rng, &|_| false).unwrap();
            let fp = ac.flight_plan.as_ref().unwrap();
            assert!(ac.callsign.starts_with("FDX"));
            assert!(ac.squawk < Squawk(0o7000));
            if fp.aircraft_type.starts_with("H/") {
                heavy += 1;
                assert_eq!(ac.performance.weight_class, "H");
            }
        }
        assert!(heavy > 0);
    }

    #[test]
    fn test_sample_aircraft_missing_data() {
        let db = builtin::database();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        assert!(sample_aircraft(&db, "ZZZ", None, SimTime::ZERO, &mut rng, &|_| false).is_none());
        assert!(sample_aircraft(&db, "ASA", Some("nope"), SimTime::ZERO, &mut rng, &|_| false).is_none());
    }
}
