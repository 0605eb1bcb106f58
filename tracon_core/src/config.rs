//! Session configuration.

use crate::error::AtcError;
use crate::model::{NetworkRating, Squawk};
use crate::rates::{ArrivalRates, DepartureRates};
use crate::scenario::ScenarioGroup;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a locally simulated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSimConfig {
    /// Scenario within the group
    pub scenario: String,

    /// Position to sign in as, if not the scenario's own
    pub controller: Option<String>,

    /// Probability that a departure follows the previous one's exit
    /// (or another exit in the same category)
    pub departure_challenge: f32,

    /// Probability that a spawned arrival goes around
    pub go_around_rate: f32,

    /// Virtual seconds per wall second
    pub sim_rate: f64,

    pub departure_rates: DepartureRates,
    pub arrival_rates: ArrivalRates,

    /// Seconds simulated before the user sees the scope
    pub prespawn_secs: u32,
}

impl Default for LocalSimConfig {
    fn default() -> Self {
        Self {
            scenario: String::new(),
            controller: None,
            departure_challenge: 0.25,
            go_around_rate: 0.10,
            sim_rate: 1.0,
            departure_rates: DepartureRates::new(),
            arrival_rates: ArrivalRates::new(),
            prespawn_secs: 45,
        }
    }
}

impl LocalSimConfig {
    /// Configuration with the rate tables set to the scenario's defaults.
    pub fn for_scenario(group: &ScenarioGroup, name: &str) -> Result<Self, AtcError> {
        let scenario = group
            .scenarios
            .get(name)
            .ok_or_else(|| AtcError::UnknownScenario(name.to_string()))?;

        let mut departure_rates = DepartureRates::new();
        for runway in &scenario.departure_runways {
            departure_rates
                .entry(runway.airport.clone())
                .or_default()
                .entry(runway.runway.clone())
                .or_default()
                .insert(runway.category.clone(), runway.default_rate);
        }

        Ok(Self {
            scenario: name.to_string(),
            departure_rates,
            arrival_rates: scenario.arrival_group_default_rates.clone(),
            ..Default::default()
        })
    }
}

/// Configuration for a session mirrored from a network server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Position to sign in as
    pub callsign: String,
    pub name: String,
    pub cid: String,
    pub facility: String,
    pub rating: NetworkRating,
    pub frequency: String,

    /// Visibility range (nm)
    pub scope_range: i32,

    pub low_squawk: Squawk,
    pub high_squawk: Squawk,

    /// Observers may look but not issue commands
    pub observer: bool,

    /// Aircraft not heard from for this long are dropped
    pub staleness_timeout: Duration,

    /// Radar antenna position
    pub location: Option<Point<f64>>,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            callsign: String::new(),
            name: String::new(),
            cid: String::new(),
            facility: "APP".to_string(),
            rating: NetworkRating::Controller1,
            frequency: "199.998".to_string(),
            scope_range: 50,
            low_squawk: Squawk(0),
            high_squawk: Squawk(0),
            observer: false,
            staleness_timeout: Duration::from_secs(30 * 60),
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;

    #[test]
    fn test_for_scenario_copies_default_rates() {
        let group = builtin::scenario_group();
        let config = LocalSimConfig::for_scenario(&group, builtin::DEFAULT_SCENARIO).unwrap();

        assert_eq!(config.departure_rates["KSEA"]["16L"][""], 20);
        assert_eq!(config.arrival_rates["GLASR"]["KSEA"], 12);
        assert_eq!(config.departure_challenge, 0.25);
        assert_eq!(config.prespawn_secs, 45);
    }

    #[test]
    fn test_for_unknown_scenario() {
        let group = builtin::scenario_group();
        assert_eq!(
            LocalSimConfig::for_scenario(&group, "North Flow"),
            Err(AtcError::UnknownScenario("North Flow".into()))
        );
    }

    #[test]
    fn test_protocol_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.staleness_timeout, Duration::from_secs(1800));
        assert!(!config.observer);
    }
}
