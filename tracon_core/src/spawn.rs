//! Arrival and departure spawning.
//!
//! One timer per arrival group and one per departure (airport, runway).
//! When a timer fires, the destination airport (arrivals) or departure
//! category is drawn by weighted reservoir sampling over the key's rate
//! table, an aircraft is synthesized for it and the timer is re-armed at
//! `now + random_wait(total rate)`.

use crate::clock::SimTime;
use crate::geodesy::{distance_nm, magnetic_heading};
use crate::model::Aircraft;
use crate::rates::{initial_spawn_time, random_wait, rate_sum, sample_rate_map, ArrivalRates, DepartureRates};
use crate::scenario::{Airport, Arrival, Database, DepartureRunway, Scenario, ScenarioGroup};
use crate::traffic::sample_aircraft;
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Cruise altitude used when either end of a flight cannot be located.
pub const FALLBACK_CRUISE_ALTITUDE: i32 = 39_000;

type RunwayKey = (String, String);
type CategoryKey = (String, String, String);

/// Tunables for traffic generation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnSettings {
    pub departure_challenge: f32,
    pub go_around_rate: f32,
}

impl Default for SpawnSettings {
    fn default() -> Self {
        Self {
            departure_challenge: 0.25,
            go_around_rate: 0.10,
        }
    }
}

/// A newly synthesized aircraft, not yet placed on its route.
#[derive(Debug, Clone)]
pub struct Spawned {
    pub aircraft: Aircraft,
    /// The arrival will go around instead of landing
    pub go_around: bool,
}

/// Everything the scheduler reads but does not own.
#[derive(Clone, Copy)]
pub struct SpawnContext<'a> {
    pub group: &'a ScenarioGroup,
    pub scenario: &'a Scenario,
    pub database: &'a Database,
    /// True for callsigns already in use
    pub taken: &'a dyn Fn(&str) -> bool,
}

pub struct SpawnScheduler {
    departure_rates: DepartureRates,
    arrival_rates: ArrivalRates,
    next_arrival: BTreeMap<String, SimTime>,
    next_departure: BTreeMap<RunwayKey, SimTime>,
    /// Index into the airport's departures of the last one spawned
    last_departure: BTreeMap<CategoryKey, usize>,
    settings: SpawnSettings,
    rng: ChaCha8Rng,
}

impl SpawnScheduler {
    /// Creates a scheduler with every key armed relative to `now`.
    pub fn new(
        departure_rates: DepartureRates,
        arrival_rates: ArrivalRates,
        settings: SpawnSettings,
        rng: ChaCha8Rng,
        now: SimTime,
    ) -> Self {
        let mut scheduler = Self {
            departure_rates,
            arrival_rates,
            next_arrival: BTreeMap::new(),
            next_departure: BTreeMap::new(),
            last_departure: BTreeMap::new(),
            settings,
            rng,
        };
        scheduler.arm_all(now);
        scheduler
    }

    fn arm_all(&mut self, now: SimTime) {
        for (group, rates) in &self.arrival_rates {
            let first = initial_spawn_time(now, rate_sum(rates), &mut self.rng);
            self.next_arrival.insert(group.clone(), first);
        }
        for (airport, runways) in &self.departure_rates {
            for (runway, categories) in runways {
                let first = initial_spawn_time(now, rate_sum(categories), &mut self.rng);
                self.next_departure.insert((airport.clone(), runway.clone()), first);
            }
        }
    }

    pub fn arrival_rates(&self) -> &ArrivalRates {
        &self.arrival_rates
    }

    pub fn departure_rates(&self) -> &DepartureRates {
        &self.departure_rates
    }

    pub fn next_arrival_spawn(&self, group: &str) -> Option<SimTime> {
        self.next_arrival.get(group).copied()
    }

    pub fn next_departure_spawn(&self, airport: &str, runway: &str) -> Option<SimTime> {
        self.next_departure
            .get(&(airport.to_string(), runway.to_string()))
            .copied()
    }

    /// Changes one arrival rate and re-arms that group's timer.
    pub fn set_arrival_rate(&mut self, group: &str, airport: &str, rate: u32, now: SimTime) {
        let rates = self.arrival_rates.entry(group.to_string()).or_default();
        rates.insert(airport.to_string(), rate);
        let wait = random_wait(rate_sum(rates), &mut self.rng);
        self.next_arrival.insert(group.to_string(), now + wait);
    }

    /// Changes one departure rate and re-arms that runway's timer.
    pub fn set_departure_rate(&mut self, airport: &str, runway: &str, category: &str, rate: u32, now: SimTime) {
        let categories = self
            .departure_rates
            .entry(airport.to_string())
            .or_default()
            .entry(runway.to_string())
            .or_default();
        categories.insert(category.to_string(), rate);
        let wait = random_wait(rate_sum(categories), &mut self.rng);
        self.next_departure
            .insert((airport.to_string(), runway.to_string()), now + wait);
    }

    /// Stops all spawning.
    pub fn clear(&mut self) {
        self.next_arrival.clear();
        self.next_departure.clear();
        self.last_departure.clear();
    }

    /// Spawns traffic for every timer that has fired by `now`.
    pub fn poll(&mut self, now: SimTime, ctx: SpawnContext<'_>) -> Vec<Spawned> {
        let mut spawned: Vec<Spawned> = Vec::new();

        let due: Vec<String> = self
            .next_arrival
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(group, _)| group.clone())
            .collect();
        for group in due {
            let rates = self.arrival_rates.get(&group).cloned().unwrap_or_default();
            let (airport, sum) = sample_rate_map(&rates, &mut self.rng);
            if let Some(airport) = airport {
                let aircraft = {
                    let already = &spawned;
                    let taken = |cs: &str| (ctx.taken)(cs) || already.iter().any(|s| s.aircraft.callsign == cs);
                    self.spawn_arrival(&ctx, &group, airport, now, &taken)
                };
                match aircraft {
                    Some(aircraft) => {
                        let go_around = self.rng.gen::<f32>() < self.settings.go_around_rate;
                        debug!("{}: arrival spawned for {} via {}", aircraft.callsign, airport, group);
                        spawned.push(Spawned { aircraft, go_around });
                    }
                    None => warn!("{}: unable to spawn arrival for {}", group, airport),
                }
            }
            let next = now + random_wait(sum, &mut self.rng);
            self.next_arrival.insert(group, next);
        }

        let due: Vec<RunwayKey> = self
            .next_departure
            .iter()
            .filter(|(_, at)| now >= **at)
            .map(|(key, _)| key.clone())
            .collect();
        for key in due {
            let categories = self
                .departure_rates
                .get(&key.0)
                .and_then(|runways| runways.get(&key.1))
                .cloned()
                .unwrap_or_default();
            let (category, sum) = sample_rate_map(&categories, &mut self.rng);
            if let Some(category) = category {
                let aircraft = {
                    let already = &spawned;
                    let taken = |cs: &str| (ctx.taken)(cs) || already.iter().any(|s| s.aircraft.callsign == cs);
                    self.spawn_departure(&ctx, &key.0, &key.1, category, now, &taken)
                };
                match aircraft {
                    Some(aircraft) => {
                        debug!("{}: departure spawned from {} {}", aircraft.callsign, key.0, key.1);
                        spawned.push(Spawned {
                            aircraft,
                            go_around: false,
                        });
                    }
                    None => warn!("{} {}: unable to spawn departure ({:?})", key.0, key.1, category),
                }
            }
            let next = now + random_wait(sum, &mut self.rng);
            self.next_departure.insert(key, next);
        }

        spawned
    }

    fn spawn_arrival(
        &mut self,
        ctx: &SpawnContext<'_>,
        group_name: &str,
        airport: &str,
        now: SimTime,
        taken: &dyn Fn(&str) -> bool,
    ) -> Option<Aircraft> {
        let Some(arrivals) = ctx.group.arrival_groups.get(group_name) else {
            warn!("{}: no such arrival group", group_name);
            return None;
        };
        let candidates: Vec<&Arrival> = arrivals.iter().filter(|a| a.airlines.contains_key(airport)).collect();
        let Some(&arrival) = candidates.choose(&mut self.rng) else {
            warn!("{}: no arrival serves {}", group_name, airport);
            return None;
        };
        let airline = arrival.airlines.get(airport)?.choose(&mut self.rng)?;
        let mut ac = sample_aircraft(ctx.database, &airline.icao, airline.fleet.as_deref(), now, &mut self.rng, taken)?;

        ac.waypoints = ctx
            .scenario
            .arrival_runway(airport)
            .and_then(|rwy| arrival.runway_waypoints.get(airport)?.get(&rwy.runway))
            .unwrap_or(&arrival.waypoints)
            .clone();

        let cruise = arrival
            .cruise_altitude
            .unwrap_or_else(|| cruise_altitude(ctx.group, &airline.airport, airport));
        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.departure_airport = airline.airport.clone();
            fp.arrival_airport = airport.to_string();
            fp.route = arrival.route.clone();
            fp.altitude = cruise;
        }

        ac.tracking_controller = Some(arrival.initial_controller.clone());
        ac.altitude = f64::from(arrival.initial_altitude);
        ac.assigned_altitude = arrival.cleared_altitude;
        ac.ias = f64::from(arrival.initial_speed);
        ac.assigned_speed = arrival.speed_restriction;
        ac.scratchpad = arrival.scratchpad.clone();

        if let Some(id) = &arrival.expect_approach {
            ac.approach = ctx
                .group
                .airports
                .get(airport)
                .and_then(|ap| ap.approaches.get(id))
                .cloned();
            if ac.approach.is_none() {
                warn!("{}: unknown approach {} at {}", ac.callsign, id, airport);
            }
        }
        Some(ac)
    }

    fn spawn_departure(
        &mut self,
        ctx: &SpawnContext<'_>,
        airport_name: &str,
        runway: &str,
        category: &str,
        now: SimTime,
        taken: &dyn Fn(&str) -> bool,
    ) -> Option<Aircraft> {
        let Some(airport) = ctx.group.airports.get(airport_name) else {
            warn!("{}: no such airport", airport_name);
            return None;
        };
        let Some(runway_def) = ctx
            .scenario
            .departure_runways
            .iter()
            .find(|r| r.airport == airport_name && r.runway == runway && r.category == category)
        else {
            warn!("{} {}: no departure runway for category {:?}", airport_name, runway, category);
            return None;
        };

        let key = (airport_name.to_string(), runway.to_string(), category.to_string());
        let index = self.choose_departure(airport, runway_def, &key)?;
        let departure = &airport.departures[index];
        let exit_route = runway_def.exit_routes.get(&departure.exit)?;

        let airline = departure.airlines.choose(&mut self.rng)?;
        let mut ac = sample_aircraft(ctx.database, &airline.icao, airline.fleet.as_deref(), now, &mut self.rng, taken)?;

        ac.waypoints = exit_route.waypoints.clone();
        ac.waypoints.extend(departure.route_waypoints.iter().cloned());

        let cruise = departure
            .altitude
            .unwrap_or_else(|| 28_000 + 1_000 * self.rng.gen_range(0..13));
        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.departure_airport = airport_name.to_string();
            fp.arrival_airport = departure.destination.clone();
            fp.route = format!("{} {}", exit_route.initial_route, departure.route);
            fp.altitude = cruise;
        }

        ac.scratchpad = ctx.group.scratchpads.get(&departure.exit).cloned().unwrap_or_default();
        ac.tracking_controller = Some(airport.departure_controller.clone());
        ac.altitude = f64::from(airport.elevation);
        ac.assigned_altitude = Some(exit_route.cleared_altitude);
        ac.ias = ac.performance.speed.min;

        self.last_departure.insert(key, index);
        Some(ac)
    }

    /// Picks which of the airport's departures to fly.
    ///
    /// With probability `departure_challenge` the previous departure from
    /// this runway is followed by its twin (same exit) or a sibling (same
    /// exit category); otherwise any departure the runway serves is drawn
    /// uniformly.
    fn choose_departure(&mut self, airport: &Airport, runway: &DepartureRunway, key: &CategoryKey) -> Option<usize> {
        let serves = |idx: &usize| {
            let exit = &airport.departures[*idx].exit;
            runway.exit_routes.contains_key(exit)
                && (runway.category.is_empty()
                    || airport.exit_categories.get(exit).map(String::as_str) == Some(runway.category.as_str()))
        };

        if let Some(&last) = self.last_departure.get(key) {
            if self.rng.gen::<f32>() < self.settings.departure_challenge {
                if self.rng.gen_bool(0.5) {
                    return Some(last);
                }
                let last_category = airport.exit_categories.get(&airport.departures[last].exit);
                let siblings: Vec<usize> = (0..airport.departures.len())
                    .filter(|idx| serves(idx))
                    .filter(|&idx| airport.exit_categories.get(&airport.departures[idx].exit) == last_category)
                    .collect();
                if let Some(&idx) = siblings.choose(&mut self.rng) {
                    return Some(idx);
                }
            }
        }

        let candidates: Vec<usize> = (0..airport.departures.len()).filter(|idx| serves(idx)).collect();
        match candidates.choose(&mut self.rng) {
            Some(&idx) => Some(idx),
            None => {
                warn!("{} {}: no departures match category {:?}", airport.icao, runway.runway, runway.category);
                None
            }
        }
    }
}

/// Cruise altitude for a flight between two named places.
///
/// Short hops fly low; eastbound-ish flights (magnetic course up to 180)
/// take odd thousands and the rest even ones.
pub fn cruise_altitude(group: &ScenarioGroup, from: &str, to: &str) -> i32 {
    let (Some(a), Some(b)) = (group.locate(from), group.locate(to)) else {
        return FALLBACK_CRUISE_ALTITUDE;
    };
    let distance = distance_nm(a, b);
    let base = if distance < 100.0 {
        7000
    } else if distance < 200.0 {
        11000
    } else if distance < 300.0 {
        21000
    } else {
        37000
    };
    if magnetic_heading(a, b, group.magnetic_variation) > 180.0 {
        base + 1000
    } else {
        base
    }
}
