//! Local simulation backend.
//!
//! `LocalSim` owns the aircraft registry for a training session, simulates
//! the pilots and the neighbouring controllers, and generates traffic from
//! the scenario's rate tables.
//!
//! # Tick
//!
//! Each `update` advances the session clock from the context's wall time,
//! then:
//! 1. resolves handoffs whose acceptance deadline has passed,
//! 2. runs one-second kinematic updates until caught up,
//! 3. records a radar return for every aircraft every five seconds,
//! 4. spawns traffic for every timer that has fired.
//!
//! While paused the clock does not move, so none of the above progresses,
//! but commands still apply.

use crate::clock::{Clock, SimTime};
use crate::config::LocalSimConfig;
use crate::error::AtcError;
use crate::events::{Event, EventStream};
use crate::geodesy::distance_nm;
use crate::handoff::HandoffTracker;
use crate::model::{Aircraft, Controller, FlightPlan, Metar, RadarTrack, Squawk, TurnDirection};
use crate::scenario::{Approach, ApproachType, Database, Scenario, ScenarioGroup, Wind, WaypointCommand};
use crate::service::{
    check_offered_to, check_scratchpad, check_tracked_by, check_untracked, lookup, CommandService, PilotControl,
};
use crate::spawn::{SpawnContext, SpawnScheduler, SpawnSettings, Spawned};
use crate::squawk::automatic_code;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracon_env::SessionContext;

/// Random stream ids passed to `SessionContext::derive_rng_seed`.
pub const SPAWN_STREAM: u64 = 1;
pub const HANDOFF_STREAM: u64 = 2;
pub const SQUAWK_STREAM: u64 = 3;
pub const WEATHER_STREAM: u64 = 4;

/// An arrival flagged to go around does so this close to the runway (nm).
pub const GO_AROUND_DISTANCE_NM: f64 = 0.25;

const KINEMATICS_INTERVAL: Duration = Duration::from_secs(1);
const RADAR_INTERVAL: Duration = Duration::from_secs(5);

pub struct LocalSim<C: SessionContext> {
    ctx: Arc<C>,
    events: EventStream,
    group: Arc<ScenarioGroup>,
    database: Arc<Database>,
    scenario: Scenario,

    /// The user's position
    callsign: String,

    aircraft: BTreeMap<String, Aircraft>,
    handoffs: HandoffTracker,
    scheduler: SpawnScheduler,
    metars: BTreeMap<String, Metar>,
    clock: Clock,

    will_go_around: HashSet<String>,
    last_kinematics: SimTime,
    last_radar: SimTime,
    squawk_rng: ChaCha8Rng,
    connected: bool,
}

impl<C: SessionContext> LocalSim<C> {
    /// Starts a session and simulates `prespawn_secs` of traffic before
    /// returning.
    pub fn new(
        ctx: Arc<C>,
        events: EventStream,
        group: Arc<ScenarioGroup>,
        database: Arc<Database>,
        config: &LocalSimConfig,
    ) -> Result<Self, AtcError> {
        let scenario = group
            .scenarios
            .get(&config.scenario)
            .cloned()
            .ok_or_else(|| AtcError::UnknownScenario(config.scenario.clone()))?;

        let callsign = config.controller.clone().unwrap_or_else(|| scenario.callsign.clone());
        if !group.control_positions.contains_key(&callsign) {
            return Err(AtcError::NoController(callsign));
        }

        let rng = |stream| ChaCha8Rng::seed_from_u64(ctx.derive_rng_seed(stream));
        let settings = SpawnSettings {
            departure_challenge: config.departure_challenge,
            go_around_rate: config.go_around_rate,
        };
        let scheduler = SpawnScheduler::new(
            config.departure_rates.clone(),
            config.arrival_rates.clone(),
            settings,
            rng(SPAWN_STREAM),
            SimTime::ZERO,
        );

        let mut weather_rng = rng(WEATHER_STREAM);
        let base_altimeter = 2980 + weather_rng.gen_range(0..40);
        let metars = group
            .airports
            .keys()
            .map(|icao| {
                let metar = synthesize_metar(icao, scenario.wind, base_altimeter, &mut weather_rng);
                (icao.clone(), metar)
            })
            .collect();

        let mut sim = Self {
            clock: Clock::new(config.sim_rate, ctx.now()),
            handoffs: HandoffTracker::new(rng(HANDOFF_STREAM)),
            squawk_rng: rng(SQUAWK_STREAM),
            ctx,
            events,
            group,
            database,
            scenario,
            callsign,
            aircraft: BTreeMap::new(),
            scheduler,
            metars,
            will_go_around: HashSet::new(),
            last_kinematics: SimTime::ZERO,
            last_radar: SimTime::ZERO,
            connected: true,
        };

        info!(
            "{}: signed in as {}, prespawning {}s",
            sim.scenario.name, sim.callsign, config.prespawn_secs
        );
        for _ in 0..config.prespawn_secs {
            sim.clock.skip(KINEMATICS_INTERVAL);
            sim.step();
        }
        sim.clock.rebase(sim.ctx.now());
        Ok(sim)
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn scheduler(&self) -> &SpawnScheduler {
        &self.scheduler
    }

    pub fn sim_rate(&self) -> f64 {
        self.clock.rate()
    }

    pub fn set_sim_rate(&mut self, rate: f64) {
        self.clock.set_rate(rate, self.ctx.now());
        info!("simulation rate now {}", self.clock.rate());
    }

    pub fn is_paused(&self) -> bool {
        self.clock.is_paused()
    }

    pub fn toggle_pause(&mut self) -> bool {
        let paused = self.clock.toggle_pause(self.ctx.now());
        info!("{}", if paused { "paused" } else { "resumed" });
        paused
    }

    pub fn set_arrival_rate(&mut self, group: &str, airport: &str, rate: u32) {
        self.scheduler.set_arrival_rate(group, airport, rate, self.clock.now());
    }

    pub fn set_departure_rate(&mut self, airport: &str, runway: &str, category: &str, rate: u32) {
        self.scheduler
            .set_departure_rate(airport, runway, category, rate, self.clock.now());
    }

    /// Whether the aircraft is going to go around instead of landing.
    pub fn will_go_around(&self, callsign: &str) -> bool {
        self.will_go_around.contains(callsign)
    }

    pub fn handoff_deadline(&self, callsign: &str) -> Option<SimTime> {
        self.handoffs.deadline(callsign)
    }

    // ========================================================================
    // TICK
    // ========================================================================

    fn step(&mut self) {
        let now = self.clock.now();
        self.resolve_handoffs(now);

        while now.since(self.last_kinematics) >= KINEMATICS_INTERVAL {
            self.last_kinematics += KINEMATICS_INTERVAL;
            self.update_kinematics();
        }

        if now.since(self.last_radar) >= RADAR_INTERVAL {
            self.last_radar = now;
            self.record_radar(now);
        }

        let spawned = {
            let aircraft = &self.aircraft;
            let taken = |cs: &str| aircraft.contains_key(cs);
            let ctx = SpawnContext {
                group: &self.group,
                scenario: &self.scenario,
                database: &self.database,
                taken: &taken,
            };
            self.scheduler.poll(now, ctx)
        };
        for s in spawned {
            self.add_spawned(s);
        }
    }

    fn resolve_handoffs(&mut self, now: SimTime) {
        for callsign in self.handoffs.take_expired(now) {
            let Some(ac) = self.aircraft.get_mut(&callsign) else {
                continue;
            };
            let Some(controller) = ac.outbound_handoff_controller.take() else {
                continue;
            };
            ac.tracking_controller = Some(controller.clone());

            // Released to the filed altitude.
            if let Some(altitude) = ac.flight_plan.as_ref().map(|fp| fp.altitude) {
                ac.assigned_altitude = Some(altitude);
                ac.altitude_after_speed = None;
            }

            info!("{}: handoff accepted by {}", callsign, controller);
            self.events.post(Event::AcceptedHandoff {
                callsign: callsign.clone(),
                controller,
            });
            self.events.post(Event::ModifiedAircraft { callsign });
        }
    }

    fn update_kinematics(&mut self) {
        let variation = self.group.magnetic_variation;
        let mut commands = Vec::new();
        let mut go_arounds = Vec::new();

        for (callsign, ac) in self.aircraft.iter_mut() {
            let hold = ac.cleared_approach && self.will_go_around.contains(callsign);
            for command in ac.update(KINEMATICS_INTERVAL.as_secs_f64(), variation, hold) {
                commands.push((callsign.clone(), command));
            }
            if hold && ac.on_final {
                if let [runway] = ac.waypoints.as_slice() {
                    if distance_nm(ac.position, runway.location) < GO_AROUND_DISTANCE_NM {
                        go_arounds.push(callsign.clone());
                    }
                }
            }
        }

        for callsign in go_arounds {
            self.will_go_around.remove(&callsign);
            if let Some(ac) = self.aircraft.get_mut(&callsign) {
                ac.go_around();
            }
            self.pilot_response(&callsign, "Going around");
            self.events.post(Event::ModifiedAircraft { callsign });
        }

        for (callsign, command) in commands {
            self.run_waypoint_command(&callsign, command);
        }
    }

    fn run_waypoint_command(&mut self, callsign: &str, command: WaypointCommand) {
        match command {
            WaypointCommand::Handoff => {
                let Some(ac) = self.aircraft.get_mut(callsign) else {
                    return;
                };
                if ac.is_tracked_by(&self.callsign) {
                    return;
                }
                ac.inbound_handoff_controller = Some(self.callsign.clone());
                debug!("{}: offered to {}", callsign, self.callsign);
                self.events.post(Event::ModifiedAircraft {
                    callsign: callsign.to_string(),
                });
            }
            WaypointCommand::Delete => {
                debug!("{}: end of route", callsign);
                self.remove_aircraft(callsign);
            }
        }
    }

    fn record_radar(&mut self, now: SimTime) {
        for (callsign, ac) in self.aircraft.iter_mut() {
            ac.add_track(RadarTrack {
                position: ac.position,
                altitude: ac.altitude.round() as i32,
                groundspeed: ac.gs.round() as i32,
                heading: ac.heading,
                time: now,
            });
            self.events.post(Event::ModifiedAircraft {
                callsign: callsign.clone(),
            });
        }
    }

    fn add_spawned(&mut self, spawned: Spawned) {
        let Spawned { mut aircraft, go_around } = spawned;
        let callsign = aircraft.callsign.clone();
        let commands = aircraft.launch(self.group.magnetic_variation);
        aircraft.add_track(RadarTrack {
            position: aircraft.position,
            altitude: aircraft.altitude.round() as i32,
            groundspeed: aircraft.ias.round() as i32,
            heading: aircraft.heading,
            time: self.clock.now(),
        });

        if go_around {
            self.will_go_around.insert(callsign.clone());
        }
        self.insert_aircraft(aircraft);
        for command in commands {
            self.run_waypoint_command(&callsign, command);
        }
    }

    pub(crate) fn insert_aircraft(&mut self, aircraft: Aircraft) {
        let callsign = aircraft.callsign.clone();
        if self.aircraft.insert(callsign.clone(), aircraft).is_some() {
            warn!("{}: replaced an existing aircraft", callsign);
        }
        self.events.post(Event::AddedAircraft { callsign });
    }

    fn remove_aircraft(&mut self, callsign: &str) -> bool {
        if self.aircraft.remove(callsign).is_none() {
            return false;
        }
        self.handoffs.cancel(callsign);
        self.will_go_around.remove(callsign);
        self.events.post(Event::RemovedAircraft {
            callsign: callsign.to_string(),
        });
        true
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn pilot_response(&self, callsign: &str, message: &str) {
        info!("{}: {}", callsign, message);
        self.events.post(Event::RadioTransmission {
            callsign: callsign.to_string(),
            message: message.to_string(),
        });
    }

    fn modified(&self, callsign: &str) {
        self.events.post(Event::ModifiedAircraft {
            callsign: callsign.to_string(),
        });
    }

    fn aircraft_mut(&mut self, callsign: &str) -> Result<&mut Aircraft, AtcError> {
        self.aircraft
            .get_mut(callsign)
            .ok_or_else(|| AtcError::NoAircraftForCallsign(callsign.to_string()))
    }

    /// The aircraft, if the user is tracking it.
    fn tracked_mut(&mut self, callsign: &str) -> Result<&mut Aircraft, AtcError> {
        let ac = self
            .aircraft
            .get_mut(callsign)
            .ok_or_else(|| AtcError::NoAircraftForCallsign(callsign.to_string()))?;
        check_tracked_by(ac, &self.callsign)?;
        Ok(ac)
    }

    fn is_active(&self, controller: &str) -> bool {
        controller == self.callsign || self.scenario.controllers.iter().any(|c| c == controller)
    }

    fn find_approach(&self, callsign: &str, id: &str) -> Result<Approach, AtcError> {
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        let plan = ac.flight_plan.as_ref().ok_or(AtcError::NoFlightPlanFiled)?;
        let airport = self.group.airports.get(&plan.arrival_airport).ok_or_else(|| {
            warn!("{}: {} approach to unknown airport {}", callsign, id, plan.arrival_airport);
            AtcError::ArrivalAirportUnknown(plan.arrival_airport.clone())
        })?;
        airport
            .approaches
            .get(id)
            .cloned()
            .ok_or_else(|| AtcError::UnknownApproach(id.to_string()))
    }
}

/// Builds a plausible METAR for `airport` from the scenario wind.
fn synthesize_metar<R: Rng + ?Sized>(airport: &str, wind: Wind, base_altimeter: i32, rng: &mut R) -> Metar {
    let speed = wind.speed - 3 + rng.gen_range(0..6);
    let wind_group = if speed < 0 {
        "00000KT".to_string()
    } else if speed < 4 {
        format!("VRB{:02}KT", speed)
    } else {
        let mut direction = 10 * ((wind.direction + 5) / 10) + [-10, 0, 10][rng.gen_range(0..3)];
        if direction <= 0 {
            direction += 360;
        } else if direction > 360 {
            direction -= 360;
        }
        let gust = wind.gust - 3 + rng.gen_range(0..6);
        if gust - wind.speed > 5 {
            format!("{:03}{:02}G{:02}KT", direction, speed, gust)
        } else {
            format!("{:03}{:02}KT", direction, speed)
        }
    };
    let altimeter = format!("A{}", base_altimeter - 2 + rng.gen_range(0..4));
    Metar {
        airport: airport.to_string(),
        raw: format!("{} {} {}", airport, wind_group, altimeter),
        wind: wind_group,
        altimeter,
    }
}

fn show(value: Option<i32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

// ============================================================================
// COMMAND SERVICE
// ============================================================================

impl<C: SessionContext> CommandService for LocalSim<C> {
    fn callsign(&self) -> &str {
        &self.callsign
    }

    fn get_aircraft(&self, callsign: &str) -> Option<&Aircraft> {
        self.aircraft.get(callsign)
    }

    fn get_all_aircraft(&self) -> Vec<&Aircraft> {
        self.aircraft.values().collect()
    }

    /// Looks a position up by callsign, or by sector id among the
    /// positions staffed in this scenario.
    fn get_controller(&self, callsign: &str) -> Option<&Controller> {
        self.group.control_positions.get(callsign).or_else(|| {
            self.group
                .control_positions
                .values()
                .find(|c| c.sector_id == callsign && self.is_active(&c.callsign))
        })
    }

    fn get_all_controllers(&self) -> Vec<&Controller> {
        self.group
            .control_positions
            .values()
            .filter(|c| self.is_active(&c.callsign))
            .collect()
    }

    fn get_metar(&self, airport: &str) -> Option<&Metar> {
        self.metars.get(airport)
    }

    fn initiate_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        let me = self.callsign.clone();
        let ac = self.aircraft_mut(callsign)?;
        check_untracked(ac)?;
        ac.tracking_controller = Some(me.clone());
        self.modified(callsign);
        self.events.post(Event::InitiatedTrack {
            callsign: callsign.to_string(),
            controller: me,
        });
        Ok(())
    }

    fn drop_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        ac.tracking_controller = None;
        ac.outbound_handoff_controller = None;
        self.handoffs.cancel(callsign);
        self.modified(callsign);
        self.events.post(Event::DroppedTrack {
            callsign: callsign.to_string(),
            controller: self.callsign.clone(),
        });
        Ok(())
    }

    fn handoff(&mut self, callsign: &str, controller: &str) -> Result<(), AtcError> {
        check_tracked_by(lookup(self.aircraft.get(callsign), callsign)?, &self.callsign)?;
        let destination = self
            .get_controller(controller)
            .map(|c| c.callsign.clone())
            .ok_or_else(|| AtcError::NoController(controller.to_string()))?;
        if destination == self.callsign {
            return Err(AtcError::HandoffToSelf);
        }

        let ac = self.aircraft_mut(callsign)?;
        ac.outbound_handoff_controller = Some(destination.clone());
        let deadline = self.handoffs.offer(callsign, self.clock.now());
        debug!("{}: handoff to {}, accepted at {}", callsign, destination, deadline);
        self.modified(callsign);
        Ok(())
    }

    fn accept_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        let me = self.callsign.clone();
        let ac = self.aircraft_mut(callsign)?;
        check_offered_to(ac, &me)?;
        ac.inbound_handoff_controller = None;
        ac.tracking_controller = Some(me.clone());
        self.events.post(Event::AcceptedHandoff {
            callsign: callsign.to_string(),
            controller: me,
        });
        self.modified(callsign);
        Ok(())
    }

    fn reject_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        let me = self.callsign.clone();
        let ac = self.aircraft_mut(callsign)?;
        check_offered_to(ac, &me)?;
        ac.inbound_handoff_controller = None;
        self.modified(callsign);
        Ok(())
    }

    fn cancel_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        ac.outbound_handoff_controller = None;
        self.handoffs.cancel(callsign);
        self.modified(callsign);
        Ok(())
    }

    fn set_squawk(&mut self, callsign: &str, squawk: Squawk) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        ac.assigned_squawk = squawk;
        ac.squawk = squawk;
        self.modified(callsign);
        Ok(())
    }

    fn set_squawk_automatic(&mut self, callsign: &str) -> Result<Squawk, AtcError> {
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        check_tracked_by(ac, &self.callsign)?;
        let in_use: HashSet<Squawk> = self.aircraft.values().map(|a| a.assigned_squawk).collect();
        let controller = self.group.control_positions.get(&self.callsign);
        let code = automatic_code(ac, controller, &in_use, &mut self.squawk_rng)?;

        let ac = self.aircraft_mut(callsign)?;
        ac.assigned_squawk = code;
        ac.squawk = code;
        self.modified(callsign);
        Ok(code)
    }

    fn set_scratchpad(&mut self, callsign: &str, scratchpad: &str) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        check_scratchpad(scratchpad)?;
        ac.scratchpad = scratchpad.to_string();
        self.modified(callsign);
        Ok(())
    }

    fn set_temporary_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        ac.temporary_altitude = Some(altitude);
        self.modified(callsign);
        Ok(())
    }

    fn amend_flight_plan(&mut self, callsign: &str, plan: FlightPlan) -> Result<(), AtcError> {
        let ac = self.tracked_mut(callsign)?;
        if ac.flight_plan.is_none() {
            return Err(AtcError::NoFlightPlanFiled);
        }
        ac.flight_plan = Some(plan);
        self.modified(callsign);
        Ok(())
    }

    fn send_text_message(&mut self, to: Option<&str>, message: &str) -> Result<(), AtcError> {
        info!("{} -> {}: {}", self.callsign, to.unwrap_or("*"), message);
        self.events.post(Event::TextMessage {
            from: self.callsign.clone(),
            to: to.map(str::to_string),
            contents: message.to_string(),
        });
        Ok(())
    }

    fn connected(&self) -> bool {
        self.connected
    }

    fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.scheduler.clear();
        self.handoffs.clear();
        self.will_go_around.clear();
        for callsign in std::mem::take(&mut self.aircraft).into_keys() {
            self.events.post(Event::RemovedAircraft { callsign });
        }
        info!("{}: session closed", self.callsign);
    }

    fn current_time(&self) -> SimTime {
        self.clock.now()
    }

    fn update(&mut self) {
        if !self.connected {
            return;
        }
        self.clock.sync(self.ctx.now());
        self.step();
    }
}

// ============================================================================
// PILOT CONTROL
// ============================================================================

impl<C: SessionContext> PilotControl for LocalSim<C> {
    fn assign_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError> {
        let ac = self.aircraft_mut(callsign)?;
        let current = ac.altitude.round() as i32;
        let response = if altitude > current {
            format!("climb and maintain {}", altitude)
        } else if altitude == current {
            format!("maintain {}", altitude)
        } else {
            format!("descend and maintain {}", altitude)
        };

        if ac.speed_pending() {
            ac.altitude_after_speed = Some(altitude);
        } else {
            ac.assigned_altitude = Some(altitude);
            ac.altitude_after_speed = None;
        }
        ac.crossing_altitude = None;

        self.pilot_response(callsign, &response);
        self.modified(callsign);
        Ok(())
    }

    fn assign_heading(
        &mut self,
        callsign: &str,
        heading: Option<i32>,
        turn: Option<TurnDirection>,
    ) -> Result<(), AtcError> {
        let ac = self.aircraft_mut(callsign)?;
        let response = match heading {
            None => {
                ac.assigned_heading = None;
                ac.turn_direction = None;
                "resuming own navigation".to_string()
            }
            Some(h) if !(0..=360).contains(&h) => {
                return Err(AtcError::UnableCommand(format!("heading {} is not valid", h)));
            }
            Some(h) => {
                // 0 would read as "no heading".
                let h = if h == 0 { 360 } else { h };
                ac.assigned_heading = Some(h);
                ac.turn_direction = turn;
                ac.cleared_approach = false;
                match turn {
                    Some(TurnDirection::Left) => format!("turn left heading {:03}", h),
                    Some(TurnDirection::Right) => format!("turn right heading {:03}", h),
                    None => format!("fly heading {:03}", h),
                }
            }
        };
        self.pilot_response(callsign, &response);
        self.modified(callsign);
        Ok(())
    }

    fn turn_left(&mut self, callsign: &str, degrees: i32) -> Result<(), AtcError> {
        let ac = self.aircraft_mut(callsign)?;
        let from = ac.assigned_heading.unwrap_or(ac.heading.round() as i32);
        let heading = (from - degrees).rem_euclid(360);
        ac.assigned_heading = Some(if heading == 0 { 360 } else { heading });
        ac.turn_direction = Some(TurnDirection::Left);
        ac.cleared_approach = false;
        self.pilot_response(callsign, &format!("turn {} degrees left", degrees));
        self.modified(callsign);
        Ok(())
    }

    fn turn_right(&mut self, callsign: &str, degrees: i32) -> Result<(), AtcError> {
        let ac = self.aircraft_mut(callsign)?;
        let from = ac.assigned_heading.unwrap_or(ac.heading.round() as i32);
        let heading = (from + degrees).rem_euclid(360);
        ac.assigned_heading = Some(if heading == 0 { 360 } else { heading });
        ac.turn_direction = Some(TurnDirection::Right);
        ac.cleared_approach = false;
        self.pilot_response(callsign, &format!("turn {} degrees right", degrees));
        self.modified(callsign);
        Ok(())
    }

    fn assign_speed(&mut self, callsign: &str, speed: i32) -> Result<(), AtcError> {
        let ac = self.aircraft_mut(callsign)?;
        let landing = ac.performance.speed.landing.round() as i32;
        let max = ac.performance.speed.max.round() as i32;

        if speed == 0 {
            ac.assigned_speed = None;
            ac.speed_after_altitude = None;
            ac.crossing_speed = None;
            self.pilot_response(callsign, "cancel speed restrictions");
            self.modified(callsign);
            return Ok(());
        }
        if speed < landing || speed > max {
            let message = if speed < landing {
                format!("unable--our minimum speed is {} knots", landing)
            } else {
                format!("unable--our maximum speed is {} knots", max)
            };
            self.pilot_response(callsign, &message);
            return Err(AtcError::UnableCommand(message));
        }

        let response = if ac.cleared_approach {
            format!("{} knots until 5 mile final", speed)
        } else if ac.assigned_speed == Some(speed) {
            format!("we'll maintain {} knots", speed)
        } else {
            format!("maintain {} knots", speed)
        };
        if ac.altitude_pending() {
            ac.speed_after_altitude = Some(speed);
        } else {
            ac.assigned_speed = Some(speed);
            ac.speed_after_altitude = None;
        }
        ac.crossing_speed = None;

        self.pilot_response(callsign, &response);
        self.modified(callsign);
        Ok(())
    }

    fn direct_fix(&mut self, callsign: &str, fix: &str) -> Result<(), AtcError> {
        let fix = fix.to_uppercase();
        let ac = self.aircraft_mut(callsign)?;

        let route = if let Some(index) = ac.waypoints.iter().position(|wp| wp.fix == fix) {
            ac.waypoints[index..].to_vec()
        } else {
            let on_approach = ac
                .approach
                .as_ref()
                .and_then(|ap| ap.waypoints.iter().flatten().find(|wp| wp.fix == fix))
                .cloned();
            match on_approach {
                Some(wp) => vec![wp],
                None => return Err(AtcError::FixNotInRoute(fix)),
            }
        };
        ac.proceed_direct(route);

        self.pilot_response(callsign, &format!("direct {}", fix));
        self.modified(callsign);
        Ok(())
    }

    fn expect_approach(&mut self, callsign: &str, approach: &str) -> Result<(), AtcError> {
        let approach = self.find_approach(callsign, approach)?;
        let response = format!("we'll expect the {} approach", approach.full_name);
        self.aircraft_mut(callsign)?.approach = Some(approach);
        self.pilot_response(callsign, &response);
        self.modified(callsign);
        Ok(())
    }

    fn cleared_approach(&mut self, callsign: &str, approach: &str) -> Result<bool, AtcError> {
        let cleared = self.find_approach(callsign, approach)?;
        let ac = self.aircraft_mut(callsign)?;

        let mut prefix = String::new();
        let expected = match &ac.approach {
            Some(expected) => expected.clone(),
            None => {
                prefix = format!("you never told us to expect an approach, but ok, cleared {}. ", cleared.full_name);
                ac.approach = Some(cleared.clone());
                cleared.clone()
            }
        };
        if expected.full_name != cleared.full_name {
            let message = format!("but you cleared us for the {} approach...", expected.full_name);
            self.pilot_response(callsign, &message);
            return Err(AtcError::ClearedForUnexpectedApproach);
        }
        if ac.cleared_approach {
            let message = format!("you already cleared us for the {} approach...", cleared.full_name);
            self.pilot_response(callsign, &message);
            return Ok(true);
        }

        // Routed direct to a fix on the approach: fly the rest of it.
        let remaining = match (ac.assigned_heading, ac.waypoints.first()) {
            (None, Some(next)) => cleared
                .waypoints
                .iter()
                .find_map(|seq| seq.iter().position(|wp| wp.fix == next.fix).map(|i| seq[i + 1..].to_vec())),
            _ => None,
        };

        match (cleared.approach_type, remaining) {
            (ApproachType::Ils, Some(rest)) | (ApproachType::Rnav, Some(rest)) => {
                ac.waypoints.extend(rest);
            }
            // Vectored: the localizer intercept picks the route up.
            (ApproachType::Ils, None) if ac.assigned_heading.is_some() => {}
            (ApproachType::Ils, None) => {
                self.pilot_response(callsign, "we need either direct or a heading to intercept");
                self.modified(callsign);
                return Ok(false);
            }
            (ApproachType::Rnav, None) => {
                self.pilot_response(callsign, "we need direct to a fix on the approach...");
                self.modified(callsign);
                return Ok(false);
            }
        }

        ac.assigned_speed = None;
        ac.speed_after_altitude = None;
        if ac.crossing_speed.is_none() {
            ac.crossing_speed = Some(ac.ias.round() as i32);
        }
        ac.cleared_approach = true;

        self.pilot_response(callsign, &format!("{}cleared {} approach", prefix, cleared.full_name));
        self.modified(callsign);
        Ok(true)
    }

    fn delete_aircraft(&mut self, callsign: &str) -> Result<(), AtcError> {
        if self.remove_aircraft(callsign) {
            info!("{}: deleted", callsign);
            Ok(())
        } else {
            Err(AtcError::NoAircraftForCallsign(callsign.to_string()))
        }
    }

    fn describe(&self, callsign: &str) -> Result<String, AtcError> {
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        let mut s = format!(
            "{}: current alt {:.0}, assigned alt {} crossing alt {}",
            ac.callsign,
            ac.altitude,
            show(ac.assigned_altitude),
            show(ac.crossing_altitude)
        );
        if let Some(heading) = ac.assigned_heading {
            s += &format!(" heading {:03}", heading);
            if let Some(turn) = ac.turn_direction {
                s += &format!(" turn {:?}", turn).to_lowercase();
            }
        }
        s += &format!(
            ", IAS {:.0} GS {:.1} speed {} crossing speed {}",
            ac.ias,
            ac.gs,
            show(ac.assigned_speed),
            show(ac.crossing_speed)
        );
        if ac.cleared_approach {
            s += ", cleared approach";
        }
        if ac.on_final {
            s += ", on final";
        }
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::events::SubscriberId;
    use crate::model::FlightRules;
    use geo::Point;
    use tracon_env::ManualContext;

    struct Session {
        ctx: Arc<ManualContext>,
        events: EventStream,
        sub: SubscriberId,
        sim: LocalSim<ManualContext>,
    }

    impl Session {
        fn advance(&mut self, secs: u64) {
            for _ in 0..secs {
                self.ctx.advance_time(Duration::from_secs(1));
                self.sim.update();
            }
        }

        fn radio(&self) -> Vec<String> {
            self.events
                .get(self.sub)
                .into_iter()
                .filter_map(|ev| match ev {
                    Event::RadioTransmission { message, .. } => Some(message),
                    _ => None,
                })
                .collect()
        }
    }

    fn quiet_config() -> LocalSimConfig {
        LocalSimConfig {
            scenario: builtin::DEFAULT_SCENARIO.into(),
            prespawn_secs: 0,
            ..Default::default()
        }
    }

    fn start(config: LocalSimConfig, seed: u64) -> Session {
        let ctx = ManualContext::shared(seed);
        let events = EventStream::new();
        let sub = events.subscribe();
        let sim = LocalSim::new(
            ctx.clone(),
            events.clone(),
            Arc::new(builtin::scenario_group()),
            Arc::new(builtin::database()),
            &config,
        )
        .unwrap();
        Session { ctx, events, sub, sim }
    }

    /// An arrival just north of the approach, tracked by `tracker`.
    fn arrival(callsign: &str, tracker: Option<&str>) -> Aircraft {
        let mut ac = Aircraft::new(callsign, SimTime::ZERO);
        ac.position = Point::new(-122.318, 47.85);
        ac.heading = 164.0;
        ac.altitude = 8000.0;
        ac.ias = 250.0;
        ac.performance = builtin::database().aircraft_performance["B738"].clone();
        ac.tracking_controller = tracker.map(str::to_string);
        ac.flight_plan = Some(FlightPlan {
            rules: FlightRules::Ifr,
            aircraft_type: "B738".into(),
            departure_airport: "KGEG".into(),
            arrival_airport: "KSEA".into(),
            altitude: 12000,
            ..Default::default()
        });
        ac
    }

    // ========================================================================
    // TRACKING AND HANDOFFS
    // ========================================================================

    #[test]
    fn test_unknown_scenario_and_controller() {
        let ctx = ManualContext::shared(1);
        let group = Arc::new(builtin::scenario_group());
        let db = Arc::new(builtin::database());

        let bad = LocalSimConfig {
            scenario: "North Flow".into(),
            ..quiet_config()
        };
        let err = LocalSim::new(ctx.clone(), EventStream::new(), group.clone(), db.clone(), &bad).err();
        assert_eq!(err, Some(AtcError::UnknownScenario("North Flow".into())));

        let bad = LocalSimConfig {
            controller: Some("PDX_APP".into()),
            ..quiet_config()
        };
        let err = LocalSim::new(ctx, EventStream::new(), group, db, &bad).err();
        assert_eq!(err, Some(AtcError::NoController("PDX_APP".into())));
    }

    #[test]
    fn test_initiate_and_drop_track() {
        let mut s = start(quiet_config(), 2);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.insert_aircraft(arrival("UAL7", Some(builtin::CENTER)));

        assert_eq!(s.sim.initiate_track("UAL7"), Err(AtcError::OtherControllerHasTrack));
        assert_eq!(s.sim.initiate_track("NOPE"), Err(AtcError::NoAircraftForCallsign("NOPE".into())));

        s.sim.initiate_track("ASA12").unwrap();
        assert!(s.sim.get_aircraft("ASA12").unwrap().is_tracked_by(builtin::APPROACH));
        assert_eq!(s.sim.initiate_track("ASA12"), Err(AtcError::OtherControllerHasTrack));

        assert_eq!(s.sim.drop_track("UAL7"), Err(AtcError::OtherControllerHasTrack));
        s.sim.drop_track("ASA12").unwrap();
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().tracking_controller, None);

        let events = s.events.get(s.sub);
        assert!(events.contains(&Event::InitiatedTrack {
            callsign: "ASA12".into(),
            controller: builtin::APPROACH.into()
        }));
        assert!(events.contains(&Event::DroppedTrack {
            callsign: "ASA12".into(),
            controller: builtin::APPROACH.into()
        }));
    }

    #[test]
    fn test_handoff_resolves_after_deadline() {
        let mut s = start(quiet_config(), 3);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));

        assert_eq!(
            s.sim.handoff("ASA12", "PDX_APP"),
            Err(AtcError::NoController("PDX_APP".into()))
        );
        // by sector id
        s.sim.handoff("ASA12", "S").unwrap();
        let deadline = s.sim.handoff_deadline("ASA12").unwrap();
        assert!(deadline >= SimTime::from_secs(2) && deadline < SimTime::from_secs(10));

        s.advance(1);
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by(builtin::APPROACH));
        assert_eq!(ac.outbound_handoff_controller.as_deref(), Some(builtin::CENTER));

        s.advance(10);
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by(builtin::CENTER));
        assert_eq!(ac.outbound_handoff_controller, None);
        assert_eq!(s.sim.handoff_deadline("ASA12"), None);
        assert!(s.events.get(s.sub).contains(&Event::AcceptedHandoff {
            callsign: "ASA12".into(),
            controller: builtin::CENTER.into()
        }));
    }

    #[test]
    fn test_departure_climbs_to_filed_altitude_after_handoff() {
        let mut s = start(quiet_config(), 4);
        let mut ac = arrival("ASA12", Some(builtin::APPROACH));
        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.departure_airport = "KSEA".into();
            fp.arrival_airport = "KORD".into();
            fp.altitude = 35000;
        }
        ac.assigned_altitude = Some(10000);
        s.sim.insert_aircraft(ac);

        s.sim.handoff("ASA12", builtin::CENTER).unwrap();
        s.advance(11);
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().assigned_altitude, Some(35000));
    }

    #[test]
    fn test_arrival_released_to_filed_altitude_after_handoff() {
        let mut s = start(quiet_config(), 4);
        let mut ac = arrival("ASA12", Some(builtin::APPROACH));
        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.altitude = 12000;
        }
        ac.assigned_altitude = Some(8000);
        ac.altitude_after_speed = Some(6000);
        s.sim.insert_aircraft(ac);

        s.sim.handoff("ASA12", builtin::CENTER).unwrap();
        s.advance(11);
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by(builtin::CENTER));
        assert_eq!(ac.assigned_altitude, Some(12000));
        assert_eq!(ac.altitude_after_speed, None);
    }

    #[test]
    fn test_handoff_to_own_position_refused() {
        let mut s = start(quiet_config(), 4);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));

        assert_eq!(s.sim.handoff("ASA12", builtin::APPROACH), Err(AtcError::HandoffToSelf));
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.outbound_handoff_controller, None);
        assert_eq!(s.sim.handoff_deadline("ASA12"), None);
    }

    #[test]
    fn test_cancel_handoff_discards_pending_record() {
        let mut s = start(quiet_config(), 5);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));
        s.sim.handoff("ASA12", builtin::CENTER).unwrap();
        s.sim.cancel_handoff("ASA12").unwrap();
        assert_eq!(s.sim.handoff_deadline("ASA12"), None);

        s.advance(15);
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by(builtin::APPROACH));
        assert_eq!(ac.outbound_handoff_controller, None);
    }

    #[test]
    fn test_accept_requires_inbound_offer() {
        let mut s = start(quiet_config(), 6);
        let mut offered = arrival("ASA12", Some(builtin::CENTER));
        offered.inbound_handoff_controller = Some(builtin::APPROACH.into());
        let mut elsewhere = arrival("UAL7", Some(builtin::CENTER));
        elsewhere.inbound_handoff_controller = Some(builtin::DEPARTURE.into());
        s.sim.insert_aircraft(offered);
        s.sim.insert_aircraft(elsewhere);

        assert_eq!(s.sim.accept_handoff("UAL7"), Err(AtcError::NotBeingHandedOffToMe));
        assert_eq!(s.sim.reject_handoff("UAL7"), Err(AtcError::NotBeingHandedOffToMe));
        assert!(s.sim.get_aircraft("UAL7").unwrap().is_tracked_by(builtin::CENTER));

        s.sim.accept_handoff("ASA12").unwrap();
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by(builtin::APPROACH));
        assert_eq!(ac.inbound_handoff_controller, None);
        assert_eq!(s.sim.accept_handoff("ASA12"), Err(AtcError::NotBeingHandedOffToMe));
    }

    #[test]
    fn test_commands_require_track() {
        let mut s = start(quiet_config(), 7);
        s.sim.insert_aircraft(arrival("UAL7", Some(builtin::CENTER)));

        let want = Err(AtcError::OtherControllerHasTrack);
        assert_eq!(s.sim.set_scratchpad("UAL7", "AB"), want);
        assert_eq!(s.sim.set_squawk("UAL7", Squawk(0o1200)), want);
        assert_eq!(s.sim.set_temporary_altitude("UAL7", 5000), want);
        assert_eq!(s.sim.cancel_handoff("UAL7"), want);
        assert_eq!(s.sim.handoff("UAL7", builtin::TOWER), want);
        assert_eq!(s.sim.amend_flight_plan("UAL7", FlightPlan::default()), want);
        assert_eq!(s.sim.set_squawk_automatic("UAL7"), Err(AtcError::OtherControllerHasTrack));
    }

    #[test]
    fn test_scratchpad_too_long_is_rejected() {
        let mut s = start(quiet_config(), 8);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));
        s.sim.set_scratchpad("ASA12", "I6R").unwrap();

        assert_eq!(s.sim.set_scratchpad("ASA12", "ILS16R"), Err(AtcError::ScratchpadTooLong));
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().scratchpad, "I6R");
    }

    #[test]
    fn test_automatic_squawk_uses_own_range() {
        let mut s = start(quiet_config(), 9);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));
        let mut vfr = arrival("N123AB", Some(builtin::APPROACH));
        if let Some(fp) = vfr.flight_plan.as_mut() {
            fp.rules = FlightRules::Vfr;
        }
        s.sim.insert_aircraft(vfr);
        let mut unfiled = arrival("N456CD", Some(builtin::APPROACH));
        unfiled.flight_plan = None;
        s.sim.insert_aircraft(unfiled);

        let code = s.sim.set_squawk_automatic("ASA12").unwrap();
        assert!(code >= Squawk(0o4201) && code < Squawk(0o4277));
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().assigned_squawk, code);

        assert_eq!(s.sim.set_squawk_automatic("N123AB"), Err(AtcError::NonIfrSquawk));
        assert_eq!(s.sim.set_squawk_automatic("N456CD"), Err(AtcError::NoFlightPlanFiled));
    }

    #[test]
    fn test_amend_flight_plan_replaces_plan() {
        let mut s = start(quiet_config(), 10);
        s.sim.insert_aircraft(arrival("ASA12", Some(builtin::APPROACH)));
        let mut plan = s.sim.get_aircraft("ASA12").unwrap().flight_plan.clone().unwrap();
        plan.altitude = 9000;
        plan.remarks = "/v/".into();
        s.sim.amend_flight_plan("ASA12", plan.clone()).unwrap();
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().flight_plan, Some(plan));
    }

    // ========================================================================
    // PILOT INSTRUCTIONS
    // ========================================================================

    #[test]
    fn test_altitude_deferred_while_speed_pending() {
        let mut s = start(quiet_config(), 11);
        s.sim.insert_aircraft(arrival("ASA12", None));

        s.sim.assign_speed("ASA12", 210).unwrap();
        s.sim.assign_altitude("ASA12", 5000).unwrap();
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.assigned_altitude, None);
        assert_eq!(ac.altitude_after_speed, Some(5000));
        assert_eq!(s.radio(), vec!["maintain 210 knots", "descend and maintain 5000"]);

        s.advance(40);
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.assigned_altitude, Some(5000));
        assert!(ac.altitude < 8000.0);
    }

    #[test]
    fn test_speed_outside_envelope_is_unable() {
        let mut s = start(quiet_config(), 12);
        s.sim.insert_aircraft(arrival("ASA12", None));

        let err = s.sim.assign_speed("ASA12", 120).unwrap_err();
        assert!(matches!(err, AtcError::UnableCommand(_)));
        assert_eq!(s.radio(), vec!["unable--our minimum speed is 145 knots"]);
        assert!(s.sim.assign_speed("ASA12", 400).is_err());
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().assigned_speed, None);
    }

    #[test]
    fn test_turns_wrap_headings() {
        let mut s = start(quiet_config(), 13);
        let mut ac = arrival("ASA12", None);
        ac.heading = 20.0;
        s.sim.insert_aircraft(ac);

        s.sim.turn_left("ASA12", 30).unwrap();
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.assigned_heading, Some(350));
        assert_eq!(ac.turn_direction, Some(TurnDirection::Left));

        s.sim.turn_right("ASA12", 10).unwrap();
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().assigned_heading, Some(360));

        s.sim.assign_heading("ASA12", Some(0), None).unwrap();
        assert_eq!(s.sim.get_aircraft("ASA12").unwrap().assigned_heading, Some(360));
        assert!(s.sim.assign_heading("ASA12", Some(400), None).is_err());
    }

    #[test]
    fn test_direct_fix() {
        let mut s = start(quiet_config(), 14);
        let mut ac = arrival("ASA12", None);
        let group = builtin::scenario_group();
        ac.waypoints = group.arrival_groups["GLASR"][0].waypoints.clone();
        ac.assigned_heading = Some(200);
        s.sim.insert_aircraft(ac);

        assert_eq!(s.sim.direct_fix("ASA12", "FOURT"), Err(AtcError::FixNotInRoute("FOURT".into())));
        s.sim.direct_fix("ASA12", "chins").unwrap();
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.assigned_heading, None);
        let fixes: Vec<&str> = ac.waypoints.iter().map(|wp| wp.fix.as_str()).collect();
        assert_eq!(fixes, vec!["CHINS", "JAWBN"]);
        assert_eq!(s.radio(), vec!["direct CHINS"]);
    }

    // ========================================================================
    // APPROACHES
    // ========================================================================

    #[test]
    fn test_ils_clearance_needs_heading_or_direct() {
        let mut s = start(quiet_config(), 15);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.expect_approach("ASA12", "I16R").unwrap();

        assert_eq!(s.sim.cleared_approach("ASA12", "I16R"), Ok(false));
        assert!(!s.sim.get_aircraft("ASA12").unwrap().cleared_approach);

        s.sim.direct_fix("ASA12", "JAWBN").unwrap();
        assert_eq!(s.sim.cleared_approach("ASA12", "I16R"), Ok(true));
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        assert!(ac.cleared_approach);
        let fixes: Vec<&str> = ac.waypoints.iter().map(|wp| wp.fix.as_str()).collect();
        assert_eq!(fixes, vec!["JAWBN", "FOURT", "_KSEA_16R"]);
        assert_eq!(ac.crossing_speed, Some(250));

        let radio = s.radio();
        assert_eq!(radio.last().map(String::as_str), Some("cleared ILS Runway 16R approach"));
        assert!(radio.iter().any(|m| m == "we need either direct or a heading to intercept"));
    }

    #[test]
    fn test_ils_clearance_on_vector() {
        let mut s = start(quiet_config(), 16);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.assign_heading("ASA12", Some(190), Some(TurnDirection::Right)).unwrap();

        assert_eq!(s.sim.cleared_approach("ASA12", "I16R"), Ok(true));
        let radio = s.radio();
        assert!(radio.last().unwrap().starts_with("you never told us to expect an approach"));
        assert!(s.sim.get_aircraft("ASA12").unwrap().cleared_approach);

        // A new heading cancels the clearance.
        s.sim.assign_heading("ASA12", Some(250), None).unwrap();
        assert!(!s.sim.get_aircraft("ASA12").unwrap().cleared_approach);
    }

    #[test]
    fn test_rnav_clearance_needs_direct() {
        let mut s = start(quiet_config(), 17);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.expect_approach("ASA12", "R16C").unwrap();
        s.sim.assign_heading("ASA12", Some(180), None).unwrap();

        assert_eq!(s.sim.cleared_approach("ASA12", "R16C"), Ok(false));
        s.sim.direct_fix("ASA12", "SUNED").unwrap();
        assert_eq!(s.sim.cleared_approach("ASA12", "R16C"), Ok(true));
        let ac = s.sim.get_aircraft("ASA12").unwrap();
        let fixes: Vec<&str> = ac.waypoints.iter().map(|wp| wp.fix.as_str()).collect();
        assert_eq!(fixes, vec!["SUNED", "_KSEA_16C"]);
        assert_eq!(ac.crossing_speed, Some(170));
    }

    #[test]
    fn test_cleared_for_unexpected_approach() {
        let mut s = start(quiet_config(), 18);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.expect_approach("ASA12", "I16R").unwrap();

        assert_eq!(
            s.sim.cleared_approach("ASA12", "R16C"),
            Err(AtcError::ClearedForUnexpectedApproach)
        );
        assert_eq!(
            s.sim.cleared_approach("ASA12", "I34L"),
            Err(AtcError::UnknownApproach("I34L".into()))
        );
        assert!(!s.sim.get_aircraft("ASA12").unwrap().cleared_approach);
    }

    #[test]
    fn test_approach_to_unknown_airport() {
        let mut s = start(quiet_config(), 19);
        let mut ac = arrival("ASA12", None);
        if let Some(fp) = ac.flight_plan.as_mut() {
            fp.arrival_airport = "KPDX".into();
        }
        s.sim.insert_aircraft(ac);
        assert_eq!(
            s.sim.expect_approach("ASA12", "I16R"),
            Err(AtcError::ArrivalAirportUnknown("KPDX".into()))
        );
    }

    #[test]
    fn test_flagged_arrival_goes_around() {
        let mut s = start(quiet_config(), 20);
        let group = builtin::scenario_group();
        let approach = group.airports["KSEA"].approaches["I16R"].clone();

        let mut ac = arrival("ASA12", None);
        ac.position = Point::new(-122.3178, 47.4805);
        ac.altitude = 1000.0;
        ac.ias = 145.0;
        ac.waypoints = vec![approach.waypoints[0][2].clone()];
        ac.approach = Some(approach);
        ac.cleared_approach = true;
        s.sim.insert_aircraft(ac);
        s.sim.will_go_around.insert("ASA12".into());

        s.advance(60);
        let ac = s.sim.get_aircraft("ASA12").expect("went around instead of landing");
        assert!(!ac.cleared_approach);
        assert_eq!(ac.assigned_altitude, Some(crate::kinematics::GO_AROUND_ALTITUDE));
        assert!(!s.sim.will_go_around("ASA12"));
        assert!(s.radio().iter().any(|m| m == "Going around"));
    }

    #[test]
    fn test_unflagged_arrival_lands() {
        let mut s = start(quiet_config(), 21);
        let group = builtin::scenario_group();
        let approach = group.airports["KSEA"].approaches["I16R"].clone();

        let mut ac = arrival("ASA12", None);
        ac.position = Point::new(-122.3178, 47.4805);
        ac.altitude = 1000.0;
        ac.ias = 145.0;
        ac.waypoints = vec![approach.waypoints[0][2].clone()];
        ac.approach = Some(approach);
        ac.cleared_approach = true;
        s.sim.insert_aircraft(ac);

        s.advance(60);
        assert!(s.sim.get_aircraft("ASA12").is_none());
        assert!(s.events.get(s.sub).contains(&Event::RemovedAircraft {
            callsign: "ASA12".into()
        }));
    }

    // ========================================================================
    // SESSION
    // ========================================================================

    #[test]
    fn test_prespawn_and_traffic() {
        let config = LocalSimConfig {
            prespawn_secs: 3600,
            ..LocalSimConfig::for_scenario(&builtin::scenario_group(), builtin::DEFAULT_SCENARIO).unwrap()
        };
        let s = start(config, 22);
        assert_eq!(s.sim.current_time(), SimTime::from_secs(3600));
        assert!(!s.sim.get_all_aircraft().is_empty());
        for ac in s.sim.get_all_aircraft() {
            assert!(!ac.tracks.is_empty());
            assert!(ac.tracking_controller.is_some());
        }
        assert!(s.sim.get_metar("KSEA").unwrap().raw.starts_with("KSEA "));
    }

    #[test]
    fn test_pause_freezes_time_but_not_commands() {
        let config = LocalSimConfig::for_scenario(&builtin::scenario_group(), builtin::DEFAULT_SCENARIO).unwrap();
        let mut s = start(config, 23);
        s.sim.insert_aircraft(arrival("ZZZ1", Some(builtin::APPROACH)));
        s.sim.handoff("ZZZ1", builtin::CENTER).unwrap();

        assert!(s.sim.toggle_pause());
        let before = s.sim.get_all_aircraft().len();
        let t0 = s.sim.current_time();
        s.advance(3600);
        assert_eq!(s.sim.current_time(), t0);
        assert_eq!(s.sim.get_all_aircraft().len(), before);
        assert!(s.sim.get_aircraft("ZZZ1").unwrap().is_tracked_by(builtin::APPROACH));

        s.sim.set_scratchpad("ZZZ1", "X").unwrap();
        assert_eq!(s.sim.get_aircraft("ZZZ1").unwrap().scratchpad, "X");

        assert!(!s.sim.toggle_pause());
        s.advance(11);
        assert_eq!(s.sim.current_time(), t0 + Duration::from_secs(11));
        assert!(s.sim.get_aircraft("ZZZ1").unwrap().is_tracked_by(builtin::CENTER));
    }

    #[test]
    fn test_sim_rate_change_has_no_time_jump() {
        let mut s = start(quiet_config(), 24);
        s.advance(10);
        s.ctx.advance_time(Duration::from_secs(5));
        s.sim.set_sim_rate(4.0);
        s.sim.update();
        assert_eq!(s.sim.current_time(), SimTime::from_secs(10));

        s.advance(2);
        assert_eq!(s.sim.current_time(), SimTime::from_secs(18));
    }

    #[test]
    fn test_disconnect_removes_every_aircraft_once() {
        let config = LocalSimConfig {
            prespawn_secs: 1800,
            ..LocalSimConfig::for_scenario(&builtin::scenario_group(), builtin::DEFAULT_SCENARIO).unwrap()
        };
        let mut s = start(config, 25);
        s.events.get(s.sub);
        let callsigns: Vec<String> = s.sim.get_all_aircraft().iter().map(|ac| ac.callsign.clone()).collect();
        assert!(!callsigns.is_empty());

        s.sim.disconnect();
        let removed: Vec<String> = s
            .events
            .get(s.sub)
            .into_iter()
            .filter_map(|ev| match ev {
                Event::RemovedAircraft { callsign } => Some(callsign),
                _ => None,
            })
            .collect();
        assert_eq!(removed, callsigns);
        assert!(s.sim.get_all_aircraft().is_empty());
        assert!(!s.sim.connected());

        s.advance(3600);
        assert!(s.sim.get_all_aircraft().is_empty());
    }

    #[test]
    fn test_describe_and_delete() {
        let mut s = start(quiet_config(), 26);
        s.sim.insert_aircraft(arrival("ASA12", None));
        s.sim.assign_heading("ASA12", Some(90), Some(TurnDirection::Left)).unwrap();

        let text = s.sim.describe("ASA12").unwrap();
        assert!(text.starts_with("ASA12: current alt 8000"));
        assert!(text.contains("heading 090 turn left"));

        s.sim.delete_aircraft("ASA12").unwrap();
        assert_eq!(s.sim.describe("ASA12"), Err(AtcError::NoAircraftForCallsign("ASA12".into())));
        assert_eq!(s.sim.delete_aircraft("ASA12"), Err(AtcError::NoAircraftForCallsign("ASA12".into())));
    }

    #[test]
    fn test_controllers_limited_to_scenario() {
        let s = start(
            LocalSimConfig {
                scenario: builtin::MIXED_SCENARIO.into(),
                ..quiet_config()
            },
            27,
        );
        let all: Vec<&str> = s.sim.get_all_controllers().iter().map(|c| c.callsign.as_str()).collect();
        assert_eq!(all, vec![builtin::APPROACH, builtin::CENTER, builtin::TOWER]);
        // SEA_DEP is not staffed in this scenario, so its sector id does not resolve.
        assert!(s.sim.get_controller("21").is_none());
        assert!(s.sim.get_controller("S").is_some());
    }
}
