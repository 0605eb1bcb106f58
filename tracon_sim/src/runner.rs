//! Scenario runner - executes session check scenarios.

use crate::exporter::SimExport;
use crate::network::SimNetwork;
use crate::scenarios::ScenarioId;
use crate::world::{Backend, SimConfig, SimWorld};

use geo::Point;
use tracing::{debug, info, warn};
use tracon_core::builtin;
use tracon_core::{Aircraft, AtcError, CommandService, Event, FlightPlan, FlightRules, WireMessage};
use tracon_env::SessionContext;

const HOME_AIRPORT: &str = "KSEA";

/// How long the pause scenario holds the session paused.
const PAUSE_SECS: f64 = 600.0;

/// Handoffs are accepted within 10 s; allow some slack for the tick.
const HANDOFF_WAIT_SECS: f64 = 15.0;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final session time in seconds
    pub final_time_secs: f64,

    /// Number of aircraft in the registry at the end
    pub final_aircraft_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,

    /// Timeline, when the runner was asked to export
    pub export: Option<SimExport>,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    pub aircraft_added: u64,
    pub aircraft_removed: u64,
    pub handoffs_accepted: u64,

    /// Commands issued by the scenario, and how many were refused
    pub commands_issued: u64,
    pub commands_rejected: u64,

    /// Wire lines the peer delivered to the session
    pub lines_from_peer: u64,

    /// Messages the session sent to the peer
    pub messages_to_peer: u64,
}

impl ScenarioMetrics {
    fn count(&mut self, events: &[Event]) {
        for event in events {
            match event {
                Event::AddedAircraft { .. } => self.aircraft_added += 1,
                Event::RemovedAircraft { .. } => self.aircraft_removed += 1,
                Event::AcceptedHandoff { .. } => self.handoffs_accepted += 1,
                _ => {}
            }
        }
    }

    fn command<T>(&mut self, result: &Result<T, AtcError>) {
        self.commands_issued += 1;
        if result.is_err() {
            self.commands_rejected += 1;
        }
    }

    fn network(&mut self, peer: Option<&SimNetwork>) {
        if let Some(peer) = peer {
            self.lines_from_peer += peer.lines_delivered();
            self.messages_to_peer += peer.received().len() as u64;
        }
    }
}

/// Runs check scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Radar frame export interval in ticks (0 = none)
    export_interval_ticks: u64,
}

fn ensure(ok: bool, reason: impl FnOnce() -> String) -> Result<(), String> {
    if ok {
        Ok(())
    } else {
        Err(reason())
    }
}

fn added(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            Event::AddedAircraft { callsign } => Some(callsign.clone()),
            _ => None,
        })
        .collect()
}

fn offered_to_me(world: &SimWorld) -> Option<String> {
    let service = world.service();
    let me = service.callsign();
    service
        .get_all_aircraft()
        .into_iter()
        .find(|ac| ac.is_offered_to(me))
        .map(|ac| ac.callsign.clone())
}

fn tracked_by(world: &SimWorld, callsign: &str, controller: &str) -> bool {
    world
        .service()
        .get_aircraft(callsign)
        .map_or(false, |ac| ac.is_tracked_by(controller))
}

/// A departure from the home airport that `controller` tracks.
fn departure_tracked_by<'a>(world: &'a SimWorld, controller: &str) -> Option<&'a Aircraft> {
    world.service().get_all_aircraft().into_iter().find(|ac| {
        ac.is_tracked_by(controller)
            && ac
                .flight_plan
                .as_ref()
                .map_or(false, |fp| fp.departure_airport == HOME_AIRPORT)
    })
}

fn peer(world: &mut SimWorld) -> Result<&mut SimNetwork, String> {
    world
        .network_mut()
        .ok_or_else(|| "session has no network peer".to_string())
}

fn arrival_plan() -> FlightPlan {
    FlightPlan {
        rules: FlightRules::Ifr,
        aircraft_type: "B738".into(),
        tas: 450,
        departure_airport: "KGEG".into(),
        altitude: 12000,
        arrival_airport: HOME_AIRPORT.into(),
        route: "GLASR3".into(),
        ..Default::default()
    }
}

fn airport_location() -> Point<f64> {
    Point::new(-122.3093, 47.4490)
}

/// Tracking and handoff state of one aircraft, as the scope shows it.
#[derive(Debug, Clone, PartialEq)]
struct ControlState {
    tracking: Option<String>,
    outbound: Option<String>,
    inbound: Option<String>,
    scratchpad: String,
}

fn control_state(world: &SimWorld, callsign: &str) -> Option<ControlState> {
    world.service().get_aircraft(callsign).map(|ac| ControlState {
        tracking: ac.tracking_controller.clone(),
        outbound: ac.outbound_handoff_controller.clone(),
        inbound: ac.inbound_handoff_controller.clone(),
        scratchpad: ac.scratchpad.clone(),
    })
}

/// One command of the parity sequence.
#[derive(Debug, Clone, Copy)]
enum Step {
    Scratchpad(&'static str),
    Accept,
    Handoff(&'static str),
    Cancel,
    Drop,
    Initiate,

    /// Tick until the pending handoff is accepted
    AwaitAccept,
}

const PARITY_STEPS: [Step; 10] = [
    Step::Scratchpad("SUM"),
    Step::Scratchpad("SUMMA"),
    Step::Accept,
    Step::Handoff(builtin::CENTER),
    Step::Cancel,
    Step::Drop,
    Step::Initiate,
    Step::Handoff(builtin::CENTER),
    Step::AwaitAccept,
    Step::Scratchpad("X"),
];

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 1,
            max_duration_secs: 900.0,
            export_interval_ticks: 0,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Exports a radar frame every `ticks` ticks.
    pub fn with_export(mut self, ticks: u64) -> Self {
        self.export_interval_ticks = ticks;
        self
    }

    fn config(&self, backend: Backend) -> SimConfig {
        SimConfig {
            seed: self.seed,
            tick_rate_hz: self.tick_rate_hz,
            backend,
            export_interval_ticks: self.export_interval_ticks,
            ..Default::default()
        }
    }

    fn config_for(&self, scenario: ScenarioId) -> SimConfig {
        match scenario {
            ScenarioId::ProtocolHandoff | ScenarioId::StaleEviction => self.config(Backend::Protocol),
            ScenarioId::GoAround => SimConfig {
                go_around_rate: 1.0,
                ..self.config(Backend::Local)
            },
            _ => self.config(Backend::Local),
        }
    }

    /// Run length for traffic scenarios; they need a few spawn intervals.
    fn traffic_secs(&self) -> f64 {
        self.max_duration_secs.max(600.0)
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut world = match SimWorld::new(self.config_for(scenario)) {
            Ok(world) => world,
            Err(err) => {
                warn!("{}: session did not start: {}", scenario.name(), err);
                return ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_ticks: 0,
                    final_time_secs: 0.0,
                    final_aircraft_count: 0,
                    failure_reason: Some(format!("session did not start: {}", err)),
                    metrics: ScenarioMetrics::default(),
                    export: None,
                };
            }
        };

        let mut metrics = ScenarioMetrics::default();
        let verdict = match scenario {
            ScenarioId::ArrivalVolume => self.run_arrival_volume(&mut world, &mut metrics),
            ScenarioId::DepartureSequencing => self.run_departure_sequencing(&mut world, &mut metrics),
            ScenarioId::HandoffFlow => self.run_handoff_flow(&mut world, &mut metrics),
            ScenarioId::PauseFreeze => self.run_pause_freeze(&mut world, &mut metrics),
            ScenarioId::GoAround => self.run_go_around(&mut world, &mut metrics),
            ScenarioId::ProtocolHandoff => self.run_protocol_handoff(&mut world, &mut metrics),
            ScenarioId::StaleEviction => self.run_stale_eviction(&mut world, &mut metrics),
            ScenarioId::BackendParity => self.run_backend_parity(&mut world, &mut metrics),
        };
        metrics.network(world.network());

        let passed = verdict.is_ok();
        let failure_reason = verdict.err();
        let export = world.take_export().map(|mut export| {
            export.scenario = scenario.name().to_string();
            export.finalize(passed, failure_reason.clone());
            export
        });

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_ticks: world.tick_count(),
            final_time_secs: world.session_time(),
            final_aircraft_count: world.aircraft_count(),
            failure_reason,
            metrics,
            export,
        }
    }

    fn ticks(&self, secs: f64) -> u64 {
        (secs * f64::from(self.tick_rate_hz)).ceil() as u64
    }

    /// TRC-001: ArrivalVolume - spawned arrivals are well-formed.
    ///
    /// **Assertion**: every arrival has an IFR plan to the home airport and
    /// a tracking controller, and at least two arrive in ten minutes.
    fn run_arrival_volume(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-001: ArrivalVolume");
        let mut arrivals = 0;

        for _ in 0..self.ticks(self.traffic_secs()) {
            let events = world.tick();
            m.count(&events);
            for callsign in added(&events) {
                let Some(ac) = world.service().get_aircraft(&callsign) else {
                    continue;
                };
                let fp = ac
                    .flight_plan
                    .as_ref()
                    .ok_or_else(|| format!("{} spawned without a flight plan", callsign))?;
                if fp.arrival_airport != HOME_AIRPORT {
                    continue;
                }
                arrivals += 1;
                debug!("{}: arrival from {} at {:.0} ft", callsign, fp.departure_airport, ac.altitude);
                ensure(fp.rules == FlightRules::Ifr, || format!("{} is not IFR", callsign))?;
                ensure(ac.tracking_controller.is_some(), || format!("{} spawned untracked", callsign))?;
            }
        }

        info!("  {} arrivals spawned", arrivals);
        ensure(arrivals >= 2, || format!("only {} arrivals spawned", arrivals))
    }

    /// TRC-002: DepartureSequencing - departures start under control.
    ///
    /// **Assertion**: each departure is tracked by the airport's
    /// departure controller, cleared to the exit route altitude, and filed
    /// for a cruise level in the flight levels.
    fn run_departure_sequencing(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-002: DepartureSequencing");
        let mut departures = 0;

        for _ in 0..self.ticks(self.traffic_secs()) {
            let events = world.tick();
            m.count(&events);
            for callsign in added(&events) {
                let Some(ac) = world.service().get_aircraft(&callsign) else {
                    continue;
                };
                let Some(fp) = ac.flight_plan.as_ref().filter(|fp| fp.departure_airport == HOME_AIRPORT) else {
                    continue;
                };
                departures += 1;
                debug!("{}: departure to {} filed {}", callsign, fp.arrival_airport, fp.altitude);
                ensure(ac.is_tracked_by(builtin::APPROACH), || {
                    format!("{} tracked by {:?}", callsign, ac.tracking_controller)
                })?;
                ensure(ac.assigned_altitude == Some(10000), || {
                    format!("{} cleared to {:?}", callsign, ac.assigned_altitude)
                })?;
                ensure(fp.altitude >= 18000, || format!("{} filed {}", callsign, fp.altitude))?;
            }
        }

        info!("  {} departures spawned", departures);
        ensure(departures >= 2, || format!("only {} departures spawned", departures))
    }

    /// TRC-003: HandoffFlow - take an arrival from center, give it to tower.
    ///
    /// **Assertion**: acceptance makes us the tracker at once; the tower
    /// accepts our handoff within 2-10 s.
    fn run_handoff_flow(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-003: HandoffFlow");
        let me = world.service().callsign().to_string();

        let (events, found) = world.run_until(self.traffic_secs(), |w| offered_to_me(w).is_some());
        m.count(&events);
        ensure(found, || "no aircraft was offered to us".to_string())?;
        let callsign = offered_to_me(world).ok_or_else(|| "offer vanished".to_string())?;
        info!("  {} offered at t={:.0}s", callsign, world.session_time());

        let result = world.service_mut().accept_handoff(&callsign);
        m.command(&result);
        result.map_err(|err| format!("accept_handoff: {}", err))?;
        ensure(tracked_by(world, &callsign, &me), || format!("{} not tracked after accept", callsign))?;
        let events = world.take_events();
        m.count(&events);
        ensure(
            events.contains(&Event::AcceptedHandoff {
                callsign: callsign.clone(),
                controller: me.clone(),
            }),
            || "no AcceptedHandoff for our accept".to_string(),
        )?;

        let result = world.service_mut().handoff(&callsign, builtin::TOWER);
        m.command(&result);
        result.map_err(|err| format!("handoff: {}", err))?;
        let offered_at = world.service().current_time();
        let deadline = world
            .local()
            .and_then(|sim| sim.handoff_deadline(&callsign))
            .ok_or_else(|| "no acceptance timer armed".to_string())?;
        let delay = deadline.since(offered_at).as_secs_f64();
        ensure((2.0..10.0).contains(&delay), || format!("acceptance delay {:.2}s", delay))?;

        let (events, accepted) = world.run_until(HANDOFF_WAIT_SECS, |w| tracked_by(w, &callsign, builtin::TOWER));
        m.count(&events);
        ensure(accepted, || format!("{} never accepted by tower", callsign))?;
        ensure(
            events.contains(&Event::AcceptedHandoff {
                callsign: callsign.clone(),
                controller: builtin::TOWER.to_string(),
            }),
            || "no AcceptedHandoff for tower".to_string(),
        )
    }

    /// TRC-004: PauseFreeze - nothing moves while paused.
    ///
    /// **Assertion**: session time, spawns, and positions stand still for
    /// ten paused minutes; commands still apply; time resumes afterwards.
    fn run_pause_freeze(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-004: PauseFreeze");
        let me = world.service().callsign().to_string();

        let (events, found) = world.run_until(self.traffic_secs(), |w| {
            offered_to_me(w).is_some() || w.service().get_all_aircraft().iter().any(|ac| ac.is_tracked_by(&me))
        });
        m.count(&events);
        ensure(found, || "no aircraft to work".to_string())?;
        if let Some(offered) = offered_to_me(world) {
            let result = world.service_mut().accept_handoff(&offered);
            m.command(&result);
            result.map_err(|err| format!("accept_handoff: {}", err))?;
        }
        let callsign = world
            .service()
            .get_all_aircraft()
            .into_iter()
            .find(|ac| ac.is_tracked_by(&me))
            .map(|ac| ac.callsign.clone())
            .ok_or_else(|| "no tracked aircraft".to_string())?;

        let frozen_at = world.session_time();
        let position = world.service().get_aircraft(&callsign).map(|ac| ac.position);
        let sim = world.local_mut().ok_or_else(|| "not a local session".to_string())?;
        ensure(sim.toggle_pause(), || "pause did not engage".to_string())?;

        let events = world.run_for(PAUSE_SECS);
        m.count(&events);
        ensure(added(&events).is_empty(), || format!("{} aircraft spawned while paused", added(&events).len()))?;
        ensure(world.session_time() == frozen_at, || {
            format!("clock moved from {:.1} to {:.1}", frozen_at, world.session_time())
        })?;
        ensure(
            world.service().get_aircraft(&callsign).map(|ac| ac.position) == position,
            || format!("{} moved while paused", callsign),
        )?;

        let result = world.service_mut().set_scratchpad(&callsign, "PZ");
        m.command(&result);
        result.map_err(|err| format!("set_scratchpad while paused: {}", err))?;
        ensure(
            world.service().get_aircraft(&callsign).map(|ac| ac.scratchpad.as_str()) == Some("PZ"),
            || "scratchpad not applied".to_string(),
        )?;

        let sim = world.local_mut().ok_or_else(|| "not a local session".to_string())?;
        ensure(!sim.toggle_pause(), || "pause did not release".to_string())?;
        let events = world.run_for(30.0);
        m.count(&events);
        ensure(world.session_time() >= frozen_at + 29.0, || "clock did not resume".to_string())
    }

    /// TRC-005: GoAround - the go-around flag follows the configured rate.
    ///
    /// **Assertion**: with rate 1.0 every arrival is flagged; a second
    /// session with rate 0.0 flags none; departures are never flagged.
    fn run_go_around(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-005: GoAround");
        let secs = self.traffic_secs();

        let tally = |world: &mut SimWorld, m: &mut ScenarioMetrics| -> Result<(usize, usize), String> {
            let (mut flagged, mut arrivals) = (0, 0);
            for _ in 0..self.ticks(secs) {
                let events = world.tick();
                m.count(&events);
                for callsign in added(&events) {
                    let sim = world.local().ok_or_else(|| "not a local session".to_string())?;
                    let Some(fp) = sim.get_aircraft(&callsign).and_then(|ac| ac.flight_plan.as_ref()) else {
                        continue;
                    };
                    let arrival = fp.arrival_airport == HOME_AIRPORT;
                    let flag = sim.will_go_around(&callsign);
                    ensure(arrival || !flag, || format!("departure {} flagged", callsign))?;
                    if arrival {
                        arrivals += 1;
                        flagged += usize::from(flag);
                    }
                }
            }
            Ok((flagged, arrivals))
        };

        let (flagged, arrivals) = tally(world, m)?;
        info!("  rate 1.0: {}/{} arrivals flagged", flagged, arrivals);
        ensure(arrivals > 0, || "no arrivals spawned".to_string())?;
        ensure(flagged == arrivals, || format!("{} of {} arrivals flagged", flagged, arrivals))?;

        let mut calm = SimWorld::new(SimConfig {
            go_around_rate: 0.0,
            export_interval_ticks: 0,
            ..world.config.clone()
        })
        .map_err(|err| format!("second session did not start: {}", err))?;
        let (flagged, arrivals) = tally(&mut calm, m)?;
        info!("  rate 0.0: {}/{} arrivals flagged", flagged, arrivals);
        ensure(arrivals > 0, || "no arrivals spawned at rate 0.0".to_string())?;
        ensure(flagged == 0, || format!("{} arrivals flagged at rate 0.0", flagged))
    }

    /// TRC-006: ProtocolHandoff - handoffs in both directions over the wire.
    ///
    /// **Assertion**: the peer's offer is accepted with a `$HA` line back to
    /// the peer; our offer is accepted by the peer within 2-10 s and the
    /// outbound handoff clears.
    fn run_protocol_handoff(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-006: ProtocolHandoff");
        let me = world.service().callsign().to_string();
        let callsign = "ASA12";

        let now = world.context.now();
        let network = peer(world)?;
        network.sign_on(airport_location(), now);
        network.add_aircraft(callsign, arrival_plan(), Point::new(-122.1, 47.9), 11000, 280, 200.0, now);
        network.initiate_track(callsign, now);
        m.count(&world.tick());
        ensure(tracked_by(world, callsign, builtin::CENTER), || "peer track not applied".to_string())?;

        let now = world.context.now();
        peer(world)?.offer_handoff(callsign, &me, now);
        let (events, offered) = world.run_until(HANDOFF_WAIT_SECS, |w| offered_to_me(w).is_some());
        m.count(&events);
        ensure(offered, || "peer offer never arrived".to_string())?;

        let result = world.service_mut().accept_handoff(callsign);
        m.command(&result);
        result.map_err(|err| format!("accept_handoff: {}", err))?;
        ensure(tracked_by(world, callsign, &me), || "accept not applied".to_string())?;
        m.count(&world.tick());
        let accept = WireMessage::HandoffAccept {
            from: me.clone(),
            to: builtin::CENTER.to_string(),
            callsign: callsign.to_string(),
        };
        ensure(
            world.network().map_or(false, |n| n.received().contains(&accept)),
            || "peer never saw our accept".to_string(),
        )?;

        let result = world.service_mut().handoff(callsign, builtin::CENTER);
        m.command(&result);
        result.map_err(|err| format!("handoff: {}", err))?;
        let (events, accepted) = world.run_until(HANDOFF_WAIT_SECS, |w| tracked_by(w, callsign, builtin::CENTER));
        m.count(&events);
        ensure(accepted, || "peer never accepted our handoff".to_string())?;
        ensure(
            events.contains(&Event::AcceptedHandoff {
                callsign: callsign.to_string(),
                controller: builtin::CENTER.to_string(),
            }),
            || "no AcceptedHandoff for the peer".to_string(),
        )?;
        ensure(
            control_state(world, callsign).map_or(false, |s| s.outbound.is_none()),
            || "outbound handoff not cleared".to_string(),
        )
    }

    /// TRC-007: StaleEviction - silent traffic leaves once.
    ///
    /// **Assertion**: an aircraft that stops reporting is removed after the
    /// staleness timeout with exactly one removal event; reporting traffic
    /// stays.
    fn run_stale_eviction(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-007: StaleEviction");
        let (silent, talking) = ("ASA12", "UAL7");

        let now = world.context.now();
        let network = peer(world)?;
        network.sign_on(airport_location(), now);
        network.add_aircraft(silent, arrival_plan(), Point::new(-122.1, 47.9), 11000, 280, 200.0, now);
        network.add_aircraft(talking, arrival_plan(), Point::new(-122.6, 46.9), 13000, 300, 20.0, now);
        let mut events = world.run_for(60.0);

        peer(world)?.stop_reporting(silent);
        let heard_until = world.session_time();
        let timeout = 30.0 * 60.0;
        let (more, gone) = world.run_until(timeout + 120.0, |w| w.service().get_aircraft(silent).is_none());
        events.extend(more);
        ensure(gone, || format!("{} still present after {:.0}s", silent, world.session_time()))?;
        let silent_for = world.session_time() - heard_until;
        ensure(silent_for >= timeout - 10.0, || format!("{} evicted after only {:.0}s", silent, silent_for))?;

        events.extend(world.run_for(60.0));
        m.count(&events);
        let removals = |cs: &str| {
            events
                .iter()
                .filter(|ev| matches!(ev, Event::RemovedAircraft { callsign } if callsign == cs))
                .count()
        };
        ensure(removals(silent) == 1, || format!("{} removed {} times", silent, removals(silent)))?;
        ensure(removals(talking) == 0, || format!("{} was removed", talking))?;
        ensure(world.service().get_aircraft(talking).is_some(), || format!("{} missing", talking))
    }

    /// TRC-008: BackendParity - local and network sessions agree.
    ///
    /// **Assertion**: the same command sequence on the same aircraft gives
    /// the same outcome and the same control state on both backends after
    /// every step.
    fn run_backend_parity(&self, world: &mut SimWorld, m: &mut ScenarioMetrics) -> Result<(), String> {
        info!("TRC-008: BackendParity");
        let me = world.service().callsign().to_string();

        let (events, found) = world.run_until(self.traffic_secs(), |w| departure_tracked_by(w, &me).is_some());
        m.count(&events);
        ensure(found, || "no departure to work".to_string())?;
        let ac = departure_tracked_by(world, &me).cloned().ok_or_else(|| "departure vanished".to_string())?;
        let plan = ac.flight_plan.clone().unwrap_or_default();
        info!("  working {} on both backends", ac.callsign);

        let mut remote = SimWorld::new(SimConfig {
            backend: Backend::Protocol,
            export_interval_ticks: 0,
            ..world.config.clone()
        })
        .map_err(|err| format!("network session did not start: {}", err))?;
        let now = remote.context.now();
        let network = peer(&mut remote)?;
        network.sign_on(airport_location(), now);
        network.add_aircraft(
            &ac.callsign,
            plan,
            ac.position,
            ac.altitude.round() as i32,
            ac.gs.round() as i32,
            ac.heading,
            now,
        );
        remote.tick();
        remote
            .service_mut()
            .initiate_track(&ac.callsign)
            .map_err(|err| format!("network setup: {}", err))?;

        for (i, step) in PARITY_STEPS.iter().enumerate() {
            let local_outcome = Self::apply_step(world, &ac.callsign, *step);
            let remote_outcome = Self::apply_step(&mut remote, &ac.callsign, *step);
            m.command(&local_outcome);
            m.command(&remote_outcome);
            debug!("  step {} {:?}: {:?} / {:?}", i, step, local_outcome, remote_outcome);

            ensure(local_outcome == remote_outcome, || {
                format!("step {} {:?}: local {:?}, network {:?}", i, step, local_outcome, remote_outcome)
            })?;
            let (local_state, remote_state) = (control_state(world, &ac.callsign), control_state(&remote, &ac.callsign));
            ensure(local_state == remote_state, || {
                format!("step {} {:?}: local {:?}, network {:?}", i, step, local_state, remote_state)
            })?;
        }
        m.count(&world.take_events());
        m.network(remote.network());
        Ok(())
    }

    fn apply_step(world: &mut SimWorld, callsign: &str, step: Step) -> Result<(), AtcError> {
        let service = world.service_mut();
        match step {
            Step::Scratchpad(text) => service.set_scratchpad(callsign, text),
            Step::Accept => service.accept_handoff(callsign),
            Step::Handoff(to) => service.handoff(callsign, to),
            Step::Cancel => service.cancel_handoff(callsign),
            Step::Drop => service.drop_track(callsign),
            Step::Initiate => service.initiate_track(callsign),
            Step::AwaitAccept => {
                let me = service.callsign().to_string();
                let (_, done) = world.run_until(HANDOFF_WAIT_SECS, |w| {
                    w.service()
                        .get_aircraft(callsign)
                        .map_or(false, |ac| ac.tracking_controller.as_deref() != Some(me.as_str()))
                });
                if done {
                    Ok(())
                } else {
                    Err(AtcError::UnableCommand("handoff not accepted".to_string()))
                }
            }
        }
    }
}
