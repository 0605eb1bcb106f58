//! SimWorld - The session harness container.

use crate::exporter::{AircraftPosition, SimExport, SimFrame};
use crate::network::SimNetwork;

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracon_core::builtin;
use tracon_core::{
    AtcError, CommandService, Event, EventStream, LocalSim, LocalSimConfig, ProtocolAdapter, ProtocolConfig,
    SubscriberId,
};
use tracon_env::{ChannelTransport, ManualContext, SessionContext, DEFAULT_CHANNEL_CAPACITY};

/// Which backend the session runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Built-in scenario, simulated by `LocalSim`
    Local,

    /// `ProtocolAdapter` talking to a scripted `SimNetwork` peer
    Protocol,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Backend::Local => "local",
            Backend::Protocol => "protocol",
        })
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "sim" => Ok(Backend::Local),
            "protocol" | "network" => Ok(Backend::Protocol),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Configuration for a harness run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Ticks per wall second
    pub tick_rate_hz: u32,

    pub backend: Backend,

    /// Built-in scenario for the local backend
    pub scenario: String,

    pub go_around_rate: f32,
    pub sim_rate: f64,

    /// Radar frames are exported every this many ticks (0 = no export)
    pub export_interval_ticks: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 1,
            backend: Backend::Local,
            scenario: builtin::DEFAULT_SCENARIO.to_string(),
            go_around_rate: 0.10,
            sim_rate: 1.0,
            export_interval_ticks: 0,
        }
    }
}

/// The session under test.
pub enum Session {
    Local(LocalSim<ManualContext>),
    Protocol(ProtocolAdapter<ManualContext, ChannelTransport>),
}

/// The SimWorld - one session, its clock, and (for the protocol backend)
/// the peer on the other end of the wire.
pub struct SimWorld {
    pub config: SimConfig,

    /// Shared manual clock
    pub context: Arc<ManualContext>,

    pub events: EventStream,
    subscriber: SubscriberId,

    session: Session,
    network: Option<SimNetwork>,

    export: Option<SimExport>,
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Result<Self, AtcError> {
        let context = ManualContext::shared(config.seed);
        let events = EventStream::new();
        let subscriber = events.subscribe();
        let group = builtin::scenario_group();

        let (session, network) = match config.backend {
            Backend::Local => {
                let sim_config = LocalSimConfig {
                    go_around_rate: config.go_around_rate,
                    sim_rate: config.sim_rate,
                    ..LocalSimConfig::for_scenario(&group, &config.scenario)?
                };
                let sim = LocalSim::new(
                    context.clone(),
                    events.clone(),
                    Arc::new(group),
                    Arc::new(builtin::database()),
                    &sim_config,
                )?;
                (Session::Local(sim), None)
            }
            Backend::Protocol => {
                let me = group
                    .control_positions
                    .get(builtin::APPROACH)
                    .cloned()
                    .ok_or_else(|| AtcError::NoController(builtin::APPROACH.to_string()))?;
                let protocol_config = ProtocolConfig {
                    callsign: me.callsign,
                    name: "Trainee".to_string(),
                    cid: "1000001".to_string(),
                    facility: me.facility,
                    rating: me.rating,
                    frequency: me.frequency,
                    scope_range: me.scope_range,
                    low_squawk: me.low_squawk,
                    high_squawk: me.high_squawk,
                    location: me.location,
                    ..Default::default()
                };
                let (transport, remote) = ChannelTransport::pair(DEFAULT_CHANNEL_CAPACITY);
                let network = SimNetwork::new(remote, builtin::CENTER, config.seed.wrapping_mul(0x9e3779b97f4a7c15));
                let adapter = ProtocolAdapter::connect(context.clone(), events.clone(), transport, protocol_config)?;
                (Session::Protocol(adapter), Some(network))
            }
        };

        let export = (config.export_interval_ticks > 0).then(|| SimExport::new(&config.scenario, config.seed));

        Ok(Self {
            config,
            context,
            events,
            subscriber,
            session,
            network,
            export,
            tick_count: 0,
        })
    }

    pub fn service(&self) -> &dyn CommandService {
        match &self.session {
            Session::Local(sim) => sim,
            Session::Protocol(adapter) => adapter,
        }
    }

    pub fn service_mut(&mut self) -> &mut dyn CommandService {
        match &mut self.session {
            Session::Local(sim) => sim,
            Session::Protocol(adapter) => adapter,
        }
    }

    pub fn local(&self) -> Option<&LocalSim<ManualContext>> {
        match &self.session {
            Session::Local(sim) => Some(sim),
            Session::Protocol(_) => None,
        }
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalSim<ManualContext>> {
        match &mut self.session {
            Session::Local(sim) => Some(sim),
            Session::Protocol(_) => None,
        }
    }

    pub fn network(&self) -> Option<&SimNetwork> {
        self.network.as_ref()
    }

    pub fn network_mut(&mut self) -> Option<&mut SimNetwork> {
        self.network.as_mut()
    }

    /// Advances one tick and returns the events the session posted.
    pub fn tick(&mut self) -> Vec<Event> {
        let dt = 1.0 / f64::from(self.config.tick_rate_hz.max(1));
        self.context.advance_time(Duration::from_secs_f64(dt));
        let now = self.context.now();

        if let Some(network) = self.network.as_mut() {
            network.step(now);
        }
        self.service_mut().update();
        self.tick_count += 1;

        let events = self.take_events();
        if self.export.is_some() && self.tick_count % self.config.export_interval_ticks == 0 {
            let frame = self.frame();
            if let Some(export) = self.export.as_mut() {
                export.add_frame(frame);
            }
        }
        if !events.is_empty() {
            debug!("t={:.0}s: {} events", self.time(), events.len());
        }
        events
    }

    /// Events posted outside a tick (by commands).
    pub fn take_events(&mut self) -> Vec<Event> {
        let events = self.events.get(self.subscriber);
        let time = self.session_time();
        if let Some(export) = self.export.as_mut() {
            for event in &events {
                export.add_event(time, event.clone());
            }
        }
        events
    }

    /// Ticks until `done` holds or `max_secs` of wall time pass.
    ///
    /// Returns every event seen and whether `done` was reached.
    pub fn run_until(&mut self, max_secs: f64, mut done: impl FnMut(&SimWorld) -> bool) -> (Vec<Event>, bool) {
        let ticks = (max_secs * f64::from(self.config.tick_rate_hz.max(1))).ceil() as u64;
        let mut seen = Vec::new();
        for _ in 0..ticks {
            seen.extend(self.tick());
            if done(self) {
                return (seen, true);
            }
        }
        (seen, false)
    }

    /// Ticks for `secs` of wall time.
    pub fn run_for(&mut self, secs: f64) -> Vec<Event> {
        self.run_until(secs, |_| false).0
    }

    /// A radar frame of the current traffic.
    pub fn frame(&self) -> SimFrame {
        SimFrame {
            time_sec: self.session_time(),
            aircraft: self
                .service()
                .get_all_aircraft()
                .into_iter()
                .map(AircraftPosition::new)
                .collect(),
        }
    }

    pub fn take_export(&mut self) -> Option<SimExport> {
        self.export.take()
    }

    /// Wall seconds since the world was created.
    pub fn time(&self) -> f64 {
        self.context.now().as_secs_f64()
    }

    /// The session's own clock, in seconds.
    pub fn session_time(&self) -> f64 {
        self.service().current_time().as_secs_f64()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn aircraft_count(&self) -> usize {
        self.service().get_all_aircraft().len()
    }
}
