//! Network protocol backend.
//!
//! `ProtocolAdapter` mirrors the traffic a network server reports and
//! forwards the user's commands to it. Commands are checked with the same
//! ownership predicates as `LocalSim`, sent on the transport, and applied
//! locally once the line is queued; other controllers' actions arrive as
//! wire lines and are applied during `update`.

use crate::clock::SimTime;
use crate::config::ProtocolConfig;
use crate::error::AtcError;
use crate::events::{Event, EventStream};
use crate::local::SQUAWK_STREAM;
use crate::model::{Aircraft, Controller, FlightPlan, Metar, Pilot, RadarTrack, Squawk};
use crate::protocol::{CcpKind, Dispatcher, WireMessage, ALL_CONTROLLERS, SERVER};
use crate::service::{check_offered_to, check_scratchpad, check_tracked_by, check_untracked, lookup, CommandService};
use crate::squawk::automatic_code;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracon_env::{LineTransport, SessionContext};

/// A controller's ATIS as received so far.
#[derive(Debug, Clone, Default)]
struct Atis {
    lines: Vec<String>,

    /// Set by the end marker; the next text line starts a new ATIS
    complete: bool,
}

pub struct ProtocolAdapter<C: SessionContext, T: LineTransport> {
    ctx: Arc<C>,
    events: EventStream,
    config: ProtocolConfig,
    dispatcher: Dispatcher,

    /// `None` once disconnected
    transport: Option<T>,

    /// Wall time of sign-on; session time counts from here
    connected_at: Duration,

    aircraft: BTreeMap<String, Aircraft>,
    controllers: BTreeMap<String, Controller>,
    pilots: BTreeMap<String, Pilot>,
    metars: BTreeMap<String, Metar>,
    atis: BTreeMap<String, Atis>,
    squawk_rng: ChaCha8Rng,
}

impl<C: SessionContext, T: LineTransport> ProtocolAdapter<C, T> {
    /// Signs on over `transport`.
    pub fn connect(ctx: Arc<C>, events: EventStream, transport: T, config: ProtocolConfig) -> Result<Self, AtcError> {
        let me = Controller {
            callsign: config.callsign.clone(),
            name: config.name.clone(),
            cid: config.cid.clone(),
            rating: config.rating,
            facility: config.facility.clone(),
            frequency: config.frequency.clone(),
            scope_range: config.scope_range,
            low_squawk: config.low_squawk,
            high_squawk: config.high_squawk,
            location: config.location,
            ..Default::default()
        };

        let mut adapter = Self {
            connected_at: ctx.now(),
            squawk_rng: ChaCha8Rng::seed_from_u64(ctx.derive_rng_seed(SQUAWK_STREAM)),
            ctx,
            events,
            dispatcher: Dispatcher::default(),
            transport: Some(transport),
            aircraft: BTreeMap::new(),
            controllers: BTreeMap::new(),
            pilots: BTreeMap::new(),
            metars: BTreeMap::new(),
            atis: BTreeMap::new(),
            config,
        };

        adapter.send(WireMessage::AddController {
            from: me.callsign.clone(),
            to: SERVER.to_string(),
            name: me.name.clone(),
            cid: me.cid.clone(),
            rating: me.rating,
        })?;
        if let Some(location) = me.location {
            adapter.send(WireMessage::ControllerPosition {
                from: me.callsign.clone(),
                frequency: me.frequency.clone(),
                facility: me.facility.clone(),
                scope_range: me.scope_range,
                rating: me.rating,
                location,
            })?;
        }

        info!(
            "{}: connected{}",
            me.callsign,
            if adapter.config.observer { " as observer" } else { "" }
        );
        adapter.controllers.insert(me.callsign.clone(), me);
        Ok(adapter)
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn get_pilot(&self, callsign: &str) -> Option<&Pilot> {
        self.pilots.get(callsign)
    }

    /// The ATIS broadcast by `station`, one line per received text line.
    pub fn get_atis(&self, station: &str) -> Option<String> {
        self.atis.get(station).map(|atis| atis.lines.join("\n"))
    }

    fn me(&self) -> &str {
        &self.config.callsign
    }

    fn session_time(&self, wall: Duration) -> SimTime {
        SimTime::ZERO + wall.saturating_sub(self.connected_at)
    }

    // ========================================================================
    // OUTBOUND
    // ========================================================================

    fn send(&mut self, message: WireMessage) -> Result<(), AtcError> {
        let transport = self.transport.as_mut().ok_or(AtcError::NotConnected)?;
        let line = message.encode();
        debug!("protocol: send {}", line);
        transport.send(line).map_err(|err| {
            warn!("protocol: send failed: {}", err);
            AtcError::NotConnected
        })
    }

    fn ccp(&self, to: &str, kind: CcpKind, callsign: &str, argument: impl Into<String>) -> WireMessage {
        WireMessage::Ccp {
            from: self.me().to_string(),
            to: to.to_string(),
            kind,
            callsign: callsign.to_string(),
            argument: argument.into(),
        }
    }

    /// Commands need a live connection and a controlling position.
    fn check_controller(&self) -> Result<(), AtcError> {
        if self.transport.is_none() {
            Err(AtcError::NotConnected)
        } else if self.config.observer {
            Err(AtcError::NotController)
        } else {
            Ok(())
        }
    }

    fn tracked(&self, callsign: &str) -> Result<&Aircraft, AtcError> {
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        check_tracked_by(ac, self.me())?;
        Ok(ac)
    }

    /// Applies `change` to an aircraft known to exist.
    fn modify(&mut self, callsign: &str, change: impl FnOnce(&mut Aircraft)) {
        if let Some(ac) = self.aircraft.get_mut(callsign) {
            change(ac);
            self.events.post(Event::ModifiedAircraft {
                callsign: callsign.to_string(),
            });
        }
    }

    // ========================================================================
    // INBOUND
    // ========================================================================

    /// The aircraft, created if this is the first line about it.
    fn upsert_aircraft(&mut self, callsign: &str, at: SimTime) -> &mut Aircraft {
        let events = &self.events;
        self.aircraft
            .entry(callsign.to_string())
            .and_modify(|_| {
                events.post(Event::ModifiedAircraft {
                    callsign: callsign.to_string(),
                })
            })
            .or_insert_with(|| {
                debug!("{}: new aircraft", callsign);
                events.post(Event::AddedAircraft {
                    callsign: callsign.to_string(),
                });
                Aircraft::new(callsign, at)
            })
    }

    fn remove_aircraft(&mut self, callsign: &str) {
        if self.aircraft.remove(callsign).is_some() {
            self.events.post(Event::RemovedAircraft {
                callsign: callsign.to_string(),
            });
        }
    }

    fn apply(&mut self, message: WireMessage, at: SimTime) {
        match message {
            WireMessage::AddController {
                from, name, cid, rating, ..
            } => {
                let c = self
                    .controllers
                    .entry(from.clone())
                    .or_insert_with(|| Controller::new(from));
                c.name = name;
                c.cid = cid;
                c.rating = rating;
            }
            WireMessage::RemoveController { from } => {
                if from != self.me() {
                    self.controllers.remove(&from);
                }
            }
            WireMessage::AddPilot {
                from, cid, rating, name, ..
            } => {
                self.pilots.insert(
                    from.clone(),
                    Pilot {
                        callsign: from,
                        name,
                        cid,
                        rating,
                    },
                );
            }
            WireMessage::RemovePilot { from } => {
                self.pilots.remove(&from);
                self.remove_aircraft(&from);
            }
            WireMessage::ControllerPosition {
                from,
                frequency,
                facility,
                scope_range,
                rating,
                location,
            } => {
                let c = self
                    .controllers
                    .entry(from.clone())
                    .or_insert_with(|| Controller::new(from));
                c.frequency = frequency;
                c.facility = facility;
                c.scope_range = scope_range;
                c.rating = rating;
                c.location = Some(location);
            }
            WireMessage::PilotPosition {
                from,
                mode,
                squawk,
                location,
                altitude,
                groundspeed,
                heading,
                ..
            } => {
                let ac = self.upsert_aircraft(&from, at);
                ac.position = location;
                ac.altitude = altitude as f64;
                ac.gs = groundspeed as f64;
                ac.ias = groundspeed as f64;
                if let Some(h) = heading {
                    ac.heading = h;
                }
                ac.squawk = squawk;
                ac.mode = mode;
                let heading = ac.heading;
                ac.add_track(RadarTrack {
                    position: location,
                    altitude,
                    groundspeed,
                    heading,
                    time: at,
                });
            }
            WireMessage::FlightPlan { from, plan, .. } => {
                self.upsert_aircraft(&from, at).flight_plan = Some(plan);
            }
            WireMessage::AmendFlightPlan { callsign, plan, .. } => {
                self.modify(&callsign, |ac| ac.flight_plan = Some(plan));
            }
            WireMessage::TextMessage { from, to, contents } => {
                self.events.post(Event::TextMessage { from, to, contents });
            }
            WireMessage::HandoffOffer { from, to, callsign } => {
                if to == self.me() {
                    info!("{}: offered by {}", callsign, from);
                    self.modify(&callsign, |ac| ac.inbound_handoff_controller = Some(to));
                }
            }
            WireMessage::HandoffAccept { from, to, callsign } => {
                if !self.aircraft.contains_key(&callsign) {
                    return;
                }
                let mine = to == self.me();
                self.modify(&callsign, |ac| {
                    ac.tracking_controller = Some(from.clone());
                    ac.inbound_handoff_controller = None;
                    if mine {
                        ac.outbound_handoff_controller = None;
                    }
                });
                self.events.post(Event::AcceptedHandoff {
                    callsign,
                    controller: from,
                });
            }
            WireMessage::Ccp {
                from,
                kind,
                callsign,
                argument,
                ..
            } => self.apply_ccp(from, kind, callsign, argument),
            WireMessage::Metar { text, .. } => match Metar::parse(&text) {
                Some(metar) => {
                    self.metars.insert(metar.airport.clone(), metar);
                }
                None => warn!("protocol: empty METAR"),
            },
            WireMessage::Atis { from, kind, text, .. } => {
                let atis = self.atis.entry(from).or_default();
                match kind.as_str() {
                    "T" => {
                        if atis.complete {
                            *atis = Atis::default();
                        }
                        atis.lines.push(text);
                    }
                    "E" => atis.complete = true,
                    _ => {}
                }
            }
        }
    }

    fn apply_ccp(&mut self, from: String, kind: CcpKind, callsign: String, argument: String) {
        let Some(ac) = self.aircraft.get(&callsign) else {
            // Far-away aircraft we have no position for yet.
            debug!("{}: {:?} from {} for unknown aircraft", callsign, kind, from);
            return;
        };
        let by_tracker = ac.is_tracked_by(&from);

        match kind {
            CcpKind::InitiateTrack => {
                self.modify(&callsign, |ac| ac.tracking_controller = Some(from.clone()));
                self.events.post(Event::InitiatedTrack {
                    callsign,
                    controller: from,
                });
            }
            CcpKind::DropTrack if by_tracker => {
                self.modify(&callsign, |ac| {
                    ac.tracking_controller = None;
                    ac.outbound_handoff_controller = None;
                    ac.inbound_handoff_controller = None;
                });
                self.events.post(Event::DroppedTrack {
                    callsign,
                    controller: from,
                });
            }
            CcpKind::CancelHandoff if by_tracker => {
                self.modify(&callsign, |ac| ac.inbound_handoff_controller = None);
            }
            CcpKind::RejectHandoff => {
                if ac.outbound_handoff_controller.as_deref() == Some(from.as_str()) {
                    info!("{}: handoff rejected by {}", callsign, from);
                    self.modify(&callsign, |ac| ac.outbound_handoff_controller = None);
                }
            }
            CcpKind::Scratchpad => self.modify(&callsign, |ac| ac.scratchpad = argument),
            CcpKind::BeaconCode => {
                if let Ok(code) = argument.parse::<Squawk>() {
                    self.modify(&callsign, |ac| ac.assigned_squawk = code);
                }
            }
            CcpKind::TemporaryAltitude => {
                if let Ok(altitude) = argument.parse::<i32>() {
                    self.modify(&callsign, |ac| ac.temporary_altitude = Some(altitude));
                }
            }
            CcpKind::DropTrack | CcpKind::CancelHandoff => {
                debug!("{}: {:?} from {}, who is not tracking it", callsign, kind, from);
            }
        }
    }

    /// Drops aircraft not heard from within the staleness timeout.
    fn evict_stale(&mut self) {
        let now = self.current_time();
        let timeout = self.config.staleness_timeout;
        let stale: Vec<String> = self
            .aircraft
            .values()
            .filter(|ac| now.since(ac.last_heard) > timeout)
            .map(|ac| ac.callsign.clone())
            .collect();
        for callsign in stale {
            info!("{}: not heard from since {:?}, removing", callsign, timeout);
            self.remove_aircraft(&callsign);
        }
    }
}

impl<C: SessionContext, T: LineTransport> CommandService for ProtocolAdapter<C, T> {
    fn callsign(&self) -> &str {
        self.me()
    }

    fn get_aircraft(&self, callsign: &str) -> Option<&Aircraft> {
        self.aircraft.get(callsign)
    }

    fn get_all_aircraft(&self) -> Vec<&Aircraft> {
        self.aircraft.values().collect()
    }

    fn get_controller(&self, callsign: &str) -> Option<&Controller> {
        self.controllers.get(callsign).or_else(|| {
            self.controllers
                .values()
                .find(|c| !c.sector_id.is_empty() && c.sector_id == callsign)
        })
    }

    fn get_all_controllers(&self) -> Vec<&Controller> {
        self.controllers.values().collect()
    }

    fn get_metar(&self, airport: &str) -> Option<&Metar> {
        self.metars.get(airport)
    }

    fn initiate_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        check_untracked(lookup(self.aircraft.get(callsign), callsign)?)?;
        self.send(self.ccp(ALL_CONTROLLERS, CcpKind::InitiateTrack, callsign, ""))?;

        let me = self.me().to_string();
        self.modify(callsign, |ac| ac.tracking_controller = Some(me.clone()));
        self.events.post(Event::InitiatedTrack {
            callsign: callsign.to_string(),
            controller: me,
        });
        Ok(())
    }

    fn drop_track(&mut self, callsign: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        self.send(self.ccp(ALL_CONTROLLERS, CcpKind::DropTrack, callsign, ""))?;

        self.modify(callsign, |ac| {
            ac.tracking_controller = None;
            ac.outbound_handoff_controller = None;
        });
        self.events.post(Event::DroppedTrack {
            callsign: callsign.to_string(),
            controller: self.me().to_string(),
        });
        Ok(())
    }

    fn handoff(&mut self, callsign: &str, controller: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        let destination = self
            .get_controller(controller)
            .map(|c| c.callsign.clone())
            .ok_or_else(|| AtcError::NoController(controller.to_string()))?;
        if destination == self.me() {
            return Err(AtcError::HandoffToSelf);
        }
        self.send(WireMessage::HandoffOffer {
            from: self.me().to_string(),
            to: destination.clone(),
            callsign: callsign.to_string(),
        })?;

        self.modify(callsign, |ac| ac.outbound_handoff_controller = Some(destination));
        Ok(())
    }

    fn accept_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        check_offered_to(ac, self.me())?;
        let offered_by = ac
            .tracking_controller
            .clone()
            .unwrap_or_else(|| ALL_CONTROLLERS.to_string());
        self.send(WireMessage::HandoffAccept {
            from: self.me().to_string(),
            to: offered_by,
            callsign: callsign.to_string(),
        })?;

        let me = self.me().to_string();
        self.modify(callsign, |ac| {
            ac.tracking_controller = Some(me.clone());
            ac.inbound_handoff_controller = None;
        });
        self.events.post(Event::AcceptedHandoff {
            callsign: callsign.to_string(),
            controller: me,
        });
        Ok(())
    }

    fn reject_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        check_offered_to(ac, self.me())?;
        let offered_by = ac
            .tracking_controller
            .clone()
            .unwrap_or_else(|| ALL_CONTROLLERS.to_string());
        self.send(self.ccp(&offered_by, CcpKind::RejectHandoff, callsign, ""))?;

        self.modify(callsign, |ac| ac.inbound_handoff_controller = None);
        Ok(())
    }

    fn cancel_handoff(&mut self, callsign: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        let destination = self
            .tracked(callsign)?
            .outbound_handoff_controller
            .clone()
            .unwrap_or_else(|| ALL_CONTROLLERS.to_string());
        self.send(self.ccp(&destination, CcpKind::CancelHandoff, callsign, ""))?;

        self.modify(callsign, |ac| ac.outbound_handoff_controller = None);
        Ok(())
    }

    fn set_squawk(&mut self, callsign: &str, squawk: Squawk) -> Result<(), AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        self.send(self.ccp(ALL_CONTROLLERS, CcpKind::BeaconCode, callsign, squawk.to_string()))?;

        self.modify(callsign, |ac| ac.assigned_squawk = squawk);
        Ok(())
    }

    fn set_squawk_automatic(&mut self, callsign: &str) -> Result<Squawk, AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        let in_use: HashSet<Squawk> = self.aircraft.values().map(|a| a.assigned_squawk).collect();
        let ac = lookup(self.aircraft.get(callsign), callsign)?;
        let controller = self.controllers.get(&self.config.callsign);
        let code = automatic_code(ac, controller, &in_use, &mut self.squawk_rng)?;
        self.set_squawk(callsign, code)?;
        Ok(code)
    }

    fn set_scratchpad(&mut self, callsign: &str, scratchpad: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        check_scratchpad(scratchpad)?;
        self.send(self.ccp(ALL_CONTROLLERS, CcpKind::Scratchpad, callsign, scratchpad))?;

        self.modify(callsign, |ac| ac.scratchpad = scratchpad.to_string());
        Ok(())
    }

    fn set_temporary_altitude(&mut self, callsign: &str, altitude: i32) -> Result<(), AtcError> {
        self.check_controller()?;
        self.tracked(callsign)?;
        self.send(self.ccp(ALL_CONTROLLERS, CcpKind::TemporaryAltitude, callsign, altitude.to_string()))?;

        self.modify(callsign, |ac| ac.temporary_altitude = Some(altitude));
        Ok(())
    }

    fn amend_flight_plan(&mut self, callsign: &str, plan: FlightPlan) -> Result<(), AtcError> {
        self.check_controller()?;
        if self.tracked(callsign)?.flight_plan.is_none() {
            return Err(AtcError::NoFlightPlanFiled);
        }
        self.send(WireMessage::AmendFlightPlan {
            from: self.me().to_string(),
            to: SERVER.to_string(),
            callsign: callsign.to_string(),
            plan: plan.clone(),
        })?;

        self.modify(callsign, |ac| ac.flight_plan = Some(plan));
        Ok(())
    }

    fn send_text_message(&mut self, to: Option<&str>, message: &str) -> Result<(), AtcError> {
        self.check_controller()?;
        if to.is_none() && !self.config.rating.can_broadcast() {
            return Err(AtcError::BroadcastNotPermitted);
        }
        let from = self.me().to_string();
        self.send(WireMessage::TextMessage {
            from: from.clone(),
            to: to.map(str::to_string),
            contents: message.to_string(),
        })?;

        self.events.post(Event::TextMessage {
            from,
            to: to.map(str::to_string),
            contents: message.to_string(),
        });
        Ok(())
    }

    fn connected(&self) -> bool {
        self.transport.is_some()
    }

    fn disconnect(&mut self) {
        let Some(mut transport) = self.transport.take() else {
            return;
        };
        let sign_off = WireMessage::RemoveController {
            from: self.me().to_string(),
        };
        if let Err(err) = transport.send(sign_off.encode()) {
            debug!("protocol: sign-off not sent: {}", err);
        }
        transport.close();

        for callsign in std::mem::take(&mut self.aircraft).into_keys() {
            self.events.post(Event::RemovedAircraft { callsign });
        }
        self.controllers.clear();
        self.pilots.clear();
        self.metars.clear();
        self.atis.clear();
        info!("{}: disconnected", self.config.callsign);
    }

    fn current_time(&self) -> SimTime {
        self.session_time(self.ctx.now())
    }

    fn update(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let lines = transport.drain();
        let open = transport.is_open();

        for line in lines {
            let at = self.session_time(line.received_at);
            for message in self.dispatcher.dispatch(&line.contents) {
                self.apply(message, at);
            }
        }
        self.evict_stale();

        if !open {
            warn!("protocol: connection closed by remote");
            self.disconnect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlightRules, NetworkRating};
    use geo::Point;
    use tracon_env::{ChannelTransport, ManualContext, RemoteEnd};

    struct Session {
        ctx: Arc<ManualContext>,
        events: EventStream,
        sub: crate::events::SubscriberId,
        remote: RemoteEnd,
        adapter: ProtocolAdapter<ManualContext, ChannelTransport>,
    }

    impl Session {
        fn receive(&mut self, lines: &[&str]) {
            for line in lines {
                self.remote.deliver(*line, self.ctx.now()).unwrap();
            }
            self.adapter.update();
        }
    }

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            callsign: "SEA_APP".into(),
            name: "Test Controller".into(),
            cid: "1000001".into(),
            frequency: "119.200".into(),
            scope_range: 60,
            low_squawk: Squawk(0o4201),
            high_squawk: Squawk(0o4277),
            location: Some(Point::new(-122.3093, 47.449)),
            ..Default::default()
        }
    }

    fn connect(config: ProtocolConfig) -> Session {
        let ctx = ManualContext::shared(7);
        let events = EventStream::new();
        let sub = events.subscribe();
        let (transport, mut remote) = ChannelTransport::pair(64);
        let adapter = ProtocolAdapter::connect(ctx.clone(), events.clone(), transport, config).unwrap();
        remote.take_sent();
        Session {
            ctx,
            events,
            sub,
            remote,
            adapter,
        }
    }

    const POSITION: &str = "@N:ASA12:4201:1:47.85000:-122.31800:8000:250:164";
    const PLAN: &str = "$FPASA12:*A:I:B738:450:KGEG:0:0:12000:KSEA:0:45:2:0:KPDX::GLASR3";

    /// ASA12 known, filed, and tracked by SEA_CTR; SEA_CTR signed on.
    fn with_center_traffic() -> Session {
        let mut s = connect(config());
        s.receive(&[
            "#AASEA_CTR:SERVER:Center:1000002:5",
            "%SEA_CTR:33650:6:250:5:47.44900:-122.30930",
            POSITION,
            PLAN,
            "#PCSEA_CTR:@94835:CCP:IT:ASA12",
        ]);
        s.events.get(s.sub);
        s
    }

    #[test]
    fn test_sign_on_lines() {
        let ctx = ManualContext::shared(1);
        let (transport, mut remote) = ChannelTransport::pair(8);
        let adapter = ProtocolAdapter::connect(ctx, EventStream::new(), transport, config()).unwrap();
        assert_eq!(
            remote.take_sent(),
            vec![
                "#AASEA_APP:SERVER:Test Controller:1000001:5".to_string(),
                "%SEA_APP:19200:5:60:5:47.44900:-122.30930".to_string(),
            ]
        );
        assert!(adapter.connected());
        assert!(adapter.get_controller("SEA_APP").unwrap().has_squawk_range());
    }

    #[test]
    fn test_position_reports_create_then_refresh() {
        let mut s = connect(config());
        s.receive(&[POSITION]);
        assert_eq!(
            s.events.get(s.sub),
            vec![Event::AddedAircraft {
                callsign: "ASA12".into()
            }]
        );

        s.ctx.advance_time(Duration::from_secs(5));
        s.receive(&["@N:ASA12:4201:1:47.84000:-122.31800:7900:250:164"]);
        assert_eq!(
            s.events.get(s.sub),
            vec![Event::ModifiedAircraft {
                callsign: "ASA12".into()
            }]
        );
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.tracks.len(), 2);
        assert_eq!(ac.altitude, 7900.0);
        assert_eq!(ac.last_heard, SimTime::from_secs(5));
    }

    #[test]
    fn test_inbound_handoff_accept() {
        let mut s = with_center_traffic();
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by("SEA_CTR"));
        assert_eq!(ac.flight_plan.as_ref().map(|fp| fp.rules), Some(FlightRules::Ifr));
        assert_eq!(s.adapter.accept_handoff("ASA12"), Err(AtcError::NotBeingHandedOffToMe));

        s.receive(&["$HOSEA_CTR:SEA_APP:ASA12"]);
        assert!(s.adapter.get_aircraft("ASA12").unwrap().is_offered_to("SEA_APP"));

        s.adapter.accept_handoff("ASA12").unwrap();
        assert_eq!(s.remote.take_sent(), vec!["$HASEA_APP:SEA_CTR:ASA12".to_string()]);
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by("SEA_APP"));
        assert_eq!(ac.inbound_handoff_controller, None);
    }

    #[test]
    fn test_outbound_handoff_completes_on_accept() {
        let mut s = with_center_traffic();
        s.receive(&["$HOSEA_CTR:SEA_APP:ASA12"]);
        s.adapter.accept_handoff("ASA12").unwrap();
        s.remote.take_sent();

        assert_eq!(s.adapter.handoff("ASA12", "SEA_APP"), Err(AtcError::HandoffToSelf));
        assert!(s.remote.take_sent().is_empty());
        assert_eq!(s.adapter.handoff("ASA12", "SEA_DEP"), Err(AtcError::NoController("SEA_DEP".into())));
        s.adapter.handoff("ASA12", "SEA_CTR").unwrap();
        assert_eq!(s.remote.take_sent(), vec!["$HOSEA_APP:SEA_CTR:ASA12".to_string()]);
        assert!(s.adapter.get_aircraft("ASA12").unwrap().is_tracked_by("SEA_APP"));
        s.events.get(s.sub);

        s.receive(&["$HASEA_CTR:SEA_APP:ASA12"]);
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by("SEA_CTR"));
        assert_eq!(ac.outbound_handoff_controller, None);
        assert!(s.events.get(s.sub).contains(&Event::AcceptedHandoff {
            callsign: "ASA12".into(),
            controller: "SEA_CTR".into()
        }));
    }

    #[test]
    fn test_rejected_handoff_clears_outbound() {
        let mut s = with_center_traffic();
        s.receive(&["#PCSEA_CTR:@94835:CCP:DR:ASA12"]);
        s.adapter.initiate_track("ASA12").unwrap();
        s.adapter.handoff("ASA12", "SEA_CTR").unwrap();

        s.receive(&["#PCSEA_CTR:SEA_APP:CCP:HR:ASA12"]);
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert!(ac.is_tracked_by("SEA_APP"));
        assert_eq!(ac.outbound_handoff_controller, None);
    }

    #[test]
    fn test_ccp_updates_from_tracker() {
        let mut s = with_center_traffic();
        s.receive(&[
            "#PCSEA_CTR:@94835:CCP:SC:ASA12:HWK",
            "#PCSEA_CTR:@94835:CCP:BC:ASA12:2513",
            "#PCSEA_CTR:@94835:CCP:TA:ASA12:11000",
        ]);
        let ac = s.adapter.get_aircraft("ASA12").unwrap();
        assert_eq!(ac.scratchpad, "HWK");
        assert_eq!(ac.assigned_squawk, Squawk(0o2513));
        assert_eq!(ac.temporary_altitude, Some(11000));

        // Only the tracker can drop the track.
        s.receive(&["#PCSEA_TWR:@94835:CCP:DR:ASA12"]);
        assert!(s.adapter.get_aircraft("ASA12").unwrap().is_tracked_by("SEA_CTR"));
        s.receive(&["#PCSEA_CTR:@94835:CCP:DR:ASA12"]);
        assert_eq!(s.adapter.get_aircraft("ASA12").unwrap().tracking_controller, None);
    }

    #[test]
    fn test_commands_forwarded_on_wire() {
        let mut s = with_center_traffic();
        s.receive(&["#PCSEA_CTR:@94835:CCP:DR:ASA12"]);
        s.adapter.initiate_track("ASA12").unwrap();
        s.adapter.set_scratchpad("ASA12", "I6R").unwrap();
        s.adapter.set_temporary_altitude("ASA12", 7000).unwrap();
        let code = s.adapter.set_squawk_automatic("ASA12").unwrap();
        assert!(code >= Squawk(0o4201) && code < Squawk(0o4277));

        assert_eq!(
            s.remote.take_sent(),
            vec![
                "#PCSEA_APP:@94835:CCP:IT:ASA12".to_string(),
                "#PCSEA_APP:@94835:CCP:SC:ASA12:I6R".to_string(),
                "#PCSEA_APP:@94835:CCP:TA:ASA12:7000".to_string(),
                format!("#PCSEA_APP:@94835:CCP:BC:ASA12:{}", code),
            ]
        );
        assert_eq!(s.adapter.get_aircraft("ASA12").unwrap().assigned_squawk, code);
    }

    #[test]
    fn test_refused_commands_send_nothing() {
        let mut s = with_center_traffic();
        assert_eq!(s.adapter.set_scratchpad("ASA12", "AB"), Err(AtcError::OtherControllerHasTrack));
        assert_eq!(s.adapter.initiate_track("ASA12"), Err(AtcError::OtherControllerHasTrack));
        assert_eq!(
            s.adapter.drop_track("UAL7"),
            Err(AtcError::NoAircraftForCallsign("UAL7".into()))
        );

        s.receive(&["#PCSEA_CTR:@94835:CCP:DR:ASA12"]);
        s.adapter.initiate_track("ASA12").unwrap();
        s.remote.take_sent();
        assert_eq!(s.adapter.set_scratchpad("ASA12", "ILS16R"), Err(AtcError::ScratchpadTooLong));
        assert!(s.remote.take_sent().is_empty());
        assert_eq!(s.adapter.get_aircraft("ASA12").unwrap().scratchpad, "");
    }

    #[test]
    fn test_observer_cannot_control() {
        let mut s = connect(ProtocolConfig {
            observer: true,
            ..config()
        });
        s.receive(&[POSITION]);
        assert_eq!(s.adapter.initiate_track("ASA12"), Err(AtcError::NotController));
        assert_eq!(
            s.adapter.send_text_message(Some("SEA_CTR"), "hi"),
            Err(AtcError::NotController)
        );
        assert!(s.remote.take_sent().is_empty());
    }

    #[test]
    fn test_broadcast_requires_supervisor() {
        let mut s = connect(config());
        assert_eq!(
            s.adapter.send_text_message(None, "all stations"),
            Err(AtcError::BroadcastNotPermitted)
        );
        s.adapter.send_text_message(Some("SEA_CTR"), "hello").unwrap();

        let mut sup = connect(ProtocolConfig {
            rating: NetworkRating::Supervisor,
            ..config()
        });
        sup.adapter.send_text_message(None, "all stations").unwrap();
        assert_eq!(sup.remote.take_sent(), vec!["#TMSEA_APP:*:all stations".to_string()]);
    }

    #[test]
    fn test_stale_aircraft_evicted_once() {
        let mut s = with_center_traffic();
        s.receive(&["@N:UAL7:2501:1:47.00000:-122.00000:30000:450"]);
        s.events.get(s.sub);

        s.ctx.advance_time(Duration::from_secs(20 * 60));
        s.receive(&["@N:UAL7:2501:1:47.10000:-122.00000:30000:450"]);
        s.ctx.advance_time(Duration::from_secs(10 * 60 + 1));
        s.receive(&[]);
        s.receive(&[]);

        assert!(s.adapter.get_aircraft("ASA12").is_none());
        assert!(s.adapter.get_aircraft("UAL7").is_some());
        let removed: Vec<Event> = s
            .events
            .get(s.sub)
            .into_iter()
            .filter(|ev| matches!(ev, Event::RemovedAircraft { .. }))
            .collect();
        assert_eq!(
            removed,
            vec![Event::RemovedAircraft {
                callsign: "ASA12".into()
            }]
        );
    }

    #[test]
    fn test_weather_feeds() {
        let mut s = connect(config());
        s.receive(&[
            "$ARSERVER:SEA_APP:METAR:KSEA 141753Z 17008KT 10SM FEW040 12/06 A3001",
            "$CRKSEA_ATIS:SEA_APP:ATIS:T:SEATTLE INFO B",
            "$CRKSEA_ATIS:SEA_APP:ATIS:T:RWY 16R IN USE",
            "$CRKSEA_ATIS:SEA_APP:ATIS:E:",
        ]);
        let metar = s.adapter.get_metar("KSEA").unwrap();
        assert_eq!(metar.wind, "17008KT");
        assert_eq!(metar.altimeter, "A3001");
        assert_eq!(
            s.adapter.get_atis("KSEA_ATIS").as_deref(),
            Some("SEATTLE INFO B\nRWY 16R IN USE")
        );

        s.receive(&["$CRKSEA_ATIS:SEA_APP:ATIS:T:SEATTLE INFO C"]);
        assert_eq!(s.adapter.get_atis("KSEA_ATIS").as_deref(), Some("SEATTLE INFO C"));
    }

    #[test]
    fn test_pilot_sign_off_removes_aircraft() {
        let mut s = connect(config());
        s.receive(&["#APASA12:SERVER:2000001:1:Jo Pilot", POSITION]);
        assert_eq!(s.adapter.get_pilot("ASA12").map(|p| p.name.as_str()), Some("Jo Pilot"));

        s.receive(&["#DPASA12:2000001"]);
        assert!(s.adapter.get_pilot("ASA12").is_none());
        assert!(s.adapter.get_aircraft("ASA12").is_none());
    }

    #[test]
    fn test_disconnect_signs_off_and_clears() {
        let mut s = with_center_traffic();
        s.receive(&["@N:UAL7:2501:1:47.00000:-122.00000:30000:450"]);
        s.events.get(s.sub);
        s.remote.take_sent();

        s.adapter.disconnect();
        assert_eq!(s.remote.take_sent(), vec!["#DASEA_APP".to_string()]);
        assert_eq!(
            s.events.get(s.sub),
            vec![
                Event::RemovedAircraft {
                    callsign: "ASA12".into()
                },
                Event::RemovedAircraft {
                    callsign: "UAL7".into()
                },
            ]
        );
        assert!(s.adapter.get_all_aircraft().is_empty());
        assert!(!s.adapter.connected());
        assert_eq!(s.adapter.initiate_track("ASA12"), Err(AtcError::NotConnected));
    }

    #[test]
    fn test_remote_hangup_disconnects() {
        let Session {
            remote, mut adapter, ..
        } = with_center_traffic();
        drop(remote);
        adapter.update();
        assert!(!adapter.connected());
        assert!(adapter.get_all_aircraft().is_empty());
    }

    #[test]
    fn test_malformed_lines_do_not_stop_the_batch() {
        let mut s = connect(config());
        s.receive(&["", ":nobody", "@N:ASA12:4201:1:abc:-122.3:8000:250", "$ZZ:junk", POSITION]);
        assert!(s.adapter.get_aircraft("ASA12").is_some());
        assert!(s.adapter.connected());
    }
}
