//! Scripted network peer.
//!
//! `SimNetwork` sits on the far end of the session's `ChannelTransport`
//! and plays both the network server (position reports, flight plans) and
//! one neighbouring controller who tracks traffic, offers handoffs, and
//! accepts the session's handoffs after a short delay.

use geo::Point;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::ops::Range;
use std::time::Duration;
use tracing::{debug, warn};
use tracon_core::geodesy;
use tracon_core::protocol::{CcpKind, ALL_CONTROLLERS, SERVER};
use tracon_core::model::TransponderMode;
use tracon_core::{Dispatcher, FlightPlan, NetworkRating, Squawk, WireMessage};
use tracon_env::RemoteEnd;

/// How often the peer reports traffic positions.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// The peer controller accepts handoffs after a delay in this range.
pub const ACCEPT_DELAY_SECS: Range<f64> = 2.0..10.0;

/// Traffic the peer reports.
#[derive(Debug, Clone)]
struct PeerAircraft {
    position: Point<f64>,
    altitude: i32,
    groundspeed: i32,

    /// True course flown (the peer does not model wind or variation)
    heading: f64,

    squawk: Squawk,
    reporting: bool,
}

pub struct SimNetwork {
    remote: RemoteEnd,
    callsign: String,
    dispatcher: Dispatcher,
    rng: ChaCha8Rng,
    traffic: BTreeMap<String, PeerAircraft>,

    /// Lines to deliver once their time comes
    scheduled: Vec<(Duration, String)>,

    /// Handoffs the peer will accept, by callsign: (due, offering controller)
    pending_accepts: BTreeMap<String, (Duration, String)>,

    last_report: Option<Duration>,

    /// Everything the session sent, decoded
    received: Vec<WireMessage>,

    lines_delivered: u64,
}

impl SimNetwork {
    /// Creates a peer playing controller `callsign`.
    pub fn new(remote: RemoteEnd, callsign: impl Into<String>, seed: u64) -> Self {
        Self {
            remote,
            callsign: callsign.into(),
            dispatcher: Dispatcher::default(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            traffic: BTreeMap::new(),
            scheduled: Vec::new(),
            pending_accepts: BTreeMap::new(),
            last_report: None,
            received: Vec::new(),
            lines_delivered: 0,
        }
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    /// Messages the session has sent so far.
    pub fn received(&self) -> &[WireMessage] {
        &self.received
    }

    pub fn lines_delivered(&self) -> u64 {
        self.lines_delivered
    }

    fn schedule(&mut self, at: Duration, message: WireMessage) {
        self.scheduled.push((at, message.encode()));
    }

    /// Signs the peer controller on at `location`.
    pub fn sign_on(&mut self, location: Point<f64>, now: Duration) {
        let me = self.callsign.clone();
        self.schedule(
            now,
            WireMessage::AddController {
                from: me.clone(),
                to: SERVER.to_string(),
                name: "Peer Controller".to_string(),
                cid: "1000002".to_string(),
                rating: NetworkRating::Controller1,
            },
        );
        self.schedule(
            now,
            WireMessage::ControllerPosition {
                from: me,
                frequency: "133.650".to_string(),
                facility: "CTR".to_string(),
                scope_range: 250,
                rating: NetworkRating::Controller1,
                location,
            },
        );
    }

    /// Starts reporting an aircraft with a filed plan.
    pub fn add_aircraft(
        &mut self,
        callsign: &str,
        plan: FlightPlan,
        position: Point<f64>,
        altitude: i32,
        groundspeed: i32,
        heading: f64,
        now: Duration,
    ) {
        self.traffic.insert(
            callsign.to_string(),
            PeerAircraft {
                position,
                altitude,
                groundspeed,
                heading,
                squawk: Squawk(0o1200),
                reporting: true,
            },
        );
        self.schedule(
            now,
            WireMessage::FlightPlan {
                from: callsign.to_string(),
                to: "*A".to_string(),
                plan,
            },
        );
        // Report at the next step.
        self.last_report = None;
    }

    /// The aircraft goes silent; the server stops reporting it.
    pub fn stop_reporting(&mut self, callsign: &str) {
        if let Some(ac) = self.traffic.get_mut(callsign) {
            ac.reporting = false;
        }
    }

    /// The peer controller starts tracking `callsign`.
    pub fn initiate_track(&mut self, callsign: &str, now: Duration) {
        let message = self.ccp(ALL_CONTROLLERS, CcpKind::InitiateTrack, callsign);
        self.schedule(now, message);
    }

    /// The peer controller offers `callsign` to `to`.
    pub fn offer_handoff(&mut self, callsign: &str, to: &str, now: Duration) {
        let message = WireMessage::HandoffOffer {
            from: self.callsign.clone(),
            to: to.to_string(),
            callsign: callsign.to_string(),
        };
        self.schedule(now, message);
    }

    fn ccp(&self, to: &str, kind: CcpKind, callsign: &str) -> WireMessage {
        WireMessage::Ccp {
            from: self.callsign.clone(),
            to: to.to_string(),
            kind,
            callsign: callsign.to_string(),
            argument: String::new(),
        }
    }

    /// Reads what the session sent, reports traffic, and delivers due lines.
    pub fn step(&mut self, now: Duration) {
        for line in self.remote.take_sent() {
            for message in self.dispatcher.dispatch(&line) {
                self.react(&message, now);
                self.received.push(message);
            }
        }

        let due_accepts: Vec<String> = self
            .pending_accepts
            .iter()
            .filter(|(_, (due, _))| *due <= now)
            .map(|(callsign, _)| callsign.clone())
            .collect();
        for callsign in due_accepts {
            if let Some((_, offered_by)) = self.pending_accepts.remove(&callsign) {
                let message = WireMessage::HandoffAccept {
                    from: self.callsign.clone(),
                    to: offered_by,
                    callsign,
                };
                self.schedule(now, message);
            }
        }

        let report_due = self
            .last_report
            .map_or(true, |last| now.saturating_sub(last) >= REPORT_INTERVAL);
        if report_due {
            let dt = self.last_report.map_or(0.0, |last| now.saturating_sub(last).as_secs_f64());
            self.last_report = Some(now);
            self.report_positions(dt, now);
        }

        let (due, later): (Vec<_>, Vec<_>) = std::mem::take(&mut self.scheduled)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.scheduled = later;
        for (_, line) in due {
            self.deliver(line, now);
        }
    }

    fn react(&mut self, message: &WireMessage, now: Duration) {
        match message {
            WireMessage::HandoffOffer { from, to, callsign } if *to == self.callsign => {
                let delay = self.rng.gen_range(ACCEPT_DELAY_SECS);
                debug!("peer: will accept {} from {} in {:.1}s", callsign, from, delay);
                self.pending_accepts
                    .insert(callsign.clone(), (now + Duration::from_secs_f64(delay), from.clone()));
            }
            WireMessage::Ccp {
                kind: CcpKind::CancelHandoff,
                callsign,
                ..
            } => {
                if self.pending_accepts.remove(callsign).is_some() {
                    debug!("peer: handoff of {} cancelled", callsign);
                }
            }
            WireMessage::Ccp {
                kind: CcpKind::BeaconCode,
                callsign,
                argument,
                ..
            } => {
                // The pilot dials the new code in.
                if let (Some(ac), Ok(code)) = (self.traffic.get_mut(callsign), argument.parse::<Squawk>()) {
                    ac.squawk = code;
                }
            }
            _ => {}
        }
    }

    fn report_positions(&mut self, dt: f64, now: Duration) {
        let mut lines = Vec::new();
        for (callsign, ac) in self.traffic.iter_mut().filter(|(_, ac)| ac.reporting) {
            ac.position = geodesy::travel(ac.position, ac.heading, f64::from(ac.groundspeed) * dt / 3600.0);
            let report = WireMessage::PilotPosition {
                from: callsign.clone(),
                mode: TransponderMode::Charlie,
                squawk: ac.squawk,
                rating: 1,
                location: ac.position,
                altitude: ac.altitude,
                groundspeed: ac.groundspeed,
                heading: Some(ac.heading.round()),
            };
            lines.push(report.encode());
        }
        for line in lines {
            self.deliver(line, now);
        }
    }

    fn deliver(&mut self, line: String, now: Duration) {
        match self.remote.deliver(line, now) {
            Ok(()) => self.lines_delivered += 1,
            Err(err) => warn!("peer: line not delivered: {}", err),
        }
    }
}
