//! JSON exporter for session timelines.
//!
//! Exports radar frames and the event timeline of a run so a session can
//! be replayed or plotted outside the harness.

use serde::Serialize;
use std::fs::File;
use std::io::Write;
use tracon_core::{Aircraft, Event};

/// One radar frame.
#[derive(Debug, Clone, Serialize)]
pub struct SimFrame {
    /// Session time in seconds
    pub time_sec: f64,

    pub aircraft: Vec<AircraftPosition>,
}

/// What the scope shows for one aircraft.
#[derive(Debug, Clone, Serialize)]
pub struct AircraftPosition {
    pub callsign: String,
    pub lat: f64,
    pub lon: f64,
    pub altitude: i32,
    pub heading: i32,
    pub groundspeed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<String>,
}

impl AircraftPosition {
    pub fn new(ac: &Aircraft) -> Self {
        Self {
            callsign: ac.callsign.clone(),
            lat: ac.position.y(),
            lon: ac.position.x(),
            altitude: ac.altitude.round() as i32,
            heading: ac.heading.round() as i32,
            groundspeed: ac.gs.round() as i32,
            tracking: ac.tracking_controller.clone(),
        }
    }
}

/// A session event with the session time it was seen at.
#[derive(Debug, Clone, Serialize)]
pub struct SimEvent {
    pub time_sec: f64,
    #[serde(flatten)]
    pub event: Event,
}

/// Complete run export.
#[derive(Debug, Clone, Serialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    pub frames: Vec<SimFrame>,
    pub events: Vec<SimEvent>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            events: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = self.duration_sec.max(frame.time_sec);
        self.frames.push(frame);
    }

    pub fn add_event(&mut self, time_sec: f64, event: Event) {
        self.duration_sec = self.duration_sec.max(time_sec);
        self.events.push(SimEvent { time_sec, event });
    }

    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
