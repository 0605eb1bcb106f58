//! Session check scenarios.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// TRC-001: arrivals spawn from the rate tables with filed plans
    ArrivalVolume,

    /// TRC-002: departures spawn tracked by their airport's controller
    DepartureSequencing,

    /// TRC-003: accept an inbound arrival, hand it to the tower
    HandoffFlow,

    /// TRC-004: pause freezes time and spawns but not commands
    PauseFreeze,

    /// TRC-005: go-around flags follow the configured rate
    GoAround,

    /// TRC-006: handoff in both directions with a network peer
    ProtocolHandoff,

    /// TRC-007: unheard network traffic is evicted exactly once
    StaleEviction,

    /// TRC-008: both backends end in the same state for the same commands
    BackendParity,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::ArrivalVolume,
            ScenarioId::DepartureSequencing,
            ScenarioId::HandoffFlow,
            ScenarioId::PauseFreeze,
            ScenarioId::GoAround,
            ScenarioId::ProtocolHandoff,
            ScenarioId::StaleEviction,
            ScenarioId::BackendParity,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::ArrivalVolume => "arrival_volume",
            ScenarioId::DepartureSequencing => "departure_sequencing",
            ScenarioId::HandoffFlow => "handoff_flow",
            ScenarioId::PauseFreeze => "pause_freeze",
            ScenarioId::GoAround => "go_around",
            ScenarioId::ProtocolHandoff => "protocol_handoff",
            ScenarioId::StaleEviction => "stale_eviction",
            ScenarioId::BackendParity => "backend_parity",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::ArrivalVolume => "Local session: arrivals appear with filed IFR plans and a tracking controller",
            ScenarioId::DepartureSequencing => "Local session: departures appear tracked by the departure controller",
            ScenarioId::HandoffFlow => "Local session: accept a center handoff, hand off to tower, tower accepts in 2-10s",
            ScenarioId::PauseFreeze => "Local session: 10 minutes paused, clock and traffic stand still",
            ScenarioId::GoAround => "Local session: go-around rate 1.0 flags every arrival, 0.0 flags none",
            ScenarioId::ProtocolHandoff => "Network session: accept from the peer, hand back, peer accepts",
            ScenarioId::StaleEviction => "Network session: an aircraft that stops reporting is removed after 30 min",
            ScenarioId::BackendParity => "Same command sequence on both backends, same control state after each",
        }
    }

    /// Returns true if the scenario talks to a scripted network peer.
    pub fn uses_network(&self) -> bool {
        matches!(
            self,
            ScenarioId::ProtocolHandoff | ScenarioId::StaleEviction | ScenarioId::BackendParity
        )
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "arrival_volume" | "arrivals" | "trc-001" => Ok(ScenarioId::ArrivalVolume),
            "departure_sequencing" | "departures" | "trc-002" => Ok(ScenarioId::DepartureSequencing),
            "handoff_flow" | "handoff" | "trc-003" => Ok(ScenarioId::HandoffFlow),
            "pause_freeze" | "pause" | "trc-004" => Ok(ScenarioId::PauseFreeze),
            "go_around" | "goaround" | "trc-005" => Ok(ScenarioId::GoAround),
            "protocol_handoff" | "trc-006" => Ok(ScenarioId::ProtocolHandoff),
            "stale_eviction" | "stale" | "trc-007" => Ok(ScenarioId::StaleEviction),
            "backend_parity" | "parity" | "trc-008" => Ok(ScenarioId::BackendParity),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}
