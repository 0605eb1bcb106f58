//! TRACON Core - Traffic Simulation and Control Protocol Engine
//!
//! This library runs an ATC training session against one of two backends
//! that share the `CommandService` interface:
//! 1. **Local simulation**: `LocalSim` spawns traffic from a scenario, flies
//!    it, and plays the other controllers itself
//! 2. **Network protocol**: `ProtocolAdapter` mirrors a network server's
//!    traffic and forwards the user's commands over the wire
//!
//! Both report every change on an `EventStream`, and both take time,
//! randomness, and I/O from a `tracon_env::SessionContext`.

pub mod adapter;
pub mod builtin;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod geodesy;
pub mod handoff;
pub mod kinematics;
pub mod local;
pub mod model;
pub mod protocol;
pub mod rates;
pub mod scenario;
pub mod service;
pub mod spawn;
pub mod squawk;
pub mod traffic;

// Re-export key types for convenience
pub use adapter::ProtocolAdapter;
pub use clock::{Clock, SimTime};
pub use config::{LocalSimConfig, ProtocolConfig};
pub use error::{AtcError, ProtocolError};
pub use events::{Event, EventStream, SubscriberId};
pub use local::LocalSim;
pub use model::{Aircraft, Controller, FlightPlan, FlightRules, Metar, NetworkRating, Squawk, TurnDirection};
pub use protocol::{Dispatcher, WireMessage};
pub use scenario::{Database, Scenario, ScenarioGroup};
pub use service::{CommandService, PilotControl};
