//! TRACON Deterministic Scenario Harness
//!
//! Runs whole training sessions on a manually driven clock so that a
//! session's behaviour can be checked end to end and replayed from a seed.
//!
//! # Core Principle: The Reactor Pattern
//!
//! The session under test never sees real time or a real socket:
//! - **Time**: `ManualContext` advances one tick at a time
//! - **Network**: `SimNetwork` plays the server and a neighbouring
//!   controller on the far end of a `ChannelTransport`
//! - **Randomness**: every stream is derived from one 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        SimWorld                          │
//! │  ┌──────────────────┐                                    │
//! │  │  ManualContext   │  tick ──► advance_time(dt)         │
//! │  └──────────────────┘                                    │
//! │           │                                              │
//! │  ┌────────▼─────────┐   lines   ┌──────────────────┐     │
//! │  │ LocalSim  or     │◄─────────►│    SimNetwork    │     │
//! │  │ ProtocolAdapter  │  channel  │  (scripted peer) │     │
//! │  └────────┬─────────┘           └──────────────────┘     │
//! │           │ events                                       │
//! │  ┌────────▼─────────┐                                    │
//! │  │ timeline/export  │                                    │
//! │  └──────────────────┘                                    │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tracon_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::HandoffFlow);
//! assert!(result.passed);
//! ```

mod exporter;
mod network;
mod runner;
pub mod scenarios;
mod world;

pub use exporter::{AircraftPosition, SimEvent, SimExport, SimFrame};
pub use network::{SimNetwork, ACCEPT_DELAY_SECS, REPORT_INTERVAL};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use world::{Backend, Session, SimConfig, SimWorld};
