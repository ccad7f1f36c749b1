//! # Simulation Bus Federation
//!
//! Middleware for co-simulation: independent participants exchange
//! time-synchronized automotive bus traffic and publish/subscribe data through a
//! registry-mediated transport.
//!
//! ## Features
//!
//! - **Virtual bus controllers**: CAN (classic, FD, XL), Ethernet, FlexRay and LIN
//! - **Lifecycle state machine**: start/stop/sleep/reset with transport-confirmed state
//! - **Transmit correlation**: per-send tokens, with legacy bus-id matching available
//! - **Shared time base**: a time master broadcasts beacons, every controller stamps frames with master time
//! - **Publish/subscribe**: topic, media type and label matching with history for late joiners
//! - **Federation orchestration**: launches the registry tools and supervises their lifetime
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use simbus::{CanFrame, InProcessRegistry, Session, SimbusConfig, TimeMaster};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SimbusConfig::default();
//! let registry = Arc::new(InProcessRegistry::new(config.registry_uri.clone())?);
//! let session = Session::new(registry, config);
//! let _master = TimeMaster::start(&session)?;
//!
//! let mut sender = session.create_participant(Some("Test1"))?;
//! let mut receiver = session.create_participant(Some("Test2"))?;
//! sender.add_can_controller(Some("Test1_CAN"), None)?.start()?;
//! receiver.add_can_controller(Some("Test2_CAN"), None)?.start()?;
//!
//! let frame = CanFrame::new(0x700, &[1, 2, 3, 4, 5, 6, 7, 8])?;
//! let sent = sender.can(0)?.send(&frame)?;
//! sender.can(0)?.wait_for_ack(&sent, Duration::from_secs(1))?;
//! let received = receiver.can(0)?.recv_timeout(Duration::from_secs(1))?;
//! println!("RECV {received}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`frame`] - Bus frame types and their wire encoding
//! - [`controller`] - Generic bus controller, lifecycle and receive queue
//! - [`time_sync`] - Time master and time slaves
//! - [`session`] / [`participant`] - Name registry, participants and endpoints
//! - [`pubsub`] - Publishers, subscribers and data specs
//! - [`transport`] - Registry seam and the in-process registry
//! - [`federation`] - Auxiliary process orchestration

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod controller;
pub mod error;
pub mod federation;
pub mod frame;
pub mod participant;
pub mod pubsub;
pub mod session;
pub mod time_sync;
pub mod transport;

mod sync;

// Re-export main public types for convenience
pub use config::{LogLevel, SimbusConfig};
pub use controller::{
    AckCorrelation, BusController, CanController, ControllerState, ErrorState, EthernetController, FlexrayController,
    LinController, Transmission, TransmitStatus,
};
pub use error::{Error, Result, ReturnCode};
pub use federation::Federation;
pub use frame::{BusFrame, BusKind, CanFrame, CanFrameFlags, Direction, EthernetFrame, FlexrayFrame, LinFrame, SimTime};
pub use participant::{EndpointKey, EndpointKind, Participant};
pub use pubsub::{DataSpec, Label, Publisher, Subscriber};
pub use session::Session;
pub use time_sync::{TimeBeacon, TimeMaster, TimeSlave};
pub use transport::{InProcessRegistry, RegistryUri, Transport};
