//! vehicle-link: AP side of the vehicle co-processor protocol.
//!
//! The co-processor owns the camera/display path and the vehicle signal bus.
//! The AP negotiates ownership and pushes property changes over a raw
//! message channel that has no request ids and no flow control.
//!
//! # Architecture
//!
//! ```text
//! HAL set ──▶ properties ──▶ codec ──▶ correlator ──▶ gate ──▶ Transport
//!                                          ▲
//! Transport ──▶ codec ──▶ arbitration ─────┘ (responses)
//!                              │
//!                              └──▶ VehicleHal (reports, events, release)
//! ```
//!
//! # Modules
//!
//! - `gate`: channel readiness and the [`Transport`] seam
//! - `codec`: fixed 26-byte frame encode/decode
//! - `correlator`: one-in-flight request/response rendezvous with timeout
//! - `properties`: HAL property id to wire control id table
//! - `arbitration`: registration state and gear-driven resource hand-off
//! - `registrar`: cancellable REGISTER retry loop
//! - `link`: the [`VehicleLink`] handle tying the above together
//! - `dummy`: software backend for boards without a co-processor
//! - `config`, `logging`, `error`: ambient plumbing
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod arbitration;
pub mod codec;
pub mod config;
pub mod correlator;
pub mod dummy;
pub mod error;
pub mod gate;
pub mod hal;
pub mod link;
pub mod logging;
pub mod properties;
pub mod registrar;

pub use arbitration::RegistrationState;
pub use codec::{Body, CommandRecord, Direction, FRAME_LEN, Header, MessageKind};
pub use config::LinkConfig;
pub use dummy::DummyVehicle;
pub use error::{Error, ProtocolError, Result, TransportError};
pub use gate::Transport;
pub use hal::{ControlBackend, ExternalEvent, PropertyReport, VehicleHal};
pub use link::VehicleLink;
pub use registrar::{RegistrationOutcome, RegistrationResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
