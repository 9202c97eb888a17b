//! # routeb Core Library
//!
//! Reads low-voltage smart electric energy meters through a Wi-SUN Route-B
//! USB dongle:
//! - Serial line transport with ERXUDP-aware framing
//! - Active scan, PANA authentication and UDP sends on the dongle
//! - ECHONET Lite packet compose/parse with a property decoder registry
//! - Request/reply correlation with automatic re-authentication
//! - Meter helpers (power, current, cumulative energy, histories)
//! - Dongle simulator for tests and demos
//!
//! ## Example
//!
//! ```rust,no_run
//! use routeb_core::{Adapter, AdapterConfig, Session};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AdapterConfig::new("/dev/ttyUSB0", "00000039000000000000000000000ABC", "SECRET123")?;
//!     let session = Session::new(Adapter::serial(config));
//!     session.connect().await?;
//!
//!     if let Some(watts) = session.instantaneous_power().await? {
//!         println!("{watts} W");
//!     }
//!
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;
pub mod error;

// Re-exports for convenience
pub use crate::config::{AdapterConfig, AppConfig, ConfigError, Timings};
pub use crate::core::adapter::{Adapter, AdapterEvent, NetworkInfo};
pub use crate::core::echonet::{
    compose, parse, CodecError, EchonetObject, Packet, PacketRequest, PropertyDecoder, PropertyRequest,
    PropertyValue, ServiceCode, StandardDecoders,
};
pub use crate::core::logger::{RecordFormat, TrafficLogger};
pub use crate::core::meter::{Direction, EnergyScale};
pub use crate::core::session::{Session, SessionEvent};
pub use crate::core::simulator::{DongleSimulator, SimulatorConfig, SimulatorHandle};
pub use crate::core::state_machine::ConnectionState;
pub use crate::core::transport::{list_ports, LineChannel, SerialLineChannel, TransportError};
pub use crate::error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
