//! Rust client for Vantage InFusion lighting and HVAC controllers
//!
//! The controller exposes two plain TCP services:
//!
//! - a line-oriented control port (3001) carrying commands, replies and live
//!   status pushes
//! - an XML configuration port (2001) used to list interfaces and download the
//!   project file
//!
//! This library discovers loads and thermostats from the project file,
//! classifies them by asking the controller which interfaces they implement,
//! tracks their live state and issues level, colour and temperature commands.
//!
//! # Quick Start
//!
//! ```no_run
//! use vantage_infusion::{ControllerConfig, InfusionController};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ControllerConfig::new("192.168.1.50").use_cache(true);
//!     let controller = InfusionController::connect(config).await?;
//!     controller.discover().await?;
//!
//!     let devices = controller.devices().await?;
//!     if let Some(load) = devices.iter().find(|d| d.kind().is_dimmable()) {
//!         load.set_brightness(40)?;
//!     }
//!
//!     let mut updates = controller.subscribe_devices();
//!     while let Ok(update) = updates.recv().await {
//!         println!("Device update: {:?}", update);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Controller**: endpoint owning both sessions, the interface table and the registry
//! - **Connection**: command session, outbound pacing and probe correlation
//! - **Discovery**: configuration session and project download/caching
//! - **Classifier**: turns project objects into thermostats, RGB loads, dimmers or relays
//! - **Registry**: device list readiness and live state routing
//! - **Protocol / Xml**: wire formats of the two ports

mod classifier;
mod client;
mod config;
mod connection;
mod device;
mod discovery;
mod error;
mod project;
mod protocol;
mod registry;
mod subscription;
mod types;
mod xml;

// Public exports
pub use classifier::{Candidate, Classified, Classifier, InterfaceProbe};
pub use client::InfusionController;
pub use config::{ControllerConfig, RelayPolicy, SessionOptions, COMMAND_PORT, CONFIG_PORT};
pub use connection::{CommandSession, DEFAULT_DISSOLVE_MS, DEFAULT_RAMP_SECONDS};
pub use device::{Device, DeviceState};
pub use discovery::{ConfigSession, DiscoveryOutcome};
pub use error::{InfusionError, Result};
pub use project::{parse_project, ProjectObject};
pub use protocol::{parse_line, Command, Event, LineBuffer, StatusKind};
pub use registry::{DeviceRegistry, RegistryStatus};
pub use subscription::{DeviceReceiver, DeviceUpdate, EventReceiver, Subscription};
pub use types::{
    DeviceKind, Iid, InterfaceTable, Vid, INTERFACE_LOAD, INTERFACE_RGB_LOAD, INTERFACE_THERMOSTAT,
};
pub use xml::{normalize, ConfigResponse, XmlAccumulator, GET_BACKUP_REQUEST, GET_INTERFACES_REQUEST};
