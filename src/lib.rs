//! # wiz_hue_bridge
//!
//! Make Philips Wiz smart bulbs appear as native lights on a mesh
//! (Hue/Zigbee-style) network.
//!
//! Each bulb is discovered over UDP, classified by its module name and
//! exposed as one mesh light endpoint. A [`LightBridge`] per bulb keeps the
//! two sides in step: commands from the hub are written to the bulb, and
//! changes made on the bulb (its app, a remote) are read back and published
//! to the mesh.
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use wiz_hue_bridge::{BridgeOptions, BridgeService};
//!
//! async fn run(mesh: Arc<dyn wiz_hue_bridge::MeshStack>) -> Result<(), wiz_hue_bridge::Error> {
//!     let options = BridgeOptions::default();
//!     let service = BridgeService::start(&options, mesh).await?;
//!     println!("{} light(s) bridged", service.registry().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Leadership
//!
//! At any moment one side of a light is authoritative:
//!
//! - **Bulb leads** (the default): the bridge reads the bulb whenever it has
//!   been quiet for a while and mirrors what it finds to the mesh.
//! - **Mesh leads**: after a mesh command the bridge writes the mirrored
//!   state to the bulb, resending periodically, until no command has
//!   arrived for the leader timeout.
//!
//! See [`Reconciler`] for the exact rules.
//!
//! ## Communication
//!
//! All communication with Wiz bulbs occurs over UDP on port 38899; pushed
//! state arrives on port 38900. Every datagram sent to a bulb goes through
//! one shared [`TransmitPacer`].
//!
//! ## Runtime Selection
//!
//! This library is runtime-agnostic. Select your preferred runtime using feature flags:
//!
//! ### Using tokio (default)
//!
//! ```toml
//! [dependencies]
//! wiz-hue-bridge = "0.1"
//! tokio = { version = "1", features = ["rt-multi-thread", "macros"] }
//! ```
//!
//! ### Using async-std
//!
//! ```toml
//! [dependencies]
//! wiz-hue-bridge = { version = "0.1", default-features = false, features = ["runtime-async-std"] }
//! async-std = { version = "1.12", features = ["attributes"] }
//! ```
//!
//! ### Using smol
//!
//! ```toml
//! [dependencies]
//! wiz-hue-bridge = { version = "0.1", default-features = false, features = ["runtime-smol"] }
//! smol = "2"
//! ```
//!
//! ## Feature Flags
//!
//! - `runtime-tokio` (default): Use the tokio async runtime
//! - `runtime-async-std`: Use the async-std runtime
//! - `runtime-smol`: Use the smol runtime

mod bridge;
mod cache;
mod client;
mod config;
mod device;
mod discovery;
mod errors;
mod health;
mod mesh;
mod options;
mod pacer;
mod payload;
pub mod push;
mod reconcile;
mod registry;
pub mod runtime;
mod service;
mod status;
mod types;

// Re-export public API
pub use bridge::{BridgeEvent, BridgeInbox, LightBridge};
pub use cache::{FileStore, LightSettings, REGISTRY_FILE, RegistryCache, Store, settings_file_name};
pub use client::{BulbApi, BulbClient};
pub use config::{DeviceClass, Features, SystemConfig, classify};
pub use device::DeviceRecord;
pub use discovery::{discover_addresses, discover_bulbs, scan};
pub use errors::Error;
pub use health::{Health, HealthMonitor, HealthReport};
pub use mesh::{
    ColorMode, EndpointSpec, LightChange, MeshAttributes, MeshDeviceType, MeshEndpoint,
    MeshEvent, MeshStack, model_name,
};
pub use options::{BridgeOptions, Timings};
pub use pacer::TransmitPacer;
pub use payload::Payload;
pub use reconcile::{LeaderMode, MirrorState, Reconciler, TickPlan};
pub use registry::BridgeRegistry;
pub use service::BridgeService;
pub use status::DeviceState;
pub use types::{Brightness, Color, ColorXy, Kelvin, KelvinRange, Mireds};
