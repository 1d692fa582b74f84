//! # Bridge Engine
//!
//! A bidirectional object-remoting bridge between a native host runtime with a
//! real-time frame loop and a scripting/control environment.
//!
//! ## Features
//!
//! - **Registry & Dispatch**: one `Bridge` per session owning the id↔object map
//!   and draining its transport once per frame
//! - **Accessor Paths**: a small path-expression interpreter to read and write
//!   nested host state by string (`transform:Arm/component:Light/color`)
//! - **Value Conversion**: JSON ↔ vectors, quaternions, colors, matrices and
//!   resource references
//! - **Transports**: in-process loopback, embedded QuickJS, TCP socket server and
//!   external relay client, all sharing one buffered queue discipline
//!
//! ## Architecture Design
//!
//! ```text
//! control side ──► transport inbound ──► Bridge::tick ──► registry / BridgeObject
//!      ▲                                      │
//!      └────────── transport outbound ◄───────┘ (one batch per tick)
//! ```
//!
//! ### Example
//!
//! ```ignore
//! use bridge_engine::bridge::Bridge;
//! use bridge_engine::scene::SceneObject;
//! use bridge_engine::transport::LoopbackTransport;
//!
//! let transport = LoopbackTransport::new(1024, true);
//! let control = transport.endpoint();
//! let mut bridge = Bridge::new(Box::new(transport));
//! bridge.register_with_id("cam", SceneObject::default())?;
//! bridge.start()?;
//! control.send_raw(r#"{"event":"query","id":"cam","data":{"query":{"p":"position"}}}"#)?;
//! bridge.tick(1.0 / 60.0);
//! let replies = control.receive();
//! ```
//!
//! ## Modules
//!
//! - [`core`]: Errors, macros and helpers
//! - [`config`]: Configuration loading
//! - [`convert`]: JSON ↔ native value conversion
//! - [`accessor`]: Path expression parser and evaluator
//! - [`scene`]: Host-side entity hierarchy navigated by accessor paths
//! - [`resources`]: Resource loading contract
//! - [`bridge`]: Registry, object contract and tick loop
//! - [`transport`]: Pluggable channels to the control side

/// Core errors, macros and helpers
#[macro_use]
pub mod core;
/// Configuration system
pub mod config;
/// Logging initialisation
pub mod logging;
/// JSON ↔ native value conversion
pub mod convert;
/// Path expression language for reading and writing nested state
pub mod accessor;
/// Host-side entity hierarchy
pub mod scene;
/// Resource loading contract and file loader
pub mod resources;
/// Object registry, dispatch loop and object contract
pub mod bridge;
/// Transports moving envelopes between host and control side
pub mod transport;

pub use serde_json::Map as JsonMap;
pub use serde_json::Value as JsonValue;

pub use crate::accessor::{AccessorPath, Reflect};
pub use crate::bridge::{Bridge, BridgeObject, Envelope, EventTable, ObjectContext, TickReport};
pub use crate::config::BridgeConfig;
pub use crate::core::{BridgeError, BridgeResult};
pub use crate::transport::BridgeTransport;
