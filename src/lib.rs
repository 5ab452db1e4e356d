// MIT License - Copyright (c) 2026 Peter Wright
//
//! # airtub-udp
//!
//! Local control of Airtub boilers over their UDP multicast protocol.
//!
//! Boilers broadcast encrypted JSON telemetry on a multicast group
//! (default `224.0.1.3:4211`). The engine joins the group, keeps the latest
//! state of one boiler, and sends commands back to it with retries until
//! the boiler acknowledges them.
//!
//! ## Quick Start
//!
//! ```no_run
//! use airtub_udp::{AirtubEngine, ClimateCommand, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::builder()
//!         .device_id("a1b2c3")
//!         .secret("boiler-password")
//!         .build();
//!
//!     let mut engine = AirtubEngine::start(config).await?;
//!
//!     let refresh = engine.subscribe_new_data(|| println!("telemetry refreshed"));
//!
//!     let outcome = engine.send(ClimateCommand::SetDhwTarget(45.0)).await?;
//!     println!("DHW target: {}", outcome);
//!
//!     tokio::signal::ctrl_c().await?;
//!     refresh.abort();
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod crypto;
pub mod devices;
pub mod engine;
pub mod error;
pub mod event;
pub mod protocol;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use config::{EngineConfig, EngineConfigBuilder, OperateMode};
pub use crypto::{AirtubCrypt, DecodedFrame};
pub use devices::boiler::{BoilerFlags, Circuit, CircuitKind};
pub use devices::sensor::{SensorKind, SensorReading};
pub use engine::AirtubEngine;
pub use error::{AirtubError, Result};
pub use event::{EngineEvent, EventReceiver};
pub use protocol::ClimateCommand;
pub use state::{DeviceState, EngineStatus, StateCache};
pub use transport::dispatcher::{CommandDispatcher, CommandOutcome};
pub use transport::FrameSink;
