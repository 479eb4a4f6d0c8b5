//! # mtconnect-core
//!
//! The observation pipeline and backing store for an MTConnect agent: a
//! realtime machine-tool telemetry gateway that ingests SHDR text from
//! factory-floor adapters, aggregates it against a declarative device model,
//! and serves it through a query protocol supporting both point-in-time
//! snapshots and sequential streaming.
//!
//! ## Quick start
//!
//! ```rust
//! use mtconnect_core::{Agent, Config, DeviceModel};
//!
//! let model = DeviceModel::load(Vec::new())?;
//! let agent = Agent::new(Config::default(), model);
//! agent.start();
//! # Ok::<(), mtconnect_core::AgentError>(())
//! ```
//!
//! ## Architecture
//!
//! - **Data model** (`model`): the device/component/data-item tree and its
//!   derived indices.
//! - **Observation** (`observation`): a single typed, timestamped reading.
//! - **Checkpoint** (`checkpoint`): the latest-value snapshot, including
//!   condition chains.
//! - **Circular buffer** (`buffer`): the bounded ring of retained
//!   observations with periodic checkpoint snapshots.
//! - **Pipeline** (`pipeline`): the ordered chain of transforms that turns
//!   raw adapter text into buffered observations and asset mutations.
//! - **Asset store** (`asset`): the bounded, tombstone-based collection of
//!   adapter-managed documents.
//! - **I/O contracts** (`io`): the trait boundaries a transport must satisfy
//!   to plug sources and sinks into the core.
//! - **Agent** (`agent`): the top-level orchestrator binding all of the
//!   above together.
//!
//! Transports (HTTP/REST, MQTT, sockets), document printers, and the device
//! description parser are external collaborators and out of scope for this
//! crate.

pub mod agent;
pub mod asset;
pub mod buffer;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod model;
pub mod observation;
pub mod pipeline;

pub use crate::agent::Agent;
pub use crate::asset::{Asset, AssetEvent, AssetStore};
pub use crate::buffer::CircularBuffer;
pub use crate::checkpoint::{Checkpoint, CheckpointEntry};
pub use crate::config::Config;
pub use crate::error::{AgentError, ErrorCode, Result};
pub use crate::model::{Component, DataItem, Device, DeviceModel, IdRemap};
pub use crate::observation::{ConditionDetail, ConditionLevel, Observation, ObservationValue};
pub use crate::pipeline::{Pipeline, SourceOptions, SourceState};
