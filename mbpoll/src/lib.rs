//! Modbus polling and monitoring engine.
//!
//! Repeatedly walks an ordered list of read/write requests against a
//! Modbus device, retrying transient failures with a bounded budget, and
//! optionally restarts that walk on a fixed period without ever letting two
//! walks overlap.
//!
//! # Overview
//!
//! - [`engine`] - the state machine, monitor loop and [`EngineHandle`]
//! - [`scheduler`] - the ordered [`PollList`] and its cursor
//! - [`events`] - listener registration for state, data and lifecycle events
//! - [`transport`] - the [`Transport`] boundary and a `tokio-modbus` implementation
//! - [`config`] - JSON5 configuration
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use mbpoll::{Engine, EngineConfig, EventKind, ModbusTransport, PollItem};
//!
//! let handle = Engine::spawn(Arc::new(ModbusTransport::new()), EngineConfig::tcp("plc01", 502));
//! handle.on(EventKind::Data, |event| println!("{:?}", event));
//! handle.install(vec![PollItem::read("FC3", 0, 10)]).await?;
//! handle.start_monitor().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod item;
pub mod scheduler;
pub mod state;
pub mod timer;
pub mod transport;

pub use config::{ConfigError, ConnectOptions, ConnectionConfig, EngineConfig, MbpollConfig};
pub use engine::{Engine, EngineHandle, EngineSnapshot, MAX_CONSECUTIVE_FAILURES};
pub use error::{PollError, Result, TransportError};
pub use events::{EngineEvent, EventBus, EventKind};
pub use item::{FunctionCode, PollItem, PollValue};
pub use scheduler::PollList;
pub use state::EngineState;
pub use transport::{
    ConnectionKind, ModbusData, ModbusRequest, ModbusTransport, Reply, RequestId, ResponseData,
    Transport,
};
