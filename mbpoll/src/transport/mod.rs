//! Boundary to the Modbus link.
//!
//! The engine never frames PDUs itself. It drives a [`Transport`], which
//! owns the physical or virtual connection and reports request outcomes
//! through a [`Reply`] handle.

pub mod modbus;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ConnectOptions;
use crate::error::{PollError, TransportError};
use crate::item::{FunctionCode, PollItem, PollValue};

pub use modbus::ModbusTransport;

/// Link types a connection string can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionKind {
    Rtu,
    RtuBuffered,
    AsciiSerial,
    Tcp,
    TcpRtuBuffered,
    Telnet,
    Udp,
    C701,
}

impl ConnectionKind {
    pub const ALL: [ConnectionKind; 8] = [
        ConnectionKind::Rtu,
        ConnectionKind::RtuBuffered,
        ConnectionKind::AsciiSerial,
        ConnectionKind::Tcp,
        ConnectionKind::TcpRtuBuffered,
        ConnectionKind::Telnet,
        ConnectionKind::Udp,
        ConnectionKind::C701,
    ];

    /// Canonical name, e.g. `"TcpRTUBuffered"`.
    pub fn label(self) -> &'static str {
        match self {
            ConnectionKind::Rtu => "RTU",
            ConnectionKind::RtuBuffered => "RTUBuffered",
            ConnectionKind::AsciiSerial => "AsciiSerial",
            ConnectionKind::Tcp => "TCP",
            ConnectionKind::TcpRtuBuffered => "TcpRTUBuffered",
            ConnectionKind::Telnet => "Telnet",
            ConnectionKind::Udp => "UDP",
            ConnectionKind::C701 => "C701",
        }
    }

    /// Whether `host` names a serial device rather than a network peer.
    pub fn is_serial(self) -> bool {
        matches!(
            self,
            ConnectionKind::Rtu | ConnectionKind::RtuBuffered | ConnectionKind::AsciiSerial
        )
    }
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for ConnectionKind {
    type Err = PollError;

    /// Case-insensitive match on the label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                PollError::config(format!("Connection type {} not supported", s.to_lowercase()))
            })
    }
}

/// A fully resolved request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusRequest {
    pub function: FunctionCode,
    pub device_id: u8,
    pub address: u16,
    pub value: PollValue,
}

/// Identifies one in-flight request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Decoded payload of a successful request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseData {
    Bits(Vec<bool>),
    Registers(Vec<u16>),
    Written { address: u16, quantity: u16 },
    DeviceIdentification(Vec<u8>),
}

/// A successful result, stamped with its completion time and the request
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModbusData {
    pub created_at: DateTime<Utc>,
    pub request: PollItem,
    pub response: ResponseData,
}

/// Outcome of one request as reported by a transport.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request: RequestId,
    pub result: Result<ResponseData, TransportError>,
}

type Sink = Arc<dyn Fn(Completion) + Send + Sync>;

/// Completion handle given to [`Transport::submit`].
///
/// Some links report more than once for a single request (an error
/// trailing a response, for instance). `Reply` is cloneable so such
/// transports can be expressed; the engine applies only the first outcome.
#[derive(Clone)]
pub struct Reply {
    request: RequestId,
    sink: Sink,
}

impl Reply {
    /// Build a reply that hands completions to `sink`.
    pub fn from_fn<F>(request: RequestId, sink: F) -> Self
    where
        F: Fn(Completion) + Send + Sync + 'static,
    {
        Self {
            request,
            sink: Arc::new(sink),
        }
    }

    pub fn request(&self) -> RequestId {
        self.request
    }

    /// Report an outcome.
    pub fn send(&self, result: Result<ResponseData, TransportError>) {
        (self.sink)(Completion {
            request: self.request,
            result,
        });
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Capabilities the engine needs from a Modbus link.
///
/// Implementations own the connection exclusively; all methods take `&self`
/// and use interior mutability so the engine can share the transport with
/// the tasks it spawns.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the link. `host` is a hostname or serial device path.
    async fn connect(
        &self,
        kind: ConnectionKind,
        host: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    fn set_device_id(&self, id: u8);

    fn device_id(&self) -> u8;

    fn set_timeout(&self, timeout: Duration);

    fn timeout(&self) -> Duration;

    /// Issue a request without waiting for it. The outcome arrives via `reply`.
    fn submit(&self, request: ModbusRequest, reply: Reply);

    async fn close(&self) -> Result<(), TransportError>;
}
