//! Poll items and Modbus function codes.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{PollError, Result};

/// Modbus function codes understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum FunctionCode {
    /// FC1
    ReadCoils,
    /// FC2
    ReadDiscreteInputs,
    /// FC3
    ReadHoldingRegisters,
    /// FC4
    ReadInputRegisters,
    /// FC5
    WriteSingleCoil,
    /// FC6
    WriteSingleRegister,
    /// FC15
    WriteMultipleCoils,
    /// FC16
    WriteMultipleRegisters,
    /// FC43 (MEI 0x0E)
    ReadDeviceIdentification,
}

impl FunctionCode {
    /// Every supported function code, in ascending numeric order.
    pub const ALL: [FunctionCode; 9] = [
        FunctionCode::ReadCoils,
        FunctionCode::ReadDiscreteInputs,
        FunctionCode::ReadHoldingRegisters,
        FunctionCode::ReadInputRegisters,
        FunctionCode::WriteSingleCoil,
        FunctionCode::WriteSingleRegister,
        FunctionCode::WriteMultipleCoils,
        FunctionCode::WriteMultipleRegisters,
        FunctionCode::ReadDeviceIdentification,
    ];

    /// Numeric function code on the wire.
    pub fn code(self) -> u8 {
        match self {
            FunctionCode::ReadCoils => 1,
            FunctionCode::ReadDiscreteInputs => 2,
            FunctionCode::ReadHoldingRegisters => 3,
            FunctionCode::ReadInputRegisters => 4,
            FunctionCode::WriteSingleCoil => 5,
            FunctionCode::WriteSingleRegister => 6,
            FunctionCode::WriteMultipleCoils => 15,
            FunctionCode::WriteMultipleRegisters => 16,
            FunctionCode::ReadDeviceIdentification => 43,
        }
    }

    /// Look up a function code by number.
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|fc| fc.code() == code)
    }

    /// Parse `"FC3"`, `"fc3"` or `"3"`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let digits = match trimmed.get(..2) {
            Some(prefix) if prefix.eq_ignore_ascii_case("fc") => &trimmed[2..],
            _ => trimmed,
        };

        digits
            .parse::<u8>()
            .ok()
            .and_then(Self::from_code)
            .ok_or_else(|| PollError::config(format!("Unknown FC {}", trimmed.to_uppercase())))
    }

    /// One of the four register/bit read codes (FC1-FC4).
    pub fn is_read(self) -> bool {
        matches!(self.code(), 1..=4)
    }

    /// One of the two single-value write codes (FC5, FC6).
    pub fn is_write(self) -> bool {
        matches!(self.code(), 5 | 6)
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FC{}", self.code())
    }
}

impl FromStr for FunctionCode {
    type Err = PollError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<FunctionCode> for String {
    fn from(fc: FunctionCode) -> Self {
        fc.to_string()
    }
}

impl TryFrom<String> for FunctionCode {
    type Error = PollError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

/// Quantity or payload carried by a request.
///
/// Reads use a single quantity. Multi-write codes take a list; coil
/// writes treat any non-zero entry as `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PollValue {
    Single(u16),
    Many(Vec<u16>),
}

impl PollValue {
    /// View the value as a slice of words.
    pub fn as_slice(&self) -> &[u16] {
        match self {
            PollValue::Single(value) => std::slice::from_ref(value),
            PollValue::Many(values) => values,
        }
    }

    /// First word, if any.
    pub fn first(&self) -> Option<u16> {
        self.as_slice().first().copied()
    }
}

impl From<u16> for PollValue {
    fn from(value: u16) -> Self {
        PollValue::Single(value)
    }
}

impl From<bool> for PollValue {
    fn from(value: bool) -> Self {
        PollValue::Single(u16::from(value))
    }
}

impl From<Vec<u16>> for PollValue {
    fn from(values: Vec<u16>) -> Self {
        PollValue::Many(values)
    }
}

/// One request within a polling pass.
///
/// `fc` stays as written until the request is issued; validation happens
/// in the read/write wrappers so that a bad code surfaces as a failed
/// request rather than a failed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollItem {
    /// Device (unit) id; the transport default is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u8>,

    /// Function code, e.g. `"FC3"` or `3`.
    #[serde(
        default,
        deserialize_with = "deserialize_fc",
        skip_serializing_if = "Option::is_none"
    )]
    pub fc: Option<String>,

    /// Starting address (0-based).
    pub address: u16,

    /// Number of coils/registers to read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u16>,

    /// Value to write, or the read quantity once normalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<PollValue>,
}

impl PollItem {
    /// A read of `length` units starting at `address`.
    pub fn read(fc: impl Into<String>, address: u16, length: u16) -> Self {
        Self {
            id: None,
            fc: Some(fc.into()),
            address,
            length: Some(length),
            value: None,
        }
    }

    /// A write of `value` at `address`.
    pub fn write(fc: impl Into<String>, address: u16, value: impl Into<PollValue>) -> Self {
        Self {
            id: None,
            fc: Some(fc.into()),
            address,
            length: None,
            value: Some(value.into()),
        }
    }

    /// Target a specific device id.
    pub fn with_id(mut self, id: u8) -> Self {
        self.id = Some(id);
        self
    }

    /// Resolve the function code.
    pub fn function_code(&self) -> Result<FunctionCode> {
        match &self.fc {
            Some(fc) => FunctionCode::parse(fc),
            None => Err(PollError::config("Function code is not defined")),
        }
    }
}

fn deserialize_fc<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Text(text)) => Some(text),
        Some(Raw::Number(code)) => Some(format!("FC{}", code)),
        None => None,
    })
}
