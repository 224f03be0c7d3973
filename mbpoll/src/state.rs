//! Engine states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the polling state machine.
///
/// `Init` is entered when a pass starts on a closed connection, `Next` when
/// it starts on an open one. `Done` and `FailStop` end a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Init,
    Idle,
    Next,
    GoodRead,
    FailRead,
    GoodWrite,
    FailWrite,
    GoodConnect,
    FailConnect,
    FailStop,
    Done,
    Closed,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Init => "INIT",
            EngineState::Idle => "IDLE",
            EngineState::Next => "NEXT",
            EngineState::GoodRead => "GOOD_READ",
            EngineState::FailRead => "FAIL_READ",
            EngineState::GoodWrite => "GOOD_WRITE",
            EngineState::FailWrite => "FAIL_WRITE",
            EngineState::GoodConnect => "GOOD_CONNECT",
            EngineState::FailConnect => "FAIL_CONNECT",
            EngineState::FailStop => "FAIL_STOP",
            EngineState::Done => "DONE",
            EngineState::Closed => "CLOSED",
        }
    }

    /// Human-readable description carried by state-change events.
    pub fn description(self) -> &'static str {
        match self {
            EngineState::Init => "State init",
            EngineState::Idle => "State idle",
            EngineState::Next => "State next",
            EngineState::GoodRead => "State good (read)",
            EngineState::FailRead => "State fail (read)",
            EngineState::GoodWrite => "State good (write FC)",
            EngineState::FailWrite => "State fail (write FC)",
            EngineState::GoodConnect => "State good (port)",
            EngineState::FailConnect => "State fail (port)",
            EngineState::FailStop => "State fail (cannot resolve)",
            EngineState::Done => "State done",
            EngineState::Closed => "State close",
        }
    }

    /// States that end a pass.
    pub fn is_terminal(self) -> bool {
        matches!(self, EngineState::Done | EngineState::FailStop)
    }

    /// Failed actions that feed the retry counter.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            EngineState::FailConnect | EngineState::FailRead | EngineState::FailWrite
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
