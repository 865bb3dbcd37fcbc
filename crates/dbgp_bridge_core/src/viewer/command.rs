use serde::Deserialize;
use serde_json::Value;

use crate::{BridgeError, Result};

/// Commands a viewer may send. Each variant carries exactly the arguments its
/// handler needs; the originating connection is never part of the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCommand {
    Run,
    StepOver,
    StepInto,
    StepOut,
    Eval(String),
    SetBreakpoint { file: String, line: u32 },
    RemoveBreakpoint { file: String, line: u32 },
    ToggleBreakOnException,
    SetFileSearch { is_open: bool, search: String },
}

#[derive(Debug, Deserialize)]
struct ViewerMessage {
    event: String,
    data: Vec<Value>,
}

/// Event name → number of positional `data` arguments.
const HANDLERS: &[(&str, usize)] = &[
    ("Run", 0),
    ("StepOver", 0),
    ("StepInto", 0),
    ("StepOut", 0),
    ("REPLInput", 1),
    ("SetBreakpoint", 2),
    ("RemoveBreakpoint", 2),
    ("ToggleBreakOnException", 0),
    ("SetFileSearch", 2),
];

impl ViewerCommand {
    pub fn parse(raw: &str) -> Result<Self> {
        let message: ViewerMessage = serde_json::from_str(raw)?;
        Self::from_parts(&message.event, &message.data)
    }

    /// Validates arity before any argument is looked at, so a malformed
    /// command never turns into an engine command.
    pub fn from_parts(event: &str, data: &[Value]) -> Result<Self> {
        let expected = HANDLERS
            .iter()
            .find(|(name, _)| *name == event)
            .map(|(_, arity)| *arity)
            .ok_or_else(|| BridgeError::UnknownEvent(event.to_string()))?;

        if data.len() != expected {
            return Err(BridgeError::ArgumentCount {
                event: event.to_string(),
                expected,
                received: data.len(),
            });
        }

        let command = match event {
            "Run" => Self::Run,
            "StepOver" => Self::StepOver,
            "StepInto" => Self::StepInto,
            "StepOut" => Self::StepOut,
            "REPLInput" => Self::Eval(string_arg(event, data, 0)?),
            "SetBreakpoint" => Self::SetBreakpoint {
                file: string_arg(event, data, 0)?,
                line: line_arg(event, data, 1)?,
            },
            "RemoveBreakpoint" => Self::RemoveBreakpoint {
                file: string_arg(event, data, 0)?,
                line: line_arg(event, data, 1)?,
            },
            "ToggleBreakOnException" => Self::ToggleBreakOnException,
            "SetFileSearch" => Self::SetFileSearch {
                is_open: bool_arg(event, data, 0)?,
                search: string_arg(event, data, 1)?,
            },
            other => return Err(BridgeError::UnknownEvent(other.to_string())),
        };
        Ok(command)
    }
}

fn string_arg(event: &str, data: &[Value], index: usize) -> Result<String> {
    data[index]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| BridgeError::invalid_argument(event, index, "expected a string"))
}

fn line_arg(event: &str, data: &[Value], index: usize) -> Result<u32> {
    let line = match &data[index] {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    line.filter(|l| *l > 0)
        .and_then(|l| u32::try_from(l).ok())
        .ok_or_else(|| BridgeError::invalid_argument(event, index, "expected a positive line number"))
}

fn bool_arg(event: &str, data: &[Value], index: usize) -> Result<bool> {
    data[index]
        .as_bool()
        .ok_or_else(|| BridgeError::invalid_argument(event, index, "expected a boolean"))
}
