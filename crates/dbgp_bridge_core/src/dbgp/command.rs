use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::sync::atomic::{AtomicU64, Ordering};

use super::to_file_uri;

pub type TransactionId = u64;

/// Commands the bridge sends to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Run,
    StepOver,
    StepInto,
    StepOut,
    Eval { expression: String },
    BreakpointSet { file: String, line: u32 },
    ExceptionBreakpointSet,
    BreakpointRemove { engine_id: String },
    StackGet,
    ContextNames { depth: u32 },
    ContextGet { context_id: String, depth: u32 },
    /// Copy the debuggee's stdout to the bridge as stream packets.
    Stdout,
}

impl EngineCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Run => "run",
            Self::StepOver => "step_over",
            Self::StepInto => "step_into",
            Self::StepOut => "step_out",
            Self::Eval { .. } => "eval",
            Self::BreakpointSet { .. } | Self::ExceptionBreakpointSet => "breakpoint_set",
            Self::BreakpointRemove { .. } => "breakpoint_remove",
            Self::StackGet => "stack_get",
            Self::ContextNames { .. } => "context_names",
            Self::ContextGet { .. } => "context_get",
            Self::Stdout => "stdout",
        }
    }

    fn arguments(&self) -> String {
        match self {
            Self::Run
            | Self::StepOver
            | Self::StepInto
            | Self::StepOut
            | Self::StackGet => String::new(),
            Self::Eval { expression } => format!(" -- {}", BASE64.encode(expression)),
            Self::BreakpointSet { file, line } => {
                format!(" -t line -f {} -n {line}", quote_argument(&to_file_uri(file)))
            }
            Self::ExceptionBreakpointSet => " -t exception -x *".to_string(),
            Self::BreakpointRemove { engine_id } => format!(" -d {}", quote_argument(engine_id)),
            Self::ContextNames { depth } => format!(" -d {depth}"),
            Self::ContextGet { context_id, depth } => {
                format!(" -d {depth} -c {}", quote_argument(context_id))
            }
            Self::Stdout => " -c 1".to_string(),
        }
    }
}

/// A command tagged with its transaction id, ready to be written to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCommand {
    pub transaction_id: TransactionId,
    pub command: EngineCommand,
    pub wire: String,
}

/// Sole authority for transaction ids. Ids increase monotonically and are
/// never handed out twice, not even across session resets.
#[derive(Debug)]
pub struct CommandEncoder {
    next_id: AtomicU64,
}

impl Default for CommandEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandEncoder {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_transaction_id(&self) -> TransactionId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn encode(&self, command: EngineCommand) -> EncodedCommand {
        let transaction_id = self.next_transaction_id();
        let wire = format!(
            "{} -i {transaction_id}{}\0",
            command.name(),
            command.arguments()
        );

        tracing::debug!(
            "Encoded engine command: name={}, id={}",
            command.name(),
            transaction_id
        );

        EncodedCommand {
            transaction_id,
            command,
            wire,
        }
    }
}

fn quote_argument(value: &str) -> String {
    if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"') {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}
