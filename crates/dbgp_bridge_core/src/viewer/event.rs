use serde::Serialize;
use serde_json::{json, Value};

use crate::dbgp::StackFrame;
use crate::session::ContextView;

/// Shared state of the viewers' file-search panel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileSearchState {
    #[serde(rename = "isOpen")]
    pub is_open: bool,
    pub search: String,
}

/// Events fanned out to every attached viewer.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerEvent {
    ActiveContext(ContextView),
    ActiveStack(Vec<StackFrame>),
    FileContents { file: String, contents: String },
    /// `None`/`None` clears the highlighted line.
    ActiveLine { file: Option<String>, line: Option<u32> },
    Break { file: Option<String>, line: Option<u32> },
    BreakpointSet { file: String, line: u32 },
    BreakpointRemoved { file: String, line: u32 },
    ReplInput(String),
    ReplOutput(String),
    ReplError(String),
    ReplStdout(String),
    UniqueId(String),
    BreakOnException(bool),
    ActiveFileSearch(FileSearchState),
}

impl ViewerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveContext(_) => "ActiveContext",
            Self::ActiveStack(_) => "ActiveStack",
            Self::FileContents { .. } => "FileContents",
            Self::ActiveLine { .. } => "ActiveLine",
            Self::Break { .. } => "Break",
            Self::BreakpointSet { .. } => "BreakpointSet",
            Self::BreakpointRemoved { .. } => "BreakpointRemoved",
            Self::ReplInput(_) => "REPLInput",
            Self::ReplOutput(_) => "REPLOutput",
            Self::ReplError(_) => "REPLError",
            Self::ReplStdout(_) => "REPLStdout",
            Self::UniqueId(_) => "UniqID",
            Self::BreakOnException(_) => "BreakOnException",
            Self::ActiveFileSearch(_) => "ActiveFileSearch",
        }
    }

    pub fn data(&self) -> Vec<Value> {
        match self {
            Self::ActiveContext(view) => vec![json!(view)],
            Self::ActiveStack(frames) => vec![json!(frames)],
            Self::FileContents { file, contents } => vec![json!(file), json!(contents)],
            // Lines travel as strings here, as the editor expects.
            Self::ActiveLine { file, line } | Self::Break { file, line } => {
                vec![json!(file), json!(line.map(|l| l.to_string()))]
            }
            Self::BreakpointSet { file, line } | Self::BreakpointRemoved { file, line } => {
                vec![json!(file), json!(line)]
            }
            Self::ReplInput(text)
            | Self::ReplOutput(text)
            | Self::ReplError(text)
            | Self::ReplStdout(text)
            | Self::UniqueId(text) => vec![json!(text)],
            Self::BreakOnException(enabled) => vec![json!(enabled)],
            Self::ActiveFileSearch(state) => vec![json!(state)],
        }
    }

    pub fn to_message(&self) -> Value {
        json!({
            "event": self.name(),
            "data": self.data(),
        })
    }

    pub fn to_json(&self) -> String {
        self.to_message().to_string()
    }

    /// REPL lines are kept in the transcript replayed to late joiners.
    pub fn is_transcript(&self) -> bool {
        matches!(
            self,
            Self::ReplInput(_) | Self::ReplOutput(_) | Self::ReplError(_) | Self::ReplStdout(_)
        )
    }
}
