use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("XML decode error: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Invalid engine packet: {0}")]
    InvalidPacket(String),

    #[error("Value format error: {0}")]
    Format(String),

    #[error("No such viewer handler: {0}")]
    UnknownEvent(String),

    #[error("Parameter count mismatch for {event}: expected {expected}, got {received}")]
    ArgumentCount {
        event: String,
        expected: usize,
        received: usize,
    },

    #[error("Invalid argument {index} for {event}: {reason}")]
    InvalidArgument {
        event: String,
        index: usize,
        reason: String,
    },

    #[error("An engine connection is already attached")]
    EngineBusy,

    #[error("Engine error {code}: {message}")]
    Engine { code: u32, message: String },
}

impl BridgeError {
    pub fn invalid_packet(message: impl Into<String>) -> Self {
        Self::InvalidPacket(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub fn invalid_argument(
        event: impl Into<String>,
        index: usize,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidArgument {
            event: event.into(),
            index,
            reason: reason.into(),
        }
    }

    /// True for errors caused by a viewer sending a malformed command.
    pub fn is_protocol_mismatch(&self) -> bool {
        matches!(
            self,
            Self::UnknownEvent(_)
                | Self::ArgumentCount { .. }
                | Self::InvalidArgument { .. }
                | Self::Json(_)
        )
    }
}
