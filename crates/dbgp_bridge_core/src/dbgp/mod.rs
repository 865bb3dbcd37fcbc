//! DBGp wire protocol: XML packet decoding, framing and outbound commands.

pub mod command;
pub mod framing;
pub mod packet;

pub use command::{CommandEncoder, EncodedCommand, EngineCommand, TransactionId};
pub use packet::{
    BreakMessage, ContextName, EngineFault, EnginePacket, InitPacket, Property, Response,
    ResponseKind, StackFrame, StreamKind, StreamPacket,
};

const FILE_URI_PREFIX: &str = "file://";

/// Strips the `file://` scheme the engine puts on every reported path.
pub fn strip_file_uri(uri: &str) -> &str {
    uri.strip_prefix(FILE_URI_PREFIX).unwrap_or(uri)
}

/// Turns a local path back into the URI form the engine expects.
pub fn to_file_uri(path: &str) -> String {
    if path.starts_with(FILE_URI_PREFIX) {
        path.to_string()
    } else {
        format!("{FILE_URI_PREFIX}{path}")
    }
}
