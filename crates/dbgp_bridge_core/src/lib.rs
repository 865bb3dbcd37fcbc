//! DBGp Bridge Core
//!
//! An async library that bridges a DBGp debug engine (XML over TCP) to browser
//! viewers speaking a small JSON event protocol. Holds the session model,
//! drives the multi-step request sequences needed to resolve it, and publishes
//! normalized events to every attached viewer.

pub mod bridge;
pub mod config;
pub mod dbgp;
pub mod error;
pub mod format;
pub mod session;
pub mod viewer;

// Re-export commonly used types
pub use bridge::{Bridge, EngineLink, EngineOutbound, ViewerAttachment};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use session::Session;

/// Result type alias using BridgeError
pub type Result<T> = std::result::Result<T, BridgeError>;
