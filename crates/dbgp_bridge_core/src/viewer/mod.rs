//! Browser-facing JSON protocol: `{"event": <name>, "data": [<args>]}` in both
//! directions.

pub mod command;
pub mod event;
pub mod publisher;

pub use command::ViewerCommand;
pub use event::{FileSearchState, ViewerEvent};
pub use publisher::{snapshot, Publisher, Snapshot, Transcript};
