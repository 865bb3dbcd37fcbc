use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;

use super::ViewerEvent;
use crate::session::{BreakLocation, Session};

const BROADCAST_CAPACITY: usize = 256;

/// Fans serialized events out to every subscribed viewer.
#[derive(Debug, Clone)]
pub struct Publisher {
    sender: broadcast::Sender<Arc<str>>,
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}

impl Publisher {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.sender.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn publish(&self, event: &ViewerEvent) {
        let message: Arc<str> = event.to_json().into();
        if self.sender.send(message).is_err() {
            tracing::debug!("No viewers attached, dropping {} event", event.name());
        }
    }
}

/// Bounded REPL history replayed to viewers that join late.
#[derive(Debug)]
pub struct Transcript {
    lines: VecDeque<ViewerEvent>,
    capacity: usize,
}

impl Transcript {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, event: ViewerEvent) {
        self.lines.push_back(event);
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ViewerEvent> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Everything a newly connected viewer needs to render the current state.
/// File contents are read by the caller when a break is active.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub events: Vec<ViewerEvent>,
    pub active_break: Option<BreakLocation>,
}

pub fn snapshot(session: &Session, transcript: &Transcript, viewer_id: &str) -> Snapshot {
    let mut events = vec![
        ViewerEvent::ActiveContext(session.context().published().clone()),
        ViewerEvent::ActiveStack(session.active_stack().to_vec()),
        ViewerEvent::ActiveFileSearch(session.file_search().clone()),
        ViewerEvent::UniqueId(viewer_id.to_string()),
        ViewerEvent::BreakOnException(session.breakpoints().exception().enabled),
    ];
    events.extend(session.breakpoints().iter().map(|bp| ViewerEvent::BreakpointSet {
        file: bp.file.clone(),
        line: bp.line,
    }));
    events.extend(transcript.iter().cloned());

    Snapshot {
        events,
        active_break: session.active_break().cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ContextView;
    use crate::viewer::{FileSearchState, ViewerCommand};
    use crate::BridgeConfig;

    #[test]
    fn test_transcript_is_bounded_and_evicts_oldest() {
        let mut transcript = Transcript::new(3);
        for i in 0..5 {
            transcript.push(ViewerEvent::ReplOutput(format!("line-{i}")));
        }
        assert_eq!(transcript.len(), 3);
        assert_eq!(
            transcript.iter().next(),
            Some(&ViewerEvent::ReplOutput("line-2".to_string()))
        );
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let publisher = Publisher::new();
        let mut first = publisher.subscribe();
        let mut second = publisher.subscribe();
        assert_eq!(publisher.viewer_count(), 2);

        publisher.publish(&ViewerEvent::ReplOutput("2".to_string()));

        let expected = serde_json::json!({"event": "REPLOutput", "data": ["2"]});
        for receiver in [&mut first, &mut second] {
            let raw = receiver.recv().await.unwrap();
            let message: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_eq!(message, expected);
        }
    }

    #[test]
    fn test_publish_without_viewers_is_harmless() {
        let publisher = Publisher::new();
        publisher.publish(&ViewerEvent::BreakOnException(true));
        assert_eq!(publisher.viewer_count(), 0);
    }

    #[test]
    fn test_snapshot_of_fresh_session() {
        let session = Session::new(&BridgeConfig::default());
        let transcript = Transcript::new(8);
        let snap = snapshot(&session, &transcript, "viewer-1");

        assert_eq!(
            snap.events,
            vec![
                ViewerEvent::ActiveContext(ContextView::default()),
                ViewerEvent::ActiveStack(Vec::new()),
                ViewerEvent::ActiveFileSearch(FileSearchState::default()),
                ViewerEvent::UniqueId("viewer-1".to_string()),
                ViewerEvent::BreakOnException(false),
            ]
        );
        assert_eq!(snap.active_break, None);
    }

    #[test]
    fn test_snapshot_replays_breakpoints_and_transcript() {
        let mut session = Session::new(&BridgeConfig::default());
        session.handle_viewer_command(ViewerCommand::SetBreakpoint {
            file: "a.php".to_string(),
            line: 10,
        });
        session.handle_viewer_command(ViewerCommand::ToggleBreakOnException);
        let mut transcript = Transcript::new(8);
        transcript.push(ViewerEvent::ReplInput("dbgp> $a".to_string()));

        let snap = snapshot(&session, &transcript, "v");
        assert!(snap.events.contains(&ViewerEvent::BreakOnException(true)));
        assert!(snap.events.contains(&ViewerEvent::BreakpointSet {
            file: "a.php".to_string(),
            line: 10
        }));
        assert_eq!(
            snap.events.last(),
            Some(&ViewerEvent::ReplInput("dbgp> $a".to_string()))
        );
    }
}
