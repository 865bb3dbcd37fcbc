use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::session::{Effect, Session};
use crate::viewer::{snapshot, Publisher, Transcript, ViewerCommand, ViewerEvent};
use crate::{BridgeConfig, BridgeError, Result};

/// Traffic from the bridge to the engine connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutbound {
    /// A NUL-terminated command, ready for the socket.
    Command(String),
    Close,
}

pub type EngineLink = mpsc::UnboundedSender<EngineOutbound>;

/// What a viewer receives when it joins.
pub struct ViewerAttachment {
    pub viewer_id: String,
    /// Serialized snapshot, to be sent before anything from `events`.
    pub replay: Vec<String>,
    pub events: broadcast::Receiver<Arc<str>>,
}

struct Inner {
    session: Session,
    transcript: Transcript,
    engine: Option<(u64, EngineLink)>,
    next_engine_id: u64,
}

/// Serializes engine packets and viewer commands through the one session and
/// applies the effects it returns.
pub struct Bridge {
    inner: Mutex<Inner>,
    publisher: Publisher,
}

impl Bridge {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                session: Session::new(config),
                transcript: Transcript::new(config.transcript_capacity),
                engine: None,
                next_engine_id: 0,
            }),
            publisher: Publisher::new(),
        }
    }

    /// Registers the engine connection. Only one may be attached at a time.
    pub async fn attach_engine(&self, link: EngineLink) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        if inner.engine.is_some() {
            return Err(BridgeError::EngineBusy);
        }

        inner.next_engine_id += 1;
        let engine_id = inner.next_engine_id;
        inner.session.reset();
        inner.engine = Some((engine_id, link));
        tracing::info!("Engine {} attached", engine_id);
        Ok(engine_id)
    }

    /// Drops the engine connection and resets the session. Ids that no longer
    /// match the attached engine are ignored.
    pub async fn detach_engine(&self, engine_id: u64) {
        let mut inner = self.inner.lock().await;
        if !matches!(&inner.engine, Some((current, _)) if *current == engine_id) {
            tracing::debug!("Ignoring detach of unknown engine {}", engine_id);
            return;
        }

        inner.engine = None;
        inner.session.reset();
        tracing::info!("Engine {} detached, session reset", engine_id);
    }

    pub async fn is_engine_attached(&self) -> bool {
        self.inner.lock().await.engine.is_some()
    }

    pub async fn handle_engine_packet(&self, xml: &str) {
        let mut inner = self.inner.lock().await;
        let effects = inner.session.handle_raw(xml);
        self.apply(inner, effects).await;
    }

    /// Parses and runs one viewer message. Protocol mismatches are returned to
    /// the caller and never reach the engine.
    pub async fn handle_viewer_message(&self, raw: &str) -> Result<()> {
        let command = ViewerCommand::parse(raw).inspect_err(|e| {
            tracing::warn!("Rejected viewer message: {}", e);
        })?;
        self.handle_viewer_command(command).await;
        Ok(())
    }

    pub async fn handle_viewer_command(&self, command: ViewerCommand) {
        let mut inner = self.inner.lock().await;
        let effects = inner.session.handle_viewer_command(command);
        self.apply(inner, effects).await;
    }

    /// Subscribes a new viewer and builds its snapshot under the same lock,
    /// so the replay and the live feed neither overlap nor leave a gap. The
    /// break file is read after the lock is released.
    pub async fn connect_viewer(&self) -> ViewerAttachment {
        let inner = self.inner.lock().await;
        let events = self.publisher.subscribe();
        let viewer_id = Uuid::new_v4().to_string();

        let snap = snapshot(&inner.session, &inner.transcript, &viewer_id);
        drop(inner);

        let mut replay: Vec<String> = snap.events.iter().map(ViewerEvent::to_json).collect();
        if let Some(location) = snap.active_break {
            replay.push(read_file_event(&location.file).await.to_json());
            replay.push(
                ViewerEvent::ActiveLine {
                    file: Some(location.file),
                    line: Some(location.line),
                }
                .to_json(),
            );
        }

        tracing::info!(
            "Viewer {} connected ({} attached)",
            viewer_id,
            self.publisher.viewer_count()
        );
        ViewerAttachment {
            viewer_id,
            replay,
            events,
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.publisher.viewer_count()
    }

    /// Runs effects in order. The lock is released while a file is read, so
    /// a slow filesystem never stalls the other connections.
    async fn apply(&self, mut inner: MutexGuard<'_, Inner>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Engine(command) => match &inner.engine {
                    Some((engine_id, link)) => {
                        if link.send(EngineOutbound::Command(command.wire)).is_err() {
                            tracing::warn!(
                                "Engine {} is gone, dropping {} (transaction {})",
                                engine_id,
                                command.command.name(),
                                command.transaction_id
                            );
                        }
                    }
                    None => tracing::debug!(
                        "No engine attached, dropping {}",
                        command.command.name()
                    ),
                },
                Effect::Broadcast(event) => self.broadcast(&mut inner, event),
                Effect::ShowFile(file) => {
                    drop(inner);
                    let event = read_file_event(&file).await;
                    inner = self.inner.lock().await;
                    self.broadcast(&mut inner, event);
                }
                Effect::CloseEngine => {
                    if let Some((engine_id, link)) = &inner.engine {
                        tracing::info!("Closing engine {}", engine_id);
                        let _ = link.send(EngineOutbound::Close);
                    }
                }
            }
        }
    }

    fn broadcast(&self, inner: &mut Inner, event: ViewerEvent) {
        self.publisher.publish(&event);
        if event.is_transcript() {
            inner.transcript.push(event);
        }
    }
}

async fn read_file_event(file: &str) -> ViewerEvent {
    match tokio::fs::read_to_string(file).await {
        Ok(contents) => ViewerEvent::FileContents {
            file: file.to_string(),
            contents,
        },
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", file, e);
            ViewerEvent::ReplError(format!("Unable to read {file}: {e}"))
        }
    }
}
