//! The debug session state machine.
//!
//! `Session` owns every piece of session state and turns each decoded engine
//! packet or viewer command into a list of [`Effect`]s. It performs no I/O
//! itself; the [`Bridge`](crate::Bridge) applies the effects in order.

pub mod breakpoints;
pub mod context;
pub mod output;

use std::collections::HashMap;

pub use breakpoints::{Acknowledgement, Breakpoint, BreakpointRegistry, ExceptionBreak};
pub use context::{all_resolved, ContextResolver, ContextView, Scope, Variable};
pub use output::OutputAggregator;

use crate::config::BridgeConfig;
use crate::dbgp::{
    BreakMessage, CommandEncoder, ContextName, EncodedCommand, EngineCommand, EngineFault,
    EnginePacket, InitPacket, Property, Response, ResponseKind, StackFrame, StreamKind,
    TransactionId,
};
use crate::format::ValueFormatter;
use crate::viewer::{FileSearchState, ViewerCommand, ViewerEvent};
use crate::BridgeError;

/// Prefix echoed in front of every evaluated expression.
pub const REPL_PROMPT: &str = "dbgp> ";

/// Scopes are always enumerated for the innermost frame.
pub const CONTEXT_DEPTH: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No engine has completed the init handshake.
    Idle,
    Running,
    Broken,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakLocation {
    pub file: String,
    pub line: u32,
}

/// Side effects requested by the state machine, applied by the caller in
/// order.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write a command to the attached engine.
    Engine(EncodedCommand),
    Broadcast(ViewerEvent),
    /// Read the file and broadcast its contents.
    ShowFile(String),
    /// Drop the engine connection.
    CloseEngine,
}

/// What to do with the reply to an in-flight command.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PendingRequest {
    Continuation,
    Eval,
    ContextNames,
    ContextGet { generation: u64, context_id: String },
    StackGet,
    BreakpointSet,
    BreakpointRemove,
    Stdout,
}

#[derive(Debug)]
pub struct Session {
    phase: Phase,
    active_break: Option<BreakLocation>,
    active_stack: Vec<StackFrame>,
    context: ContextResolver,
    breakpoints: BreakpointRegistry,
    output: OutputAggregator,
    encoder: CommandEncoder,
    pending: HashMap<TransactionId, PendingRequest>,
    formatter: ValueFormatter,
    blacklisted_files: Vec<String>,
    file_search: FileSearchState,
}

impl Session {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            phase: Phase::Idle,
            active_break: None,
            active_stack: Vec::new(),
            context: ContextResolver::new(),
            breakpoints: BreakpointRegistry::new(),
            output: OutputAggregator::new(),
            encoder: CommandEncoder::new(),
            pending: HashMap::new(),
            formatter: ValueFormatter::new(config.max_value_depth),
            blacklisted_files: config.blacklisted_files.clone(),
            file_search: FileSearchState::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_break(&self) -> Option<&BreakLocation> {
        self.active_break.as_ref()
    }

    pub fn active_stack(&self) -> &[StackFrame] {
        &self.active_stack
    }

    pub fn context(&self) -> &ContextResolver {
        &self.context
    }

    pub fn breakpoints(&self) -> &BreakpointRegistry {
        &self.breakpoints
    }

    pub fn file_search(&self) -> &FileSearchState {
        &self.file_search
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// An engine has completed init and has not stopped.
    pub fn is_engine_active(&self) -> bool {
        matches!(self.phase, Phase::Running | Phase::Broken)
    }

    /// Back to `Idle`. In-flight transaction ids are orphaned; the encoder
    /// keeps counting so they are never handed out again. Breakpoints and the
    /// exception flag belong to the viewers and survive.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.active_break = None;
        self.active_stack.clear();
        self.context.clear();
        self.output.clear();
        self.pending.clear();
        self.breakpoints.forget_engine_state();
    }

    /// Decodes one raw engine packet. Malformed XML is logged and dropped.
    pub fn handle_raw(&mut self, xml: &str) -> Vec<Effect> {
        match EnginePacket::parse(xml) {
            Ok(packet) => self.handle_packet(packet),
            Err(e) => {
                tracing::warn!("Dropping undecodable engine packet: {}", e);
                Vec::new()
            }
        }
    }

    pub fn handle_packet(&mut self, packet: EnginePacket) -> Vec<Effect> {
        match packet {
            EnginePacket::Init(init) => self.on_init(init),
            EnginePacket::Stream(stream) => {
                if let Err(e) = self.output.push(stream.kind, &stream.text, stream.base64) {
                    tracing::warn!("Dropping undecodable {:?} fragment: {}", stream.kind, e);
                }
                Vec::new()
            }
            EnginePacket::Response(response) => {
                let mut effects = self.on_response(response);
                // Output is only released once the whole response is handled.
                effects.extend(self.output.flush().into_iter().map(Effect::Broadcast));
                effects
            }
        }
    }

    pub fn handle_viewer_command(&mut self, command: ViewerCommand) -> Vec<Effect> {
        let mut effects = Vec::new();

        match command {
            ViewerCommand::Run => self.resume(&mut effects, EngineCommand::Run),
            ViewerCommand::StepOver => self.resume(&mut effects, EngineCommand::StepOver),
            ViewerCommand::StepInto => self.resume(&mut effects, EngineCommand::StepInto),
            ViewerCommand::StepOut => self.resume(&mut effects, EngineCommand::StepOut),
            ViewerCommand::Eval(expression) => {
                effects.push(Effect::Broadcast(ViewerEvent::ReplInput(format!(
                    "{REPL_PROMPT}{expression}"
                ))));
                if self.is_engine_active() {
                    self.send(&mut effects, EngineCommand::Eval { expression }, PendingRequest::Eval);
                } else {
                    effects.push(Effect::Broadcast(ViewerEvent::ReplError(
                        "no active debug session".to_string(),
                    )));
                }
            }
            ViewerCommand::SetBreakpoint { file, line } => {
                let Some(local_id) = self.breakpoints.insert(&file, line).map(|bp| bp.local_id)
                else {
                    tracing::debug!("Breakpoint {}:{} already registered", file, line);
                    return effects;
                };
                if self.is_engine_active() {
                    self.send_breakpoint(&mut effects, local_id, &file, line);
                }
                effects.push(Effect::Broadcast(ViewerEvent::BreakpointSet { file, line }));
            }
            ViewerCommand::RemoveBreakpoint { file, line } => {
                let Some(removed) = self.breakpoints.remove(&file, line) else {
                    tracing::debug!("No breakpoint at {}:{} to remove", file, line);
                    return effects;
                };
                if let (true, Some(engine_id)) = (self.is_engine_active(), removed.engine_id) {
                    self.send(
                        &mut effects,
                        EngineCommand::BreakpointRemove { engine_id },
                        PendingRequest::BreakpointRemove,
                    );
                }
                effects.push(Effect::Broadcast(ViewerEvent::BreakpointRemoved { file, line }));
            }
            ViewerCommand::ToggleBreakOnException => {
                let (enabled, engine_id) = self.breakpoints.toggle_exception();
                if self.is_engine_active() {
                    if enabled {
                        self.send_exception_breakpoint(&mut effects);
                    } else if let Some(engine_id) = engine_id {
                        self.send(
                            &mut effects,
                            EngineCommand::BreakpointRemove { engine_id },
                            PendingRequest::BreakpointRemove,
                        );
                    }
                }
                effects.push(Effect::Broadcast(ViewerEvent::BreakOnException(enabled)));
            }
            ViewerCommand::SetFileSearch { is_open, search } => {
                self.file_search = FileSearchState { is_open, search };
                effects.push(Effect::Broadcast(ViewerEvent::ActiveFileSearch(
                    self.file_search.clone(),
                )));
            }
        }

        effects
    }

    fn on_init(&mut self, init: InitPacket) -> Vec<Effect> {
        if self.blacklisted_files.iter().any(|f| *f == init.file) {
            tracing::info!("Refusing debug session for blacklisted file {}", init.file);
            return vec![Effect::CloseEngine];
        }

        tracing::info!(
            "Engine session started: file={}, language={}, idekey={}",
            init.file,
            init.language.as_deref().unwrap_or("unknown"),
            init.idekey.as_deref().unwrap_or("")
        );

        self.reset();
        self.phase = Phase::Running;

        let mut effects = Vec::new();
        self.send(&mut effects, EngineCommand::Stdout, PendingRequest::Stdout);
        if self.breakpoints.exception().enabled {
            self.send_exception_breakpoint(&mut effects);
        }
        let stored: Vec<(u64, String, u32)> = self
            .breakpoints
            .iter()
            .map(|bp| (bp.local_id, bp.file.clone(), bp.line))
            .collect();
        for (local_id, file, line) in stored {
            self.send_breakpoint(&mut effects, local_id, &file, line);
        }
        self.send(&mut effects, EngineCommand::Run, PendingRequest::Continuation);
        effects
    }

    fn on_response(&mut self, response: Response) -> Vec<Effect> {
        let Some(transaction_id) = response.transaction_id else {
            tracing::debug!("Ignoring {} response without transaction id", response.command);
            return Vec::new();
        };
        let Some(pending) = self.pending.remove(&transaction_id) else {
            tracing::debug!(
                "Ignoring stray {} response (transaction {})",
                response.command,
                transaction_id
            );
            return Vec::new();
        };

        if let Some(fault) = &response.error {
            if pending != PendingRequest::Eval {
                tracing::warn!(
                    "Engine rejected {} (transaction {}): {} {}",
                    response.command,
                    transaction_id,
                    fault.code,
                    fault.message
                );
                return Vec::new();
            }
        }

        match (pending, response.kind) {
            (PendingRequest::Continuation, ResponseKind::Continuation { status, message }) => {
                self.on_continuation(status.as_deref(), message)
            }
            (PendingRequest::Eval, ResponseKind::Eval(result)) => self.on_eval(result),
            (PendingRequest::ContextNames, ResponseKind::ContextNames(names)) => {
                self.on_context_names(&names)
            }
            (
                PendingRequest::ContextGet {
                    generation,
                    context_id,
                },
                ResponseKind::ContextGet {
                    context_id: echoed,
                    properties,
                },
            ) => {
                if echoed.as_deref().is_some_and(|echoed| echoed != context_id) {
                    tracing::debug!(
                        "context_get reply {} names context {:?}, requested {}",
                        transaction_id,
                        echoed,
                        context_id
                    );
                }
                self.on_context_get(generation, &context_id, &properties)
            }
            (PendingRequest::StackGet, ResponseKind::StackGet(frames)) => {
                self.active_stack = frames;
                vec![Effect::Broadcast(ViewerEvent::ActiveStack(
                    self.active_stack.clone(),
                ))]
            }
            (PendingRequest::BreakpointSet, ResponseKind::BreakpointSet { id }) => {
                self.on_breakpoint_set(transaction_id, id)
            }
            (PendingRequest::BreakpointRemove | PendingRequest::Stdout, _) => Vec::new(),
            (pending, _) => {
                tracing::debug!(
                    "Ignoring {} response that does not answer {:?} (transaction {})",
                    response.command,
                    pending,
                    transaction_id
                );
                Vec::new()
            }
        }
    }

    fn on_continuation(&mut self, status: Option<&str>, message: Option<BreakMessage>) -> Vec<Effect> {
        let mut effects = Vec::new();

        match status {
            Some("break") => {
                self.phase = Phase::Broken;
                if let Some(message) = message {
                    effects.push(Effect::ShowFile(message.file.clone()));
                    effects.push(Effect::Broadcast(ViewerEvent::ActiveLine {
                        file: Some(message.file.clone()),
                        line: Some(message.line),
                    }));
                    effects.push(Effect::Broadcast(ViewerEvent::Break {
                        file: Some(message.file.clone()),
                        line: Some(message.line),
                    }));
                    if let Some(exception) = &message.exception {
                        let report = format!("{}: {}", exception, message.text);
                        if let Err(e) = self.output.push(StreamKind::Stderr, &report, false) {
                            tracing::warn!("Dropping exception report: {}", e);
                        }
                    }
                    self.active_break = Some(BreakLocation {
                        file: message.file,
                        line: message.line,
                    });
                } else {
                    tracing::debug!("Break reported without a location");
                }
                self.send(&mut effects, EngineCommand::StackGet, PendingRequest::StackGet);
                self.send(
                    &mut effects,
                    EngineCommand::ContextNames {
                        depth: CONTEXT_DEPTH,
                    },
                    PendingRequest::ContextNames,
                );
            }
            Some("stopping") => {
                // The engine only terminates after one more run.
                self.send(&mut effects, EngineCommand::Run, PendingRequest::Continuation);

                self.active_break = None;
                self.active_stack.clear();
                self.context.clear();
                effects.extend(
                    [
                        ViewerEvent::Break {
                            file: None,
                            line: None,
                        },
                        ViewerEvent::ActiveLine {
                            file: None,
                            line: None,
                        },
                        ViewerEvent::ActiveContext(ContextView::default()),
                        ViewerEvent::ActiveStack(Vec::new()),
                    ]
                    .into_iter()
                    .map(Effect::Broadcast),
                );
                effects.push(Effect::CloseEngine);
                self.phase = Phase::Stopped;
                tracing::info!("Engine is stopping");
            }
            other => {
                tracing::debug!("Ignoring continuation status {:?}", other);
            }
        }

        effects
    }

    fn on_eval(&mut self, result: Result<Property, EngineFault>) -> Vec<Effect> {
        let mut effects = Vec::new();

        let rendered = result
            .map_err(BridgeError::from)
            .and_then(|property| self.formatter.format(&property));
        match rendered {
            Ok(text) => {
                effects.push(Effect::Broadcast(ViewerEvent::ReplOutput(text)));
                // The expression may have changed variables.
                self.send(
                    &mut effects,
                    EngineCommand::ContextNames {
                        depth: CONTEXT_DEPTH,
                    },
                    PendingRequest::ContextNames,
                );
            }
            Err(e) => {
                effects.push(Effect::Broadcast(ViewerEvent::ReplError(e.to_string())));
            }
        }

        effects
    }

    fn on_context_names(&mut self, names: &[ContextName]) -> Vec<Effect> {
        let mut effects = Vec::new();

        let generation = self.context.begin(CONTEXT_DEPTH, names);
        for name in names {
            self.send(
                &mut effects,
                EngineCommand::ContextGet {
                    context_id: name.id.clone(),
                    depth: CONTEXT_DEPTH,
                },
                PendingRequest::ContextGet {
                    generation,
                    context_id: name.id.clone(),
                },
            );
        }
        if names.is_empty() {
            if let Some(view) = self.context.publish_if_complete() {
                effects.push(Effect::Broadcast(ViewerEvent::ActiveContext(view)));
            }
        }

        effects
    }

    fn on_context_get(
        &mut self,
        generation: u64,
        context_id: &str,
        properties: &[Property],
    ) -> Vec<Effect> {
        self.context
            .resolve(generation, context_id, properties, &self.formatter)
            .map(|view| Effect::Broadcast(ViewerEvent::ActiveContext(view)))
            .into_iter()
            .collect()
    }

    fn on_breakpoint_set(&mut self, transaction_id: TransactionId, id: Option<String>) -> Vec<Effect> {
        let mut effects = Vec::new();

        let Some(engine_id) = id else {
            tracing::warn!("breakpoint_set reply {} carries no id", transaction_id);
            return effects;
        };

        match self.breakpoints.acknowledge(transaction_id, &engine_id) {
            Acknowledgement::ExceptionBreak => {
                tracing::debug!("Exception breakpoint acknowledged as {}", engine_id);
            }
            Acknowledgement::Breakpoint { local_id } => {
                tracing::debug!("Breakpoint {} acknowledged as {}", local_id, engine_id);
            }
            Acknowledgement::Unmatched => {
                // Removed or disabled while the set was in flight.
                tracing::debug!("Removing engine breakpoint {} with no local record", engine_id);
                self.send(
                    &mut effects,
                    EngineCommand::BreakpointRemove { engine_id },
                    PendingRequest::BreakpointRemove,
                );
            }
        }

        effects
    }

    fn resume(&mut self, effects: &mut Vec<Effect>, command: EngineCommand) {
        if !self.is_engine_active() {
            tracing::warn!("Ignoring {} while no engine is active", command.name());
            return;
        }
        self.send(effects, command, PendingRequest::Continuation);
        self.phase = Phase::Running;
    }

    fn send_breakpoint(&mut self, effects: &mut Vec<Effect>, local_id: u64, file: &str, line: u32) {
        let transaction_id = self.send(
            effects,
            EngineCommand::BreakpointSet {
                file: file.to_string(),
                line,
            },
            PendingRequest::BreakpointSet,
        );
        self.breakpoints.mark_pending(local_id, transaction_id);
    }

    fn send_exception_breakpoint(&mut self, effects: &mut Vec<Effect>) {
        let transaction_id = self.send(
            effects,
            EngineCommand::ExceptionBreakpointSet,
            PendingRequest::BreakpointSet,
        );
        self.breakpoints.mark_exception_pending(transaction_id);
    }

    fn send(
        &mut self,
        effects: &mut Vec<Effect>,
        command: EngineCommand,
        pending: PendingRequest,
    ) -> TransactionId {
        let encoded = self.encoder.encode(command);
        let transaction_id = encoded.transaction_id;
        self.pending.insert(transaction_id, pending);
        effects.push(Effect::Engine(encoded));
        transaction_id
    }
}
