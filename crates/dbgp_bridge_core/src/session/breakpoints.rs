use std::collections::BTreeMap;

use crate::dbgp::TransactionId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    pub local_id: u64,
    pub file: String,
    pub line: u32,
    /// Unset until the engine acknowledges creation.
    pub engine_id: Option<String>,
    pub pending_request_id: Option<TransactionId>,
}

/// "Break on any uncaught exception", tracked apart from line breakpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExceptionBreak {
    pub enabled: bool,
    pub engine_id: Option<String>,
    pub pending_request_id: Option<TransactionId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acknowledgement {
    ExceptionBreak,
    Breakpoint { local_id: u64 },
    Unmatched,
}

#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    next_local_id: u64,
    points: BTreeMap<u64, Breakpoint>,
    exception: ExceptionBreak,
}

impl BreakpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a breakpoint, or returns `None` when one already exists at
    /// that location.
    pub fn insert(&mut self, file: &str, line: u32) -> Option<&mut Breakpoint> {
        if self.find(file, line).is_some() {
            return None;
        }
        self.next_local_id += 1;
        let local_id = self.next_local_id;
        self.points.insert(
            local_id,
            Breakpoint {
                local_id,
                file: file.to_string(),
                line,
                engine_id: None,
                pending_request_id: None,
            },
        );
        tracing::debug!("Breakpoint registered: {}:{} (local id {})", file, line, local_id);
        self.points.get_mut(&local_id)
    }

    pub fn find(&self, file: &str, line: u32) -> Option<&Breakpoint> {
        self.points
            .values()
            .find(|bp| bp.file == file && bp.line == line)
    }

    pub fn remove(&mut self, file: &str, line: u32) -> Option<Breakpoint> {
        let local_id = self.find(file, line)?.local_id;
        self.points.remove(&local_id)
    }

    pub fn mark_pending(&mut self, local_id: u64, transaction_id: TransactionId) {
        if let Some(bp) = self.points.get_mut(&local_id) {
            bp.pending_request_id = Some(transaction_id);
            bp.engine_id = None;
        }
    }

    /// Breakpoints in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.points.values()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn exception(&self) -> &ExceptionBreak {
        &self.exception
    }

    /// Flips the exception-break flag and returns the new state. Disabling
    /// hands back the engine id that must be removed engine-side, if any.
    pub fn toggle_exception(&mut self) -> (bool, Option<String>) {
        self.exception.enabled = !self.exception.enabled;
        if self.exception.enabled {
            (true, None)
        } else {
            self.exception.pending_request_id = None;
            (false, self.exception.engine_id.take())
        }
    }

    pub fn mark_exception_pending(&mut self, transaction_id: TransactionId) {
        self.exception.pending_request_id = Some(transaction_id);
        self.exception.engine_id = None;
    }

    /// Matches a `breakpoint_set` reply against the exception sentinel first,
    /// then the ordinary registry. A transaction id is consumed on its first
    /// match, so a duplicate reply is `Unmatched`.
    pub fn acknowledge(&mut self, transaction_id: TransactionId, engine_id: &str) -> Acknowledgement {
        if self.exception.pending_request_id == Some(transaction_id) {
            self.exception.pending_request_id = None;
            self.exception.engine_id = Some(engine_id.to_string());
            return Acknowledgement::ExceptionBreak;
        }

        match self
            .points
            .values_mut()
            .find(|bp| bp.pending_request_id == Some(transaction_id))
        {
            Some(bp) => {
                bp.pending_request_id = None;
                bp.engine_id = Some(engine_id.to_string());
                Acknowledgement::Breakpoint {
                    local_id: bp.local_id,
                }
            }
            None => Acknowledgement::Unmatched,
        }
    }

    /// Drops everything the previous engine knew; the viewer-owned records
    /// themselves survive so they can be replayed to the next engine.
    pub fn forget_engine_state(&mut self) {
        for bp in self.points.values_mut() {
            bp.engine_id = None;
            bp.pending_request_id = None;
        }
        self.exception.engine_id = None;
        self.exception.pending_request_id = None;
    }
}
