//! Per-request state machine.
//!
//! ```text
//! Received ─▶ Validated ─▶ Stored ─▶ Converting ─▶ Converted ─▶ Delivering ─▶ CleanedUp
//!    │            │           │           │             │             │
//!    ▼            └───────────┴───────────┴─────────────┴─────────────┴──▶ Failed
//! Rejected
//! ```
//!
//! `Rejected` is only reachable before anything touches the disk; `Failed`
//! and `CleanedUp` are only entered after the request's files have been (or
//! are being) removed.

use crate::error::DocxError;
use std::fmt;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Stored,
    Converting,
    Converted,
    Delivering,
    CleanedUp,
    Rejected,
    Failed,
}

impl Stage {
    pub fn can_advance_to(self, next: Stage) -> bool {
        use Stage::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, Stored)
                | (Validated, Failed)
                | (Stored, Converting)
                | (Converting, Converted)
                | (Converting, Failed)
                | (Converted, Delivering)
                | (Converted, Failed)
                | (Delivering, CleanedUp)
                | (Delivering, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::CleanedUp | Stage::Rejected | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks and logs one request's walk through [`Stage`].
#[derive(Debug)]
pub struct StageTracker {
    request_id: Uuid,
    stage: Stage,
}

impl StageTracker {
    pub fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            stage: Stage::Received,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to `next`. An illegal transition is a bug: it trips a debug
    /// assertion and is logged and ignored in release builds.
    pub fn advance(&mut self, next: Stage) {
        if !self.stage.can_advance_to(next) {
            error!(
                request_id = %self.request_id,
                "Illegal stage transition {} -> {}", self.stage, next
            );
            debug_assert!(false, "illegal stage transition {} -> {}", self.stage, next);
            return;
        }
        debug!(request_id = %self.request_id, "{} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Refuse the request before anything was written and pass `err` on.
    pub fn reject(&mut self, err: DocxError) -> DocxError {
        info!(request_id = %self.request_id, "Rejected upload: {}", err);
        self.advance(Stage::Rejected);
        err
    }
}
