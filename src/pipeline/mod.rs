//! Pipeline stages for DOCX-to-PDF conversion.
//!
//! Each submodule implements exactly one concern of the request pipeline.
//! The orchestration itself lives in [`crate::convert`]; delivery and the
//! final cleanup live in [`crate::stream`].
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ validate ──▶ store ──▶ engine ──▶ write ──▶ stream ──▶ cleanup
//! (multipart) (metadata)  (upload/)  (PDF)    (files/)   (client)
//! ```
//!
//! 1. [`input`]    — pull the single `file` part out of a multipart body,
//!    refusing bad types from headers and oversized bodies mid-stream
//! 2. [`validate`] — the pure ACCEPT/REJECT predicate over upload metadata
//! 3. [`stage`]    — the per-request state machine the orchestrator walks

pub mod input;
pub mod stage;
pub mod validate;
