//! Shared-memory transport primitives for the pipeline processes.
//!
//! This crate provides the pieces every process-to-process channel is built
//! from:
//! * [`SharedSegment`] – a named POSIX shared-memory region with an explicit
//!   creator/attacher role split. Only the creator may unlink the name.
//! * [`SlotWriter`] / [`SlotReader`] – a single-slot seqlock channel layered
//!   on top of a segment. Writes never block, reads never block, and a slow
//!   reader skips to the newest payload (latest-wins).
//! * [`TransportError`] – small error surface covering setup failures; the
//!   steady-state read path reports "no data" through [`ReadOutcome`] instead
//!   of errors.

mod error;
mod segment;
mod seqlock;

pub use error::{TransportError, TransportResult};
pub use segment::{SegmentRole, SharedSegment};
pub use seqlock::{
    slot_segment_len, ReadOutcome, SlotHeader, SlotReader, SlotWriter, HEADER_LEN, KIND_META_LEN,
};
