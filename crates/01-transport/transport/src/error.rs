//! Error handling helpers for the transport crate.
//!
//! Setup failures (name conflicts, attach timeouts, size mismatches) are the
//! only fatal conditions. Steady-state reads translate torn or repeated
//! sequences into `ReadOutcome::NoData` rather than propagating errors.

use thiserror::Error;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

/// Errors surfaced by segment setup and slot channel configuration.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The shared-memory name is empty or contains a path separator.
    #[error("invalid shared memory name {name:?}")]
    InvalidName {
        /// Offending name as supplied by the caller.
        name: String,
    },

    /// A segment with this name already exists but its size does not match.
    #[error("shared memory '{name}' exists with {existing} bytes, expected {expected}")]
    SizeMismatch {
        /// Segment name.
        name: String,
        /// Size of the existing object in bytes.
        existing: usize,
        /// Size the caller asked for in bytes.
        expected: usize,
    },

    /// The segment never appeared while attaching with bounded retries.
    #[error("shared memory '{name}' not found after {attempts} attempts")]
    AttachTimeout {
        /// Segment name.
        name: String,
        /// Number of open attempts made before giving up.
        attempts: u32,
    },

    /// `unlink` was called on a segment this process merely attached to.
    #[error("segment '{name}' was attached, only its creator may unlink")]
    NotCreator {
        /// Segment name.
        name: String,
    },

    /// A slot was configured with a payload size the segment cannot hold.
    #[error("slot payload of {payload} bytes does not fit segment of {segment} bytes")]
    SlotSize {
        /// Requested payload capacity.
        payload: usize,
        /// Total segment size including the header.
        segment: usize,
    },

    /// The payload handed to a write does not match the slot's fixed size.
    #[error("payload of {len} bytes does not match slot capacity {capacity}")]
    PayloadLen {
        /// Bytes supplied by the caller.
        len: usize,
        /// Fixed payload size of the slot.
        capacity: usize,
    },

    /// An underlying OS call failed.
    #[error("shared memory operation on '{name}' failed")]
    Os {
        /// Segment name.
        name: String,
        /// OS-level cause.
        #[source]
        source: std::io::Error,
    },
}
