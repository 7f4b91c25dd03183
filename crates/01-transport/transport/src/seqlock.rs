//! Single-slot seqlock channel over a shared segment.
//!
//! Layout: `[header: 64 bytes][payload: fixed size]`. The sequence counter at
//! offset 0 is the single source of truth for "new data": the writer bumps it
//! to an odd value before touching the slot and to the next even value after,
//! and a reader that observes an odd or changed counter discards its copy.
//! When the reader falls behind it simply sees the newest even sequence, so
//! the channel is latest-wins by construction.

use crate::segment::SharedSegment;
use crate::{TransportError, TransportResult};
use std::ptr;
use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Total header size in bytes. The payload starts at this offset.
pub const HEADER_LEN: usize = 64;
/// Bytes of kind-specific metadata carried inside the header.
pub const KIND_META_LEN: usize = 16;

const META_OFF: usize = 8;
const META_LEN: usize = 48;
const IDLE_SLEEP: Duration = Duration::from_micros(100);

/// Header scalars protected by the sequence counter.
///
/// `kind_meta` is opaque to this crate; typed channels use it for image
/// dimensions or processing-time measurements.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SlotHeader {
    /// Monotonic frame identifier assigned by the producer.
    pub frame_id: u64,
    /// Producer wall-clock timestamp in seconds.
    pub timestamp: f64,
    /// Free-form flag bits.
    pub flags: u32,
    /// Kind-specific metadata bytes.
    pub kind_meta: [u8; KIND_META_LEN],
}

impl Default for SlotHeader {
    fn default() -> Self {
        Self {
            frame_id: 0,
            timestamp: 0.0,
            flags: 0,
            kind_meta: [0; KIND_META_LEN],
        }
    }
}

impl SlotHeader {
    fn encode(&self, payload_len: u32) -> [u8; META_LEN] {
        let mut buf = [0u8; META_LEN];
        buf[0..8].copy_from_slice(&self.frame_id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_bits().to_le_bytes());
        buf[16..20].copy_from_slice(&payload_len.to_le_bytes());
        buf[20..24].copy_from_slice(&self.flags.to_le_bytes());
        buf[24..24 + KIND_META_LEN].copy_from_slice(&self.kind_meta);
        buf
    }

    fn decode(buf: &[u8; META_LEN]) -> Self {
        let mut kind_meta = [0u8; KIND_META_LEN];
        kind_meta.copy_from_slice(&buf[24..24 + KIND_META_LEN]);
        Self {
            frame_id: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            timestamp: f64::from_bits(u64::from_le_bytes(buf[8..16].try_into().unwrap())),
            flags: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            kind_meta,
        }
    }
}

/// Result of a non-blocking slot read.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReadOutcome {
    /// A fresh, consistent snapshot was copied into the caller's buffer.
    Data(SlotHeader),
    /// Nothing new: never written, already returned, or torn mid-write.
    NoData,
}

/// Required total segment size for a slot with the given payload size.
pub fn slot_segment_len(payload_len: usize) -> usize {
    HEADER_LEN + payload_len
}

fn check_slot(segment: &SharedSegment, payload_len: usize) -> TransportResult<()> {
    if segment.len() != slot_segment_len(payload_len) {
        return Err(TransportError::SlotSize {
            payload: payload_len,
            segment: segment.len(),
        });
    }
    Ok(())
}

/// Producer view of a slot channel. Exactly one per segment.
pub struct SlotWriter {
    segment: SharedSegment,
    payload_len: usize,
}

impl SlotWriter {
    /// Wraps a segment sized for `payload_len` bytes of payload.
    pub fn new(segment: SharedSegment, payload_len: usize) -> TransportResult<Self> {
        check_slot(&segment, payload_len)?;
        Ok(Self {
            segment,
            payload_len,
        })
    }

    /// Publishes one payload. Wait-free: an in-flight reader copy is simply
    /// invalidated by the sequence bump.
    pub fn write(&mut self, header: &SlotHeader, payload: &[u8]) -> TransportResult<()> {
        if payload.len() != self.payload_len {
            return Err(TransportError::PayloadLen {
                len: payload.len(),
                capacity: self.payload_len,
            });
        }

        let meta = header.encode(payload.len() as u32);
        let base = self.segment.as_mut_ptr();
        // SAFETY: offset 0 of the mapping is 8-byte aligned (page aligned)
        // and reserved for the sequence counter by the slot layout.
        let seq = unsafe { &*(base as *const AtomicU64) };
        let current = seq.load(Ordering::Relaxed);
        debug_assert!(current % 2 == 0, "writer left slot mid-write");

        seq.store(current.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        // SAFETY: offsets stay inside the mapping (`check_slot` pinned the
        // exact segment size) and the odd sequence keeps readers from
        // trusting these bytes until the closing store below.
        unsafe {
            ptr::copy_nonoverlapping(meta.as_ptr(), base.add(META_OFF), META_LEN);
            ptr::copy_nonoverlapping(payload.as_ptr(), base.add(HEADER_LEN), payload.len());
        }

        seq.store(current.wrapping_add(2), Ordering::Release);
        Ok(())
    }

    /// Sequence number of the most recent completed write.
    pub fn sequence(&self) -> u64 {
        self.seq().load(Ordering::Relaxed)
    }

    /// Fixed payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Access the underlying segment, e.g. to unlink it on shutdown.
    pub fn segment_mut(&mut self) -> &mut SharedSegment {
        &mut self.segment
    }

    fn seq(&self) -> &AtomicU64 {
        // SAFETY: offset 0 of the mapping is 8-byte aligned (page aligned)
        // and reserved for the sequence counter by the slot layout.
        unsafe { &*(self.segment.as_ptr() as *const AtomicU64) }
    }
}

/// Consumer view of a slot channel. Exactly one per segment.
pub struct SlotReader {
    segment: SharedSegment,
    payload_len: usize,
    last_seq: u64,
}

impl SlotReader {
    /// Wraps a segment sized for `payload_len` bytes of payload.
    pub fn new(segment: SharedSegment, payload_len: usize) -> TransportResult<Self> {
        check_slot(&segment, payload_len)?;
        Ok(Self {
            segment,
            payload_len,
            last_seq: 0,
        })
    }

    /// Copies the newest payload into `payload_out` without blocking.
    ///
    /// Returns [`ReadOutcome::NoData`] when the slot has never been written,
    /// when the newest write was already returned, or when the snapshot was
    /// torn by a concurrent write.
    pub fn read_latest(&mut self, payload_out: &mut [u8]) -> TransportResult<ReadOutcome> {
        if payload_out.len() != self.payload_len {
            return Err(TransportError::PayloadLen {
                len: payload_out.len(),
                capacity: self.payload_len,
            });
        }

        let seq = self.seq();
        let seq1 = seq.load(Ordering::Acquire);
        if seq1 % 2 == 1 || seq1 == 0 || seq1 == self.last_seq {
            return Ok(ReadOutcome::NoData);
        }

        let mut meta = [0u8; META_LEN];
        // SAFETY: offsets stay inside the mapping; the copy may race with a
        // writer, which is exactly what the sequence revalidation below
        // detects before the bytes are trusted.
        unsafe {
            let base = self.segment.as_ptr();
            ptr::copy_nonoverlapping(base.add(META_OFF), meta.as_mut_ptr(), META_LEN);
            ptr::copy_nonoverlapping(
                base.add(HEADER_LEN),
                payload_out.as_mut_ptr(),
                self.payload_len,
            );
        }
        fence(Ordering::Acquire);

        let seq2 = seq.load(Ordering::Relaxed);
        if seq1 != seq2 {
            return Ok(ReadOutcome::NoData);
        }

        self.last_seq = seq1;
        Ok(ReadOutcome::Data(SlotHeader::decode(&meta)))
    }

    /// Polls for a fresh payload until `timeout` elapses, sleeping briefly
    /// between attempts so signals stay responsive.
    pub fn read_blocking(
        &mut self,
        payload_out: &mut [u8],
        timeout: Duration,
    ) -> TransportResult<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_latest(payload_out)? {
                ReadOutcome::Data(header) => return Ok(ReadOutcome::Data(header)),
                ReadOutcome::NoData => {
                    if Instant::now() >= deadline {
                        return Ok(ReadOutcome::NoData);
                    }
                    thread::sleep(IDLE_SLEEP);
                }
            }
        }
    }

    /// Sequence number of the last snapshot returned to the caller.
    pub fn last_sequence(&self) -> u64 {
        self.last_seq
    }

    /// Fixed payload size in bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Access the underlying segment.
    pub fn segment_mut(&mut self) -> &mut SharedSegment {
        &mut self.segment
    }

    fn seq(&self) -> &AtomicU64 {
        // SAFETY: as in `SlotWriter::seq`, offset 0 holds the counter.
        unsafe { &*(self.segment.as_ptr() as *const AtomicU64) }
    }
}
