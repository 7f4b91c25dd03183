//! Typed channels over the raw slot transport.
//!
//! Each channel bakes in the payload layout of its message kind plus which
//! process creates the underlying segment: the detection server creates the
//! image and detection segments, the decision server creates the control
//! segment. For the image channel the creator is the
//! *reader*; the camera process attaches as writer afterwards.

use crate::codec::{
    self, decode_control, decode_detection, encode_control, encode_detection, image_payload_len,
    CONTROL_PAYLOAD_LEN, DETECTION_PAYLOAD_LEN,
};
use crate::types::{ControlFrame, DetectionFrame, ImageBuf, MessageError};
use std::time::Duration;
use thiserror::Error;
use transport::{
    slot_segment_len, ReadOutcome, SharedSegment, SlotHeader, SlotReader, SlotWriter,
    TransportError,
};

/// Errors from typed channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Underlying segment or slot failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Payload decode failure (torn layout versions, bad discriminants).
    #[error(transparent)]
    Message(#[from] MessageError),
}

type ChannelResult<T> = Result<T, ChannelError>;

/// Per-frame metadata travelling in the image slot header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ImageMeta {
    pub frame_id: u64,
    pub timestamp: f64,
}

/// Reading side of the camera image channel.
pub struct ImageReader {
    slot: SlotReader,
    width: u32,
    height: u32,
}

impl ImageReader {
    /// Creates the named image segment. Used by the detection server, which
    /// owns this memory and unlinks it on shutdown.
    pub fn create(name: &str, width: u32, height: u32) -> ChannelResult<Self> {
        let len = slot_segment_len(image_payload_len(width, height));
        let segment = SharedSegment::create(name, len)?;
        Ok(Self {
            slot: SlotReader::new(segment, image_payload_len(width, height))?,
            width,
            height,
        })
    }

    /// Attaches to an existing image segment as a secondary reader (the
    /// launcher's broadcast path).
    pub fn attach(
        name: &str,
        width: u32,
        height: u32,
        retry_count: u32,
        retry_delay: Duration,
    ) -> ChannelResult<Self> {
        let len = slot_segment_len(image_payload_len(width, height));
        let segment = SharedSegment::attach(name, len, retry_count, retry_delay)?;
        Ok(Self {
            slot: SlotReader::new(segment, image_payload_len(width, height))?,
            width,
            height,
        })
    }

    /// Copies the newest frame into `image` without blocking.
    pub fn read_latest(&mut self, image: &mut ImageBuf) -> ChannelResult<Option<ImageMeta>> {
        debug_assert_eq!(image.width(), self.width);
        debug_assert_eq!(image.height(), self.height);
        match self.slot.read_latest(image.data_mut())? {
            ReadOutcome::Data(header) => Ok(Some(self.check_meta(header)?)),
            ReadOutcome::NoData => Ok(None),
        }
    }

    /// Polls for a fresh frame until `timeout` elapses.
    pub fn read_blocking(
        &mut self,
        image: &mut ImageBuf,
        timeout: Duration,
    ) -> ChannelResult<Option<ImageMeta>> {
        match self.slot.read_blocking(image.data_mut(), timeout)? {
            ReadOutcome::Data(header) => Ok(Some(self.check_meta(header)?)),
            ReadOutcome::NoData => Ok(None),
        }
    }

    fn check_meta(&self, header: SlotHeader) -> Result<ImageMeta, MessageError> {
        let (height, width, channels) = codec::parse_image_meta(&header.kind_meta);
        if height != self.height || width != self.width || channels != 3 {
            return Err(MessageError::BadImageShape {
                height,
                width,
                channels,
                exp_height: self.height,
                exp_width: self.width,
            });
        }
        Ok(ImageMeta {
            frame_id: header.frame_id,
            timestamp: header.timestamp,
        })
    }

    /// Unlinks the segment. Creator-only.
    pub fn unlink(&mut self) -> ChannelResult<()> {
        self.slot.segment_mut().unlink()?;
        Ok(())
    }
}

/// Writing side of the camera image channel. Attach-only: the segment is
/// created by the detection server before the camera process starts writing.
pub struct ImageWriter {
    slot: SlotWriter,
    width: u32,
    height: u32,
}

impl ImageWriter {
    /// Attaches to the image segment as its single writer.
    pub fn attach(
        name: &str,
        width: u32,
        height: u32,
        retry_count: u32,
        retry_delay: Duration,
    ) -> ChannelResult<Self> {
        let len = slot_segment_len(image_payload_len(width, height));
        let segment = SharedSegment::attach(name, len, retry_count, retry_delay)?;
        Ok(Self {
            slot: SlotWriter::new(segment, image_payload_len(width, height))?,
            width,
            height,
        })
    }

    /// Publishes one frame, overwriting whatever was in the slot.
    pub fn write(&mut self, image: &ImageBuf, meta: ImageMeta) -> ChannelResult<()> {
        debug_assert_eq!(image.width(), self.width);
        debug_assert_eq!(image.height(), self.height);
        let header = SlotHeader {
            frame_id: meta.frame_id,
            timestamp: meta.timestamp,
            flags: 0,
            kind_meta: codec::image_meta(self.width, self.height),
        };
        self.slot.write(&header, image.data())?;
        Ok(())
    }
}

/// Writing side of the detection channel. Created by the detection server.
pub struct DetectionWriter {
    slot: SlotWriter,
}

impl DetectionWriter {
    /// Creates the named detection segment.
    pub fn create(name: &str) -> ChannelResult<Self> {
        let segment = SharedSegment::create(name, slot_segment_len(DETECTION_PAYLOAD_LEN))?;
        Ok(Self {
            slot: SlotWriter::new(segment, DETECTION_PAYLOAD_LEN)?,
        })
    }

    /// Publishes one detection result.
    pub fn write(&mut self, frame: &DetectionFrame) -> ChannelResult<()> {
        let header = SlotHeader {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            flags: 0,
            kind_meta: codec::timing_meta(frame.processing_time_ms),
        };
        let payload = encode_detection(frame.left_lane.as_ref(), frame.right_lane.as_ref());
        self.slot.write(&header, &payload)?;
        Ok(())
    }

    /// Unlinks the segment. Creator-only.
    pub fn unlink(&mut self) -> ChannelResult<()> {
        self.slot.segment_mut().unlink()?;
        Ok(())
    }
}

/// Reading side of the detection channel (decision server, launcher).
pub struct DetectionReader {
    slot: SlotReader,
    buf: [u8; DETECTION_PAYLOAD_LEN],
}

impl DetectionReader {
    /// Attaches to an existing detection segment.
    pub fn attach(name: &str, retry_count: u32, retry_delay: Duration) -> ChannelResult<Self> {
        let segment = SharedSegment::attach(
            name,
            slot_segment_len(DETECTION_PAYLOAD_LEN),
            retry_count,
            retry_delay,
        )?;
        Ok(Self {
            slot: SlotReader::new(segment, DETECTION_PAYLOAD_LEN)?,
            buf: [0; DETECTION_PAYLOAD_LEN],
        })
    }

    /// Returns the newest unseen detection, if any.
    pub fn read_latest(&mut self) -> ChannelResult<Option<DetectionFrame>> {
        match self.slot.read_latest(&mut self.buf)? {
            ReadOutcome::Data(header) => {
                let (left_lane, right_lane) = decode_detection(&self.buf)?;
                Ok(Some(DetectionFrame {
                    left_lane,
                    right_lane,
                    processing_time_ms: codec::parse_timing_meta(&header.kind_meta),
                    frame_id: header.frame_id,
                    timestamp: header.timestamp,
                }))
            }
            ReadOutcome::NoData => Ok(None),
        }
    }
}

/// Writing side of the control channel. Created by the decision server.
pub struct ControlWriter {
    slot: SlotWriter,
}

impl ControlWriter {
    /// Creates the named control segment.
    pub fn create(name: &str) -> ChannelResult<Self> {
        let segment = SharedSegment::create(name, slot_segment_len(CONTROL_PAYLOAD_LEN))?;
        Ok(Self {
            slot: SlotWriter::new(segment, CONTROL_PAYLOAD_LEN)?,
        })
    }

    /// Publishes one control command. Values are clamped before encoding.
    pub fn write(&mut self, frame: &ControlFrame) -> ChannelResult<()> {
        let frame = frame.clamped();
        let header = SlotHeader {
            frame_id: frame.frame_id,
            timestamp: frame.timestamp,
            flags: 0,
            kind_meta: codec::timing_meta(frame.processing_time_ms),
        };
        let payload = encode_control(&frame);
        self.slot.write(&header, &payload)?;
        Ok(())
    }

    /// Unlinks the segment. Creator-only.
    pub fn unlink(&mut self) -> ChannelResult<()> {
        self.slot.segment_mut().unlink()?;
        Ok(())
    }
}

/// Reading side of the control channel (camera/vehicle process).
pub struct ControlReader {
    slot: SlotReader,
    buf: [u8; CONTROL_PAYLOAD_LEN],
}

impl ControlReader {
    /// Attaches to an existing control segment.
    pub fn attach(name: &str, retry_count: u32, retry_delay: Duration) -> ChannelResult<Self> {
        let segment = SharedSegment::attach(
            name,
            slot_segment_len(CONTROL_PAYLOAD_LEN),
            retry_count,
            retry_delay,
        )?;
        Ok(Self {
            slot: SlotReader::new(segment, CONTROL_PAYLOAD_LEN)?,
            buf: [0; CONTROL_PAYLOAD_LEN],
        })
    }

    /// Returns the newest unseen control command, if any.
    pub fn read_latest(&mut self) -> ChannelResult<Option<ControlFrame>> {
        match self.slot.read_latest(&mut self.buf)? {
            ReadOutcome::Data(header) => {
                let mut frame = decode_control(&self.buf)?;
                frame.frame_id = header.frame_id;
                frame.timestamp = header.timestamp;
                frame.processing_time_ms = codec::parse_timing_meta(&header.kind_meta);
                Ok(Some(frame))
            }
            ReadOutcome::NoData => Ok(None),
        }
    }
}
